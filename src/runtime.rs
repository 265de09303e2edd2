//! Session events emitted for UI and observability.
//!
//! Intentionally lightweight so the controller can emit events without
//! blocking the session loop; sends are best-effort and observers may lag.

use crate::session::messages::{ChatMessage, SessionState};

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session state machine transitioned.
    StateChanged(SessionState),
    /// A message was appended to the conversation log.
    MessageAppended(ChatMessage),
    /// The volatile listening preview changed (empty string clears it).
    Preview(String),
    /// A user-visible fault was surfaced (unsupported capability, device
    /// loss, fatal recognition error).
    Fault(String),
}

//! Socorro: continuous voice session controller for a real-time
//! medical-emergency assistant.
//!
//! The crate turns a push-to-talk style interaction into a hands-free loop:
//! Microphone → speech recognition → silence endpointing → backend turn →
//! reply playback → Microphone again.
//!
//! # Architecture
//!
//! A single controller task owns all session state and drives the loop:
//! - **Speech**: platform recognition behind the [`speech::SpeechCapability`]
//!   seam, producing interim and final events per stream instance
//! - **Endpointing**: [`session::SilenceEndpointer`] finalizes an utterance
//!   after a configurable quiet period
//! - **Backend**: [`backend::TurnDispatcher`] posts one request per turn via
//!   `reqwest` and maps the reply, including base64 TTS audio
//! - **Playback**: [`audio::PlaybackCoordinator`] plays at most one clip at a
//!   time through a `cpal` output sink with `symphonia` decoding
//! - **Controller**: [`session::SessionController`] sequences
//!   Idle/Listening/Suspended, the echo guard delay and stream restarts

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod runtime;
pub mod session;
pub mod speech;

pub use backend::{Dispatcher, TurnDispatcher};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use runtime::SessionEvent;
pub use session::{ChatMessage, SessionController, SessionHandle, SessionState};
pub use speech::{SpeechCapability, SpeechStreamHandle};

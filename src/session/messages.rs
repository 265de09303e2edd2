//! Message and data types passed between session components.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// A single recognition event produced by an active speech stream.
#[derive(Debug, Clone)]
pub struct SpeechEvent {
    /// Instance token of the stream that produced this event.
    ///
    /// The controller compares this against its live token and drops events
    /// from superseded streams.
    pub instance: u64,
    /// Strictly increasing per stream instance, in arrival order.
    pub sequence_index: u64,
    /// Recognized text fragment.
    pub text: String,
    /// Whether this fragment is final (vs interim).
    pub is_final: bool,
}

/// Why a speech stream ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// The engine gave up after hearing no speech. Transient; the session
    /// restarts the stream after a short backoff.
    NoSpeechTimeout,
    /// The capture device failed or was lost. Session-ending.
    DeviceError(String),
    /// Fatal recognition fault. Session-ending.
    Fatal(String),
}

/// One item delivered on a speech stream's channel.
#[derive(Debug, Clone)]
pub enum SpeechStreamItem {
    /// A recognition event.
    Event(SpeechEvent),
    /// End of stream, either requested via `stop()` (no fault) or caused by
    /// the engine itself.
    Ended {
        /// Instance token of the stream that ended.
        instance: u64,
        /// Fault classification when the engine ended itself.
        fault: Option<StreamFault>,
    },
}

/// One finalized span of spoken input, delimited by a silence gap.
///
/// Immutable once dispatched.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Finalized transcript text.
    pub text: String,
    /// When the first contributing recognition event arrived.
    pub started_at: Instant,
    /// When the silence deadline finalized the utterance.
    pub finalized_at: Instant,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    User,
    Assistant,
}

/// One entry in the append-only conversation log.
///
/// Owned exclusively by the session controller; never mutated after
/// creation, only appended.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Message text.
    pub text: String,
    /// Author.
    pub sender: MessageSender,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
    /// Whether this message reports a failed turn.
    pub is_error: bool,
    /// Whether the reply carried a playable audio clip.
    pub has_audio: bool,
    /// Whether the backend consulted its knowledge base for this reply.
    pub used_knowledge_base: bool,
}

impl ChatMessage {
    /// A message spoken or typed by the user.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: MessageSender::User,
            timestamp: Utc::now(),
            is_error: false,
            has_audio: false,
            used_knowledge_base: false,
        }
    }

    /// A successful assistant reply.
    pub fn assistant(text: impl Into<String>, has_audio: bool, used_knowledge_base: bool) -> Self {
        Self {
            text: text.into(),
            sender: MessageSender::Assistant,
            timestamp: Utc::now(),
            is_error: false,
            has_audio,
            used_knowledge_base,
        }
    }

    /// An assistant-side error entry for a failed turn.
    pub fn turn_error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: MessageSender::Assistant,
            timestamp: Utc::now(),
            is_error: true,
            has_audio: false,
            used_knowledge_base: false,
        }
    }
}

/// Session lifecycle state. Exactly one instance, owned and mutated only by
/// the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No microphone, no timers. Initial and terminal state.
    Idle,
    /// Speech stream active, endpointer running.
    Listening,
    /// Stream intentionally stopped while a turn is dispatched and/or a
    /// reply is played back.
    Suspended,
}

/// Opaque encoded audio payload associated with at most one in-flight
/// playback. Ownership transfers to the playback path for the duration of
/// playback, then the clip is discarded.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Encoded audio bytes (typically mp3 from the backend's TTS).
    pub bytes: Vec<u8>,
}

/// Structured reply from one backend turn exchange.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Assistant response text.
    pub response_text: String,
    /// Synthesized audio for the response, when TTS succeeded.
    pub audio_clip: Option<AudioClip>,
    /// Whether the backend consulted its knowledge base.
    pub used_knowledge_base: bool,
    /// TTS failure reported by the backend alongside a successful reply.
    pub tts_error: Option<String>,
}

/// User commands accepted by the session controller.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Begin continuous listening.
    Start,
    /// Stop listening and playback, return to idle.
    Stop,
    /// Dispatch a typed message, identical in semantics to a finalized
    /// utterance.
    SubmitText(String),
}

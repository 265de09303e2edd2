//! Reply playback coordination.
//!
//! Owns "the speaker": at most one clip plays at a time, each playback ends
//! with exactly one completion event, and `stop()` is idempotent. The actual
//! output device sits behind [`AudioSink`] so a platform binding or a test
//! fake can substitute.

use crate::error::Result;
use crate::session::messages::AudioClip;
use tokio::sync::mpsc;
use tracing::debug;

/// Completion notifications from the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback reached the end of the clip.
    Finished,
    /// Playback was stopped externally before the clip ended.
    Stopped,
    /// Playback did not happen or aborted (decode error, device rejection).
    Failed(String),
}

/// Platform audio output seam.
///
/// `start` must not block on playback; completion is reported as a
/// [`PlaybackEvent`] on the channel the sink was constructed with. `stop`
/// on an idle sink is a no-op and emits nothing.
pub trait AudioSink: Send {
    /// Begin playback of an encoded clip. The caller guarantees no clip is
    /// currently playing.
    ///
    /// # Errors
    ///
    /// Returns an error when the command cannot reach the output device.
    fn start(&mut self, clip: AudioClip) -> Result<()>;

    /// Stop the current playback, if any. Idempotent.
    fn stop(&mut self);
}

/// Coordinator for the single audio output channel.
pub struct PlaybackCoordinator {
    sink: Box<dyn AudioSink>,
}

impl PlaybackCoordinator {
    /// Wrap a sink. The caller keeps the receiving half of the sink's event
    /// channel to observe completions.
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self { sink }
    }

    /// Play a clip. Any clip already playing is stopped first, so at most
    /// one playback is ever active.
    ///
    /// # Errors
    ///
    /// Returns an error when the sink rejects the clip outright. Deferred
    /// failures surface as [`PlaybackEvent::Failed`].
    pub fn play(&mut self, clip: AudioClip) -> Result<()> {
        // Stopping an idle sink is a no-op, so this is safe unconditionally.
        self.sink.stop();
        debug!(bytes = clip.bytes.len(), "starting reply playback");
        self.sink.start(clip)
    }

    /// Stop any current playback. Idempotent.
    pub fn stop(&mut self) {
        self.sink.stop();
    }
}

/// Build the event channel shared between a sink and its observer.
pub fn playback_event_channel() -> (
    mpsc::UnboundedSender<PlaybackEvent>,
    mpsc::UnboundedReceiver<PlaybackEvent>,
) {
    mpsc::unbounded_channel()
}

//! Speech recognition capability contract.
//!
//! The platform recognizer (browser engine, native STT, a test fake) sits
//! behind [`SpeechCapability`]; the session controller is the only component
//! that starts or stops streams, so the microphone has a single owner at all
//! times.

use crate::config::RecognitionConfig;
use crate::error::Result;
use crate::session::messages::SpeechStreamItem;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel capacity for recognition items. Recognition is slow relative to
/// the consumer, so a small buffer suffices.
pub const SPEECH_CHANNEL_SIZE: usize = 32;

/// Platform speech-recognition capability.
///
/// `start()` activates continuous, interim-enabled recognition and returns a
/// handle for the new stream instance. Implementations must fail with
/// [`crate::error::SessionError::UnsupportedCapability`] when the platform
/// has no recognizer. Only one stream instance may be active at a time;
/// starting another while one is active is a caller error, and the session
/// controller never does so.
pub trait SpeechCapability: Send + Sync {
    /// Start a new recognition stream carrying the given instance token.
    ///
    /// The stream produces a lazy sequence of [`SpeechStreamItem`]s on the
    /// handle's channel until `stop()` is called or the engine ends itself,
    /// in which case the terminal item is `Ended` with a fault
    /// classification.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedCapability` when no recognizer exists, or an
    /// engine-specific error when activation fails.
    fn start(&self, config: &RecognitionConfig, instance: u64) -> Result<SpeechStreamHandle>;
}

/// Handle to one active speech stream instance.
///
/// Items arrive in non-decreasing `sequence_index` order. Dropping the
/// handle stops the stream implicitly.
pub struct SpeechStreamHandle {
    instance: u64,
    items: mpsc::Receiver<SpeechStreamItem>,
    stop: CancellationToken,
}

impl SpeechStreamHandle {
    /// Build a handle from the pieces a capability implementation wires up.
    pub fn new(
        instance: u64,
        items: mpsc::Receiver<SpeechStreamItem>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            instance,
            items,
            stop,
        }
    }

    /// Instance token of this stream.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Receive the next stream item. `None` means the producer side is gone
    /// (after `Ended` was delivered, or the capability was torn down).
    pub async fn next_item(&mut self) -> Option<SpeechStreamItem> {
        self.items.recv().await
    }

    /// Request the stream to stop. Idempotent; safe to call after the
    /// stream has already ended.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Token an implementation observes to honor `stop()`.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for SpeechStreamHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::messages::{SpeechEvent, SpeechStreamItem};

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_tx, rx) = mpsc::channel(4);
        let handle = SpeechStreamHandle::new(0, rx, CancellationToken::new());
        handle.stop();
        handle.stop();
        assert!(handle.stop_token().is_cancelled());
    }

    #[tokio::test]
    async fn items_arrive_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut handle = SpeechStreamHandle::new(7, rx, CancellationToken::new());

        for i in 0..3u64 {
            tx.send(SpeechStreamItem::Event(SpeechEvent {
                instance: 7,
                sequence_index: i,
                text: format!("fragment {i}"),
                is_final: false,
            }))
            .await
            .expect("send");
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(SpeechStreamItem::Event(ev)) = handle.next_item().await {
            seen.push(ev.sequence_index);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}

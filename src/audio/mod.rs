//! Audio output: clip decoding, playback coordination and the default
//! cpal-backed sink.

pub mod cpal_sink;
pub mod decode;
pub mod playback;

pub use cpal_sink::CpalSink;
pub use playback::{AudioSink, PlaybackCoordinator, PlaybackEvent, playback_event_channel};

//! Default audio sink playing through the system output device via cpal.
//!
//! cpal streams are not `Send`, so the device and active stream live on a
//! dedicated audio thread. Commands arrive on a crossbeam channel; clip
//! decoding also happens on that thread to keep the session loop free of
//! CPU-bound work.

use crate::audio::decode::decode_clip;
use crate::audio::playback::{AudioSink, PlaybackEvent};
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use crate::session::messages::AudioClip;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

enum SinkCommand {
    Start(AudioClip),
    Stop,
}

/// [`AudioSink`] backed by a cpal output stream on its own thread.
pub struct CpalSink {
    cmd_tx: crossbeam_channel::Sender<SinkCommand>,
}

impl CpalSink {
    /// Spawn the audio thread and resolve the output device.
    ///
    /// Completion events are delivered on `event_tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable output device is available.
    pub fn spawn(
        config: &AudioConfig,
        event_tx: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| SessionError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| SessionError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| SessionError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("audio-sink".into())
            .spawn(move || sink_thread(device, cmd_rx, event_tx))
            .map_err(|e| SessionError::Audio(format!("failed to spawn audio thread: {e}")))?;

        Ok(Self { cmd_tx })
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self, clip: AudioClip) -> Result<()> {
        self.cmd_tx
            .send(SinkCommand::Start(clip))
            .map_err(|_| SessionError::Channel("audio thread is gone".into()))
    }

    fn stop(&mut self) {
        // Ignore a dead audio thread; stop must stay idempotent and safe.
        let _ = self.cmd_tx.send(SinkCommand::Stop);
    }
}

/// Shared playback progress between the audio callback and the thread loop.
struct PlaybackState {
    samples: Mutex<PlaybackCursor>,
    finished: AtomicBool,
}

struct PlaybackCursor {
    samples: Vec<f32>,
    position: usize,
}

fn sink_thread(
    device: cpal::Device,
    cmd_rx: crossbeam_channel::Receiver<SinkCommand>,
    event_tx: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let mut current: Option<(cpal::Stream, Arc<PlaybackState>)> = None;

    loop {
        match cmd_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(SinkCommand::Start(clip)) => {
                if current.take().is_some() {
                    let _ = event_tx.send(PlaybackEvent::Stopped);
                }
                match begin_playback(&device, &clip) {
                    Ok(active) => current = Some(active),
                    Err(e) => {
                        error!("playback failed to start: {e}");
                        let _ = event_tx.send(PlaybackEvent::Failed(e.to_string()));
                    }
                }
            }
            Ok(SinkCommand::Stop) => {
                if current.take().is_some() {
                    let _ = event_tx.send(PlaybackEvent::Stopped);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                let done = current
                    .as_ref()
                    .is_some_and(|(_, state)| state.finished.load(Ordering::Relaxed));
                if done {
                    current = None;
                    let _ = event_tx.send(PlaybackEvent::Finished);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn begin_playback(
    device: &cpal::Device,
    clip: &AudioClip,
) -> Result<(cpal::Stream, Arc<PlaybackState>)> {
    let decoded = decode_clip(clip)?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: decoded.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let state = Arc::new(PlaybackState {
        samples: Mutex::new(PlaybackCursor {
            samples: decoded.samples,
            position: 0,
        }),
        finished: AtomicBool::new(false),
    });

    let callback_state = Arc::clone(&state);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut cursor = match callback_state.samples.lock() {
                    Ok(c) => c,
                    Err(_) => return,
                };
                for sample in data.iter_mut() {
                    if cursor.position < cursor.samples.len() {
                        *sample = cursor.samples[cursor.position];
                        cursor.position += 1;
                    } else {
                        *sample = 0.0;
                        callback_state.finished.store(true, Ordering::Relaxed);
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| SessionError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| SessionError::Audio(format!("failed to start output stream: {e}")))?;

    Ok((stream, state))
}

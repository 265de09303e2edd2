//! Decoding of encoded reply clips to playable samples.
//!
//! The backend's TTS returns encoded audio (mp3 in practice); symphonia
//! probes the container, decodes it and downmixes to mono f32.

use crate::error::{Result, SessionError};
use crate::session::messages::AudioClip;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// A decoded clip ready for the output device.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Decode an encoded clip to mono f32 samples.
///
/// # Errors
///
/// Returns a `Decode` error when the payload is not recognizable audio or
/// contains no decodable frames.
pub fn decode_clip(clip: &AudioClip) -> Result<DecodedAudio> {
    let cursor = std::io::Cursor::new(clip.bytes.clone());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SessionError::Decode(format!("unrecognized audio payload: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SessionError::Decode("no audio track in payload".into()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SessionError::Decode(format!("unsupported codec: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels: usize = 1;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream is reported as an I/O error by symphonia.
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(SessionError::Decode(format!("malformed audio: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count().max(1);
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    if channels == 1 {
                        samples.extend_from_slice(buf.samples());
                    } else {
                        // Downmix interleaved frames to mono.
                        for frame in buf.samples().chunks_exact(channels) {
                            samples.push(frame.iter().sum::<f32>() / channels as f32);
                        }
                    }
                }
            }
            // Recoverable frame corruption: skip the packet.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping undecodable frame: {e}");
            }
            Err(e) => return Err(SessionError::Decode(format!("decode failed: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(SessionError::Decode("no audio frames decoded".into()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_clip(sample_rate: u32, samples: &[f32]) -> AudioClip {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut bytes = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).expect("wav writer");
            for &s in samples {
                writer.write_sample(s).expect("write sample");
            }
            writer.finalize().expect("finalize wav");
        }
        AudioClip {
            bytes: bytes.into_inner(),
        }
    }

    #[test]
    fn decodes_a_wav_clip() {
        let source: Vec<f32> = (0..2400)
            .map(|i| (i as f32 / 24.0).sin() * 0.5)
            .collect();
        let clip = wav_clip(24_000, &source);

        let decoded = decode_clip(&clip).expect("decode");
        assert_eq!(decoded.sample_rate, 24_000);
        assert_eq!(decoded.samples.len(), source.len());
        // Float WAV is lossless.
        assert!((decoded.samples[100] - source[100]).abs() < 1e-6);
    }

    #[test]
    fn rejects_garbage_bytes() {
        let clip = AudioClip {
            bytes: b"definitely not audio".to_vec(),
        };
        assert!(matches!(
            decode_clip(&clip),
            Err(SessionError::Decode(_))
        ));
    }

    #[test]
    fn rejects_empty_payload() {
        let clip = AudioClip { bytes: Vec::new() };
        assert!(decode_clip(&clip).is_err());
    }
}

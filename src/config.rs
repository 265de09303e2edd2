//! Configuration types for the voice session pipeline.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend query service settings.
    pub backend: BackendConfig,
    /// Speech recognition settings.
    pub recognition: RecognitionConfig,
    /// Utterance endpointing settings.
    pub endpointing: EndpointingConfig,
    /// Session controller timing settings.
    pub controller: ControllerConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| SessionError::Config(format!("invalid config file: {e}")))
    }
}

/// Backend query service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend query service.
    pub base_url: String,
    /// Request timeout in seconds for one turn exchange.
    pub request_timeout_s: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".into(),
            request_timeout_s: 30,
        }
    }
}

/// Speech recognition configuration.
///
/// Recognition always runs in continuous mode; these settings are handed to
/// the platform capability when a stream is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Recognition locale (BCP 47 tag).
    pub locale: String,
    /// Whether interim (non-final) results are requested.
    pub interim_results: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: "es-ES".into(),
            interim_results: true,
        }
    }
}

/// Utterance endpointing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointingConfig {
    /// Quiet period in ms after the last recognition event before the
    /// working transcript is finalized into an utterance.
    pub quiet_period_ms: u64,
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1800,
        }
    }
}

impl EndpointingConfig {
    /// Quiet period as a [`Duration`].
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Session controller timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay in ms between reply playback ending and the microphone
    /// reactivating, so the tail/echo of the emitted audio is not
    /// transcribed.
    pub guard_delay_ms: u64,
    /// Backoff in ms before restarting the stream after a transient
    /// no-speech timeout.
    pub restart_backoff_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            guard_delay_ms: 800,
            restart_backoff_ms: 300,
        }
    }
}

impl ControllerConfig {
    /// Echo guard delay as a [`Duration`].
    pub fn guard_delay(&self) -> Duration {
        Duration::from_millis(self.guard_delay_ms)
    }

    /// Stream restart backoff as a [`Duration`].
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

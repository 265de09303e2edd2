//! Backend query service client.
//!
//! One turn is one request/response exchange: the finalized utterance (or
//! typed message) goes out as JSON, the reply comes back as text plus
//! optional base64-encoded synthesized audio. Failures are never retried
//! here; retry policy belongs to the caller, and this system performs none.

use crate::config::BackendConfig;
use crate::error::{Result, SessionError};
use crate::session::messages::{AudioClip, Reply};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Seam for dispatching one turn to the backend.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatch one finalized utterance or typed message.
    ///
    /// # Errors
    ///
    /// `Transport` for network/timeout failures, `Service` for non-success
    /// responses. Neither is retried automatically.
    async fn dispatch(&self, text: &str) -> Result<Reply>;
}

/// Request body for one turn exchange.
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    message: &'a str,
}

/// Success body returned by the backend.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    response: String,
    /// Base64-encoded synthesized audio, when TTS succeeded.
    audio: Option<String>,
    #[serde(default)]
    rag_used: bool,
    tts_error: Option<String>,
}

/// Error body returned with a non-success status.
#[derive(Debug, Deserialize)]
struct QueryErrorBody {
    error: String,
    details: Option<String>,
}

/// HTTP client for the backend query service.
#[derive(Clone)]
pub struct TurnDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl TurnDispatcher {
    /// Build a dispatcher from backend configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s))
            .build()
            .map_err(|e| SessionError::Config(format!("cannot build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl Dispatcher for TurnDispatcher {
    async fn dispatch(&self, text: &str) -> Result<Reply> {
        let url = format!("{}/api/realtime-chat", self.base_url);
        debug!(%url, "dispatching turn");

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { message: text })
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        if !status.is_success() {
            // The backend reports errors as `{ error, details? }`; fall back
            // to the status line when the body has another shape.
            let err = match serde_json::from_slice::<QueryErrorBody>(&body) {
                Ok(parsed) => SessionError::Service {
                    message: parsed.error,
                    details: parsed.details,
                },
                Err(_) => SessionError::Service {
                    message: format!("backend returned {status}"),
                    details: None,
                },
            };
            return Err(err);
        }

        let parsed: QueryResponse = serde_json::from_slice(&body).map_err(|e| {
            SessionError::Service {
                message: format!("malformed backend response: {e}"),
                details: None,
            }
        })?;

        if let Some(ref tts_error) = parsed.tts_error {
            warn!("backend reported a TTS failure: {tts_error}");
        }

        let audio_clip = parsed.audio.as_deref().and_then(|encoded| {
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => Some(AudioClip { bytes }),
                Err(e) => {
                    // The reply text is still usable; treat the clip as absent.
                    warn!("discarding undecodable audio payload: {e}");
                    None
                }
            }
        });

        Ok(Reply {
            response_text: parsed.response,
            audio_clip,
            used_knowledge_base: parsed.rag_used,
            tts_error: parsed.tts_error,
        })
    }
}

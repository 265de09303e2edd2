//! Error types for the voice session pipeline.

/// Top-level error type for the continuous voice session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The platform offers no speech-recognition capability.
    ///
    /// Fatal to starting a session; the caller must surface it and must not
    /// enter listening.
    #[error("speech recognition is not available on this platform")]
    UnsupportedCapability,

    /// Network-level failure talking to the backend query service
    /// (connect error, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend query service answered with a non-success status.
    #[error("service error: {message}")]
    Service {
        /// Server-provided error message.
        message: String,
        /// Optional server-provided detail.
        details: Option<String>,
    },

    /// Audio device or output stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Encoded audio clip could not be decoded.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl SessionError {
    /// Human-readable detail for user-facing error messages.
    ///
    /// `Service` errors carry the server's message and optional detail;
    /// everything else falls back to the `Display` form.
    pub fn user_detail(&self) -> String {
        match self {
            Self::Service {
                message,
                details: Some(details),
            } => format!("{message}: {details}"),
            Self::Service { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_detail_includes_server_fields() {
        let err = SessionError::Service {
            message: "rate limited".into(),
            details: Some("try again soon".into()),
        };
        assert_eq!(err.user_detail(), "rate limited: try again soon");

        let bare = SessionError::Service {
            message: "rate limited".into(),
            details: None,
        };
        assert_eq!(bare.user_detail(), "rate limited");
    }

    #[test]
    fn transport_detail_uses_display_form() {
        let err = SessionError::Transport("connection refused".into());
        assert_eq!(err.user_detail(), "transport error: connection refused");
    }
}

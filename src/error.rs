//! Error types for Fluent Flow

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Fluent Flow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chat client
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access was refused by the host
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable audio device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Speech capture or synthesis is not available in this environment
    #[error("speech is not supported in this environment")]
    SpeechUnsupported,

    /// A capture session was started while another one is running
    #[error("a capture session is already active")]
    CaptureActive,

    /// Backend could not be reached; the request was never delivered
    #[error("backend unreachable: {0}")]
    NetworkUnreachable(String),

    /// Connection failed after the request may have reached the backend
    #[error("connection to backend lost: {0}")]
    ConnectionLost(String),

    /// Backend answered with a failure
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Message reported by the backend
        message: String,
    },

    /// Request did not complete in time
    #[error("request timed out")]
    Timeout,

    /// Backend asked us to slow down
    #[error("rate limited by backend")]
    RateLimited {
        /// Delay requested through `Retry-After`, if any
        retry_after: Option<Duration>,
    },

    /// Text sends require a healthy backend
    #[error("backend is not connected")]
    NotConnected,

    /// Another turn or a recording is in progress
    #[error("session busy: {0}")]
    Busy(&'static str),

    /// Nothing to send
    #[error("message is empty")]
    EmptyInput,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Map a transport-level `reqwest` failure onto the client taxonomy
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::ServerError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_connect() {
            Self::NetworkUnreachable(err.to_string())
        } else if err.is_decode() || err.is_builder() {
            Self::Http(err)
        } else {
            Self::ConnectionLost(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = Error::ServerError {
            status: 400,
            message: "No message provided".into(),
        };
        assert_eq!(err.to_string(), "server error 400: No message provided");
    }
}

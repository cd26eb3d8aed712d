//! Error types for the coaching client

use thiserror::Error;

/// Result type alias for coaching client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the coaching client
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone or camera access was refused
    #[error("permission denied: {0}")]
    Permission(String),

    /// Audio hardware could not be configured for simultaneous play and record
    #[error("audio session error: {0}")]
    AudioSession(String),

    /// Audio processing error (conversion, device stream)
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport failed to open or dropped mid-session
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or unrecognized inbound message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing or invalid tool parameters
    #[error("tool parameter error: {0}")]
    ToolParam(String),

    /// Session recording failure
    #[error("recorder error: {0}")]
    Recorder(String),

    /// Speech recognizer failure
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current session state
    #[error("invalid state: {0}")]
    InvalidState(String),

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

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether this error aborts `start()` rather than degrading the session
    #[must_use]
    pub const fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            Self::Permission(_) | Self::AudioSession(_) | Self::Connection(_) | Self::WebSocket(_)
        )
    }
}

//! Error types for OpenGate

use thiserror::Error;

/// Result type alias using OpenGate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for OpenGate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level error (connect refused, socket failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server-reported request failure (`res` frame with `ok: false`)
    #[error("Request failed [{code}]: {message}")]
    Request {
        /// Machine-readable error code
        code: String,
        /// Human-readable message
        message: String,
        /// Optional structured details
        details: Option<serde_json::Value>,
    },

    /// Local request timeout (no `res` frame arrived in time)
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Request flushed by disconnect or stop
    #[error("Connection closed: {0}")]
    Closed(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Server-assigned error code, if this failure was reported by the
    /// server. Local timeouts and disconnect flushes return `None` — this
    /// is the contract callers use to tell them apart.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Request { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if error indicates a lost connection rather than an
    /// application-level failure
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Closed(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("Invalid URL: {}", err))
    }
}

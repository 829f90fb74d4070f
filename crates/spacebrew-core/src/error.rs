//! Error types for Spacebrew

use thiserror::Error;

/// Result type alias for Spacebrew protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Spacebrew protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// JSON decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Well-formed JSON that is not one of the known message shapes
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// Client configuration missing required fields
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

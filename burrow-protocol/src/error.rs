//! Error types for the tunnel wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while framing or sealing tunnel messages
#[derive(Debug, Error)]
pub enum Error {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("frame is {actual} bytes but declares {declared}")]
    TrailingData { declared: usize, actual: usize },

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),
}

//! Error types for the tunnel upstream

use thiserror::Error;

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tunnel upstream
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Tunnel transport error
    #[error("tunnel error: {0}")]
    Tunnel(String),

    /// DNS resolution error
    #[error("DNS error: {0}")]
    Dns(String),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] burrow_protocol::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

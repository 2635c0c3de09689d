//! AIRC bridge error types

use thiserror::Error;

/// AIRC bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation requires a successful registration first
    #[error("Not registered")]
    NotRegistered,

    /// Registry rejected the request or replied with something unusable
    #[error("Registry error: {0}")]
    Registry(String),

    /// Local gateway (host channel) error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for AIRC bridge operations
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the interception server.

use std::net::SocketAddr;

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// IO error on a client connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    /// The client sent something that is not an HTTP request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The origin could not be reached or answered unreadably.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Shared storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] vigil_storage::StorageError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] vigil_core::ConfigError),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(err.to_string())
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

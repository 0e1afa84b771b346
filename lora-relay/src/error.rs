//! Error types for lorabridge-relay.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Main error type for bridge runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Modem channel errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The receive or send endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Host and port do not form a socket address.
    #[error("invalid endpoint {host}:{port}")]
    InvalidEndpoint {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

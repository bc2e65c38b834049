//! Application error types for campus-sync
//!
//! This module defines common error types used throughout the engine.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Durable-store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("Store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection layer error
    #[error("Store backend error: {0}")]
    Backend(#[from] tokio_rusqlite::Error),

    /// A persisted record could not be decoded
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// Record not found
    #[error("Record not found")]
    NotFound,
}

/// Classification of a failed remote call
///
/// Permanent failures never retry; transient failures retry up to the
/// policy's cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retryable: network unreachable, timeout, server 5xx
    Transient,
    /// Non-retryable: validation failure, 4xx, malformed payload
    Permanent,
}

/// Remote-call errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// Request timed out
    #[error("Request timeout")]
    Timeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by the server
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Server rejected the request
    #[error("Rejected: HTTP {0}")]
    Rejected(u16),

    /// Payload could not be understood by the server or the executor
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

impl RemoteError {
    /// Classify this error as transient or permanent
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RemoteError::Timeout => FailureKind::Transient,
            RemoteError::ConnectionRefused => FailureKind::Transient,
            RemoteError::RateLimited(_) => FailureKind::Transient,
            RemoteError::ServerError(code) if *code >= 500 => FailureKind::Transient,
            RemoteError::Network(_) => FailureKind::Transient,

            RemoteError::ServerError(_) => FailureKind::Permanent,
            RemoteError::Rejected(_) => FailureKind::Permanent,
            RemoteError::InvalidPayload(_) => FailureKind::Permanent,
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for region replication.
//!
//! Errors are grouped by how the hosting trigger framework should react to
//! them, not by which module produced them.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `MalformedInput` | No | Unreadable notification or bus payload |
//! | `NotMatched` | No | Resource id does not have the expected shape |
//! | `Decompression` | No | Bus payload corrupted (zstd decode failed) |
//! | `StoreUnavailable` | Yes | Document store transaction failed |
//! | `BusUnavailable` | Yes | Message bus publish/read failed |
//! | `Sqlite` | No | SQLite backend could not be opened |
//! | `Misconfigured` | No | Replication mode or local region missing |
//! | `InvalidState` | No | Service lifecycle violation |
//! | `Shutdown` | No | Service is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! This crate never retries on its own. Use [`ReplicationError::is_retryable()`]
//! to decide whether the notification should be redelivered. Malformed input
//! is dropped inside the entry points and never reaches the caller as an
//! error, so [`ReplicationError::is_malformed()`] is mostly useful for the
//! lower-level codecs.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while publishing or applying a change.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// A notification, payload or envelope could not be decoded.
    ///
    /// Not retryable - the input is malformed at the source.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A resource id did not match `<prefix>/regions/<region>/documents/<path>`.
    ///
    /// Not retryable.
    #[error("Resource id not matched: {resource_id}")]
    NotMatched { resource_id: String },

    /// Zstd decompression failure on a bus payload.
    ///
    /// Not retryable - the data is corrupt at the source.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// The document store failed during a read or transaction.
    ///
    /// Retryable - the whole notification can be redelivered because every
    /// store operation is conditional and idempotent.
    #[error("Store unavailable ({operation}): {message}")]
    StoreUnavailable { operation: String, message: String },

    /// The message bus failed during publish or read.
    ///
    /// Retryable with backoff by the host.
    #[error("Bus unavailable ({operation}): {message}")]
    BusUnavailable {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// SQLite error while opening the document store.
    ///
    /// Not retryable - indicates local database issues that need attention.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Replication mode is `NONE` or the local region is missing.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    /// Service state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Returned when operations are attempted during shutdown.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a bus error from a redis::RedisError
    pub fn bus(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::BusUnavailable {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a bus error without source
    pub fn bus_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusUnavailable {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable { .. } => true,
            Self::BusUnavailable { .. } => true,
            Self::MalformedInput(_) => false,
            Self::NotMatched { .. } => false,
            Self::Decompression(_) => false,
            Self::Sqlite(_) => false,
            Self::Misconfigured(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error means the input itself is bad (drop, never retry).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedInput(_) | Self::NotMatched { .. } | Self::Decompression(_)
        )
    }
}

impl From<redis::RedisError> for ReplicationError {
    fn from(e: redis::RedisError) -> Self {
        Self::bus("unknown", e)
    }
}

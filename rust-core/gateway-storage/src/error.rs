// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Storage error types for the gateway storage layer.
//
// One enum covers every failure a storage handler can surface: missing keys,
// malformed set records, unreachable backends, operations a backend refuses
// to serve, and configuration mistakes. Fatal variants never terminate the
// process here; the application layer decides what to do with them.

use thiserror::Error;

/// Errors that can occur when interacting with a storage handler.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested key was not found (or has expired).
    #[error("key not found: {0}")]
    NotFound(String),

    /// Failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The storage backend is not available (engine stopped, connection lost).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A network call to a remote storage node failed.
    #[error("network error: {0}")]
    Network(String),

    /// The operation is not offered by this backend. Callers treat this as
    /// "feature not available", never as a crash.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// The operation must not be served by this backend at all. The caller
    /// is expected to stop the process rather than continue.
    #[error("fatal storage error: {0}")]
    Fatal(String),

    /// The handler or backend was configured with invalid values.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// True for conditions the application must not continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Fatal(_))
    }

    /// True when the key is absent or expired.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// Crate-level result alias.
pub type StorageResult<T> = Result<T, StorageError>;

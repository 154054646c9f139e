// SPDX-License-Identifier: Apache-2.0

//! Error types for the connector core.

use keel_remote::{CodecError, RemoteError};
use thiserror::Error;

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, FdwError>;

/// Errors surfaced to the host query engine.
///
/// Remote failures always name the local step that was in progress, so a
/// failure is diagnosable without access to the remote engine's logs.
#[derive(Debug, Error)]
pub enum FdwError {
    /// Establishing or validating a remote session failed. The cache
    /// entry has already been removed; the next use retries cleanly.
    #[error("could not connect to {dsn}: {source}")]
    Connection { dsn: String, source: RemoteError },

    /// A remote call failed after the session was established. The scan's
    /// call stack has been unwound before this error was built.
    #[error("remote error during {step}: {source}")]
    Remote {
        step: &'static str,
        source: RemoteError,
    },

    /// Invalid or conflicting foreign-table options.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Administrative close refused: the session still has an open
    /// transaction.
    #[error("session \"{0}\" has a transaction in progress")]
    TransactionInProgress(String),

    /// No cached session under the given identifier.
    #[error("no cached session \"{0}\"")]
    UnknownSession(String),

    /// The codec could not represent a fetched value. Treated as a
    /// runtime error: the cursor is closed before this propagates.
    #[error("conversion failed for column \"{column}\": {source}")]
    Conversion { column: String, source: CodecError },

    /// The connection cache returned an entry inconsistent with its key.
    #[error("connection cache corrupted: {0}")]
    CacheCorruption(String),

    /// Invariant violation inside the connector itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FdwError {
    /// Attach the local step name to a remote failure.
    pub fn remote(step: &'static str, source: RemoteError) -> Self {
        FdwError::Remote { step, source }
    }
}

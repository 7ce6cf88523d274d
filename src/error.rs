//! Error types for harvester
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Auth, Extract, Input, Store)
//! - A single crate-wide [`Error`] enum that all fallible operations return
//! - `From` conversions so collaborator errors propagate with `?`

use std::time::Duration;
use thiserror::Error;

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for harvester
///
/// This is the primary error type used throughout the library. Collaborator
/// implementations return the narrower domain enums ([`AuthError`],
/// [`ExtractError`], [`InputError`], [`StoreError`]); the engine folds them
/// into this type at its public surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication against the source failed
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Record extraction failed
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Input enumeration failed
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Checkpoint store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The unconditional final flush during shutdown failed
    ///
    /// Distinct from [`Error::Store`]: mid-run flush failures are absorbed
    /// (the buffer is retained and retried), but a failed final flush means
    /// buffered records were lost and the run as a whole must report it.
    #[error("final flush failed: {0}")]
    FinalFlush(#[source] StoreError),

    /// The run was started a second time on the same engine instance
    #[error("run already started: each engine instance runs exactly once")]
    AlreadyRan,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The source rejected the login or the login could not be performed
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// The login did not complete in time
    #[error("login timed out after {0:?}")]
    Timeout(Duration),
}

/// Extraction errors
///
/// Workers branch on the variant: [`ExtractError::SessionLost`] re-queues the
/// task and triggers re-authentication, while [`ExtractError::Failed`] marks
/// the record itself as failed without retrying.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The session expired or was invalidated mid-task
    #[error("session lost: {0}")]
    SessionLost(String),

    /// Extraction failed for a reason unrelated to the session
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Input enumeration errors
#[derive(Debug, Error)]
pub enum InputError {
    /// The input source could not be opened
    #[error("failed to open input: {0}")]
    Open(String),

    /// A record in the input could not be parsed
    #[error("malformed input at line {line}: {reason}")]
    Malformed {
        /// 1-based line number of the offending record
        line: u64,
        /// Why the record could not be parsed
        reason: String,
    },

    /// I/O error while reading the input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or connect to the store
    #[error("failed to open store: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record payload could not be serialized for persistence
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

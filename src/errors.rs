/*!
 * Error types for the kanjigloss application.
 *
 * This module contains custom error types for the different layers of the
 * batch pipeline, using the thiserror crate for ergonomic error definitions.
 * Failures are scoped to the smallest unit possible: a `LookupError` fails a
 * single key, a `RepositoryError` fails a single record, a `RunError` ends a run.
 */

use thiserror::Error;

/// Signal returned by waits that were interrupted by cooperative cancellation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Errors that can occur when resolving a single lookup key
///
/// The type is cloneable because a single-flight outcome is shared with
/// every task that waited on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Timeout, connection failure or server-side error; retried once
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The service answered with a payload of unexpected shape; never retried
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The service refused the request (4xx other than 429); never retried
    #[error("Service rejected request ({status_code}): {message}")]
    Rejected {
        /// HTTP status code
        status_code: u16,
        /// Error message from the service
        message: String,
    },

    /// The lookup was abandoned because the run was cancelled
    #[error("Lookup cancelled")]
    Cancelled,
}

impl LookupError {
    /// Whether the lookup client should retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short category label used when tallying failure reasons
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient_network",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Rejected { .. } => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<Cancelled> for LookupError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Errors raised while loading or flushing the persisted cache file
///
/// These are reported as warnings; the in-memory cache stays valid.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem failure (disk full, permissions, ...)
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The cache file could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The temporary file could not be moved over the cache file
    #[error("Failed to persist cache file: {0}")]
    Persist(String),
}

impl From<tempfile::PersistError> for CacheError {
    fn from(error: tempfile::PersistError) -> Self {
        Self::Persist(error.to_string())
    }
}

/// Errors returned by a record repository
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The record does not exist
    #[error("Record not found: {0}")]
    NotFound(i64),

    /// The record exists but has no such field
    #[error("Record {record_id} has no field '{field}'")]
    FieldMissing {
        /// Record identifier
        record_id: i64,
        /// Requested field name
        field: String,
    },

    /// The underlying storage failed
    #[error("Repository storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for RepositoryError {
    fn from(error: anyhow::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Errors that abort a whole orchestrator run
#[derive(Error, Debug)]
pub enum RunError {
    /// The repository could not be enumerated
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The run could not be set up (invalid configuration, client construction)
    #[error("Setup error: {0}")]
    Setup(String),

    /// `run` was called on an orchestrator that already left the idle state
    #[error("Orchestrator already started")]
    AlreadyStarted,
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from the cache store
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Error from the record repository
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Error from a run
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}

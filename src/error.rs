//! Error types for tenancy operations.

use thiserror::Error;

/// Errors that can occur across tenant resolution, lifecycle, and migration
/// operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// A tenant (or its schema) already exists.
    #[error("Tenant already exists: {0}")]
    AlreadyExists(String),

    /// A tenant (or its schema) does not exist, or resolution produced no
    /// tenant under the reject policy.
    #[error("Tenant not found: {0}")]
    NotFound(String),

    /// A generated or supplied schema name failed validation.
    #[error("Invalid schema name: {0}")]
    InvalidSchemaName(String),

    /// A structural migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The control store and the schema catalog disagree and the
    /// compensating action could not restore consistency.
    #[error("Control store inconsistency: {0}")]
    ControlStoreInconsistency(String),

    /// A resolver could not do its work (missing input, malformed request).
    #[error("Tenant resolution failed: {0}")]
    Resolution(String),

    /// Underlying storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation exceeded its configured timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

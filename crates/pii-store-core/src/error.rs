use pii_types::TypesError;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying backend (database, filesystem) reported a failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A checkpoint status transition was not one of the allowed arcs.
    #[error("illegal checkpoint transition: {0}")]
    IllegalTransition(#[from] TypesError),

    /// Event or row payload failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

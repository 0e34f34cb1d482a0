use thiserror::Error;

use pii_bus::BusError;
use pii_crypto::EncryptionError;
use pii_store_core::StorageError;
use pii_types::TypesError;

/// Errors raised while committing a detection outcome or revealing
/// previously persisted entities.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Constructing a domain value (ids, `DetectedEntity`) failed validation.
    #[error("invalid value: {0}")]
    Invalid(#[from] TypesError),

    /// Encrypting or decrypting a sensitive field failed.
    #[error("encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    /// The event/checkpoint/counter/audit store rejected the write or read.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The event committed but could not be published to live subscribers.
    ///
    /// Commit has already happened by the time this is returned; callers
    /// should treat it as a delivery warning, not a failed item.
    #[error("bus publish failed after commit: {0}")]
    Publish(#[from] BusError),
}

use thiserror::Error;

use pii_attachment_processor::ExtractionError;
use pii_content_accessor::ContentAccessError;
use pii_detection_client::DetectionError;
use pii_orchestrator::OrchestratorError;
use pii_store_core::StorageError;
use pii_types::TypesError;

/// Errors raised by the top-level scan driver.
///
/// Content/extraction/detection failures are usually caught and downgraded
/// to a per-item `Error` event inside [`crate::ScanEngine`]'s processing
/// loop; the variants here surface when that downgrade itself is not
/// possible (e.g. listing a space's pages fails) or when the failure is in
/// the transactional write path, which is always fatal to the scan.
#[derive(Debug, Error)]
pub enum ScanEngineError {
    /// Constructing a domain value failed validation.
    #[error("invalid value: {0}")]
    Invalid(#[from] TypesError),

    /// Listing spaces, pages, or attachments failed.
    #[error(transparent)]
    Content(#[from] ContentAccessError),

    /// Extracting text from an attachment failed outright (not merely
    /// gated by quality).
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The detection engine call failed.
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// A storage read/write outside the orchestrator's transactional path
    /// failed (checkpoint lookups, status transitions).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Committing a detection outcome failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// `resumeAll`/`pause`/`cancel` referenced a scan with no known
    /// checkpoints and no active session.
    #[error("scan not found: {0}")]
    ScanNotFound(String),
}

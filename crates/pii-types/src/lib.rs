#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-types** – Shared domain primitives for the PII discovery scan
//! engine.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph
//! so that every other crate can depend on it without causing cycles. It
//! intentionally makes no assumptions about I/O, cryptography, or storage:
//! those concerns live in `pii-crypto` and `pii-store-core`.

mod checkpoint;
mod config;
mod entity;
mod error;
mod event;
mod ids;
mod severity;
mod status;

pub use checkpoint::{compute_progress, AuditRecord, Scan, ScanCheckpoint};
pub use config::{Detector, DetectionConfig, PiiTypeConfig};
pub use entity::DetectedEntity;
pub use error::{TypesError, TypesResult};
pub use event::{EventType, ScanEvent, ScanEventPayload};
pub use ids::{
    AttachmentName, PageId, ScanId, SpaceKey, MAX_ATTACHMENT_NAME_LEN, MAX_PAGE_ID_LEN,
    MAX_SCAN_ID_LEN, MAX_SPACE_KEY_LEN,
};
pub use severity::{severity_for, Severity, SeverityCount};
pub use status::ScanStatus;

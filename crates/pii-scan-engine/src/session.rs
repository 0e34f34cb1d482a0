use chrono::{DateTime, Utc};

use pii_types::ScanId;

/// Coarse lifecycle phase of one `startAll`/`resumeAll` run, kept in memory
/// alongside the durable per-space checkpoints for fast status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Spaces are being discovered; no items processed yet.
    Initializing,
    /// Actively processing items across one or more spaces.
    Running,
    /// An operator requested a pause; producers are stopping cooperatively.
    Paused,
    /// Every space finished without a fatal error.
    Completed,
    /// A fatal error aborted the scan.
    Failed,
}

/// In-memory snapshot of one scan's progress, mirrored from the durable
/// checkpoints but cheaper to poll.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// The scan this state describes.
    pub scan_id: ScanId,
    /// When `startAll`/`resumeAll` was called.
    pub started_at: DateTime<Utc>,
    /// Current phase.
    pub phase: ScanPhase,
    /// Overall progress across every space, `[0, 100]`.
    pub progress: f32,
    /// Set once `phase` becomes `Failed`.
    pub error: Option<String>,
}

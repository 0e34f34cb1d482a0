use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentName, PageId, ScanId, SpaceKey};
use crate::status::ScanStatus;

/// Top-level scan record. A scan owns one [`ScanCheckpoint`] per space it
/// touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// Unique scan identifier.
    pub scan_id: ScanId,
    /// When the scan was started.
    pub started_at: DateTime<Utc>,
    /// Overall scan status; `Running`/`Paused` apply while any space is
    /// active, `Completed`/`Failed` once every space has finished.
    pub status: ScanStatus,
    /// Number of spaces discovered at scan start.
    pub spaces_count: u32,
}

/// Durable resume position and status for one (scan, space) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    /// Owning scan.
    pub scan_id: ScanId,
    /// Space this checkpoint tracks.
    pub space_key: SpaceKey,
    /// Last page id fully processed, in canonical order.
    pub last_processed_page_id: Option<PageId>,
    /// Last attachment name fully processed, in canonical order.
    pub last_processed_attachment_name: Option<AttachmentName>,
    /// Current status of this space's processing.
    pub status: ScanStatus,
    /// Progress percentage in `[0, 100]`, rounded to one decimal.
    pub progress_percentage: f32,
    /// Last time this row was written.
    pub updated_at: DateTime<Utc>,
}

/// Compute `100 * processed / max(1, total)`, rounded to one decimal, per
/// the progress formula. `total` is the sum of page and attachment counts
/// for the space; `processed` is `analyzed_offset + processed_now` on
/// resume, or the running count on a fresh scan.
pub fn compute_progress(processed: u64, total: u64) -> f32 {
    let denom = total.max(1) as f64;
    let pct = 100.0 * (processed as f64) / denom;
    (pct * 10.0).round() as f32 / 10.0
}

/// Durable log row created whenever plaintext PII is revealed to an
/// operator via the `reveal` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Auto-assigned identifier, set by the store on insert.
    pub id: Option<i64>,
    /// Scan the revealed entities belong to.
    pub scan_id: ScanId,
    /// Space the revealed page belongs to, when known.
    pub space_key: Option<SpaceKey>,
    /// Page whose entities were revealed, when applicable.
    pub page_id: Option<PageId>,
    /// When the reveal occurred.
    pub accessed_at: DateTime<Utc>,
    /// Horizon after which this record is eligible for purge.
    pub retention_until: DateTime<Utc>,
    /// Free-text reason supplied by the caller.
    pub purpose: String,
    /// Number of entities revealed in this call.
    pub pii_entities_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_at_zero_total_is_full_when_processed() {
        assert_eq!(compute_progress(0, 0), 0.0);
    }

    #[test]
    fn progress_rounds_to_one_decimal() {
        // 1/3 * 100 = 33.333...
        assert_eq!(compute_progress(1, 3), 33.3);
    }

    #[test]
    fn progress_full_completion() {
        assert_eq!(compute_progress(4, 4), 100.0);
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-store-core** – Storage trait abstractions for the PII scan engine.
//!
//! This crate defines the contracts for event, checkpoint, severity-counter,
//! and audit-record persistence without providing concrete implementations.
//! Storage drivers (`pii-store-memory`, `pii-store-sqlite`) implement these
//! traits in separate crates that depend on this core abstraction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use pii_types::{
    AuditRecord, EventType, ScanCheckpoint, ScanEvent, ScanId, ScanStatus, SeverityCount,
    SpaceKey,
};

mod error;

pub use error::StorageError;

/// Process-local mutual exclusion for `event_seq` assignment, one lock per
/// `scan_id`.
///
/// A caller must acquire the guard for a scan before reading
/// [`EventStore::max_seq`] and must not release it until the event carrying
/// that sequence number has been durably written. This closes the
/// read-then-write race between two concurrent callers touching the same
/// scan (e.g. a page result committing at the same moment a `pause`/
/// `cancel` marker event is emitted).
#[derive(Debug, Default)]
pub struct ScanSeqLocks {
    locks: Mutex<HashMap<ScanId, Arc<Mutex<()>>>>,
}

impl ScanSeqLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `scan_id`, creating its entry on first use.
    /// Hold the returned guard across both the `max_seq` read and the
    /// subsequent event write that consumes it.
    pub async fn acquire(&self, scan_id: &ScanId) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(scan_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

/// Convenience result alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Filter applied to [`EventStore::list_items`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKindFilter {
    /// Only `ITEM` events (page results).
    Items,
    /// Only `ATTACHMENT_ITEM` events.
    Attachments,
    /// Both `ITEM` and `ATTACHMENT_ITEM` events.
    Both,
    /// All event kinds, unfiltered.
    All,
}

impl EventKindFilter {
    /// `true` if `kind` passes this filter.
    pub fn matches(self, kind: EventType) -> bool {
        match self {
            EventKindFilter::Items => kind == EventType::Item,
            EventKindFilter::Attachments => kind == EventType::AttachmentItem,
            EventKindFilter::Both => matches!(kind, EventType::Item | EventType::AttachmentItem),
            EventKindFilter::All => true,
        }
    }
}

/// Append-only durable log of [`ScanEvent`]s.
///
/// Implementations must assign `event_seq` such that it is strictly
/// monotonic per `scan_id`, matching storage write order, and must not
/// reorder or drop events once committed.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist `event`. The caller is responsible for having set
    /// `event.event_seq` to `max_seq(event.scan_id) + 1` while holding the
    /// guard returned by [`EventStore::lock_sequence`] for `event.scan_id`,
    /// and for not releasing that guard until this call (and any
    /// checkpoint/counter update for the same item) has returned.
    async fn append(&self, event: &ScanEvent) -> StorageResult<()>;

    /// Highest stored sequence number for `scan_id`, or `0` if the scan has
    /// no events yet.
    async fn max_seq(&self, scan_id: &ScanId) -> StorageResult<u64>;

    /// Acquire process-local exclusion over `event_seq` assignment for
    /// `scan_id`. Callers must hold the returned guard across both the
    /// `max_seq` read and the `append`/`commit_item` write that consumes
    /// the computed sequence number, so two concurrent callers touching the
    /// same scan cannot observe the same `max_seq` before either commits.
    async fn lock_sequence(&self, scan_id: &ScanId) -> OwnedMutexGuard<()>;

    /// List item/attachment events for `scan_id` matching `filter`, ordered
    /// by ascending `event_seq`.
    async fn list_items(
        &self,
        scan_id: &ScanId,
        filter: EventKindFilter,
    ) -> StorageResult<Vec<ScanEvent>>;

    /// List every event for `scan_id` restricted to `space_key`, ordered by
    /// ascending `event_seq`, for bulk export.
    async fn list_for_export(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Vec<ScanEvent>>;

    /// Delete every event ever recorded, across all scans.
    async fn delete_all(&self) -> StorageResult<()>;
}

/// Durable resume position and status per (scan, space).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically insert-or-update the checkpoint for (`scan_id`,
    /// `space_key`). `last_processed_page_id`/`last_processed_attachment_name`
    /// that are `None` preserve the prior non-empty value rather than
    /// clearing it. The `status` transition is validated against the
    /// existing row via [`pii_types::ScanStatus::validate_transition`];
    /// violations surface as [`StorageError::IllegalTransition`].
    #[allow(clippy::too_many_arguments)]
    async fn upsert(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        last_processed_page_id: Option<&str>,
        last_processed_attachment_name: Option<&str>,
        status: ScanStatus,
        progress_percentage: f32,
        ts: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Fetch the checkpoint for one (scan, space) pair.
    async fn find_by(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>>;

    /// All checkpoints belonging to one scan.
    async fn find_by_scan(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>>;

    /// All checkpoints ever recorded for one space, across scans.
    async fn find_by_space(&self, space_key: &SpaceKey) -> StorageResult<Vec<ScanCheckpoint>>;

    /// The most recently updated checkpoint for one space, across scans.
    async fn find_latest_by_space(
        &self,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>>;

    /// Checkpoints in `Running` status for one scan.
    async fn find_running(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>>;

    /// Every checkpoint in `Running` status, across all scans. Used by the
    /// startup reconciliation sweep: a `Running` row with no corresponding
    /// live scan session is evidence of a crash or ungraceful shutdown, not
    /// of a scan actually in progress.
    async fn find_all_running(&self) -> StorageResult<Vec<ScanCheckpoint>>;

    /// Delete every checkpoint belonging to one scan.
    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()>;

    /// Delete every checkpoint in `Running` or `Paused` status, across all
    /// scans, used by `purgeAll`.
    async fn delete_active(&self) -> StorageResult<()>;

    /// Delete active checkpoints restricted to the given space keys.
    async fn delete_active_for_spaces(&self, space_keys: &[SpaceKey]) -> StorageResult<()>;

    /// Delete every checkpoint regardless of status, across all scans, used
    /// by `purgeAll`.
    async fn delete_all(&self) -> StorageResult<()>;
}

/// Aggregated HIGH/MEDIUM/LOW counters per (scan, space).
#[async_trait]
pub trait SeverityCounterStore: Send + Sync {
    /// Atomically add the given deltas to the (scan, space) counter row,
    /// creating it on first touch. Implementations must not read-then-write
    /// in caller-visible code; the add must be storage-native so concurrent
    /// increments are never lost.
    async fn increment(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        delta_high: u64,
        delta_medium: u64,
        delta_low: u64,
    ) -> StorageResult<()>;

    /// Current counter values for one (scan, space) pair.
    async fn get(&self, scan_id: &ScanId, space_key: &SpaceKey) -> StorageResult<SeverityCount>;

    /// All counter rows for one scan, keyed by space.
    async fn list_by_scan(&self, scan_id: &ScanId) -> StorageResult<Vec<(SpaceKey, SeverityCount)>>;

    /// Delete every counter row belonging to one scan.
    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()>;

    /// Delete every counter row across all scans, used by `purgeAll`.
    async fn delete_all(&self) -> StorageResult<()>;
}

/// Durable log of PII reveal operations, for compliance retention.
#[async_trait]
pub trait AuditRecordStore: Send + Sync {
    /// Append one audit record.
    async fn append(&self, record: &AuditRecord) -> StorageResult<()>;

    /// Delete every audit record whose `retention_until` is strictly before
    /// `now`, returning the number of rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<u64>;
}

/// A store that can commit one processed item's event, checkpoint update,
/// and severity deltas as a single unit.
///
/// The default implementation performs the three writes sequentially and
/// is only as atomic as the underlying executor guarantees; drivers backed
/// by a real transactional store (`pii-store-sqlite`) override it to wrap
/// all three in one database transaction.
#[async_trait]
pub trait TransactionalStore: EventStore + CheckpointStore + SeverityCounterStore {
    /// Commit `event` together with the checkpoint and counter updates for
    /// the (scan, space) pair it belongs to. As with [`EventStore::append`],
    /// the caller must already hold the [`EventStore::lock_sequence`] guard
    /// for `event.scan_id` when calling this, and must have computed
    /// `event.event_seq` from `max_seq` while holding it.
    #[allow(clippy::too_many_arguments)]
    async fn commit_item(
        &self,
        event: &ScanEvent,
        space_key: &SpaceKey,
        last_processed_page_id: Option<&str>,
        last_processed_attachment_name: Option<&str>,
        status: ScanStatus,
        progress_percentage: f32,
        delta_high: u64,
        delta_medium: u64,
        delta_low: u64,
    ) -> StorageResult<()> {
        self.append(event).await?;
        self.upsert(
            &event.scan_id,
            space_key,
            last_processed_page_id,
            last_processed_attachment_name,
            status,
            progress_percentage,
            event.ts,
        )
        .await?;
        self.increment(&event.scan_id, space_key, delta_high, delta_medium, delta_low)
            .await?;
        Ok(())
    }
}

/// Umbrella trait implemented by a single storage driver that backs all
/// four stores from one connection/handle. Drivers may also expose the
/// individual traits directly; this is a convenience for callers that want
/// one object to construct and pass around.
pub trait StorageBackend:
    EventStore + CheckpointStore + SeverityCounterStore + AuditRecordStore
{
}

impl<T> StorageBackend for T where
    T: EventStore + CheckpointStore + SeverityCounterStore + AuditRecordStore
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_filter_items_excludes_attachments() {
        assert!(EventKindFilter::Items.matches(EventType::Item));
        assert!(!EventKindFilter::Items.matches(EventType::AttachmentItem));
    }

    #[test]
    fn event_kind_filter_both_includes_both() {
        assert!(EventKindFilter::Both.matches(EventType::Item));
        assert!(EventKindFilter::Both.matches(EventType::AttachmentItem));
        assert!(!EventKindFilter::Both.matches(EventType::Start));
    }

    #[test]
    fn event_kind_filter_all_matches_everything() {
        assert!(EventKindFilter::All.matches(EventType::Complete));
    }
}

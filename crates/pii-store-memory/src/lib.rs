#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-store-memory** – In-memory storage driver for the PII scan engine.
//!
//! This crate provides a fast, non-persistent implementation of the
//! `pii-store-core` traits suitable for unit tests and local development.
//! All data is stored in memory and is lost when the process terminates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedMutexGuard, RwLock};

use pii_store_core::{
    AuditRecordStore, CheckpointStore, EventKindFilter, EventStore, ScanSeqLocks,
    SeverityCounterStore, StorageError, StorageResult, TransactionalStore,
};
use pii_types::{
    AttachmentName, AuditRecord, PageId, ScanCheckpoint, ScanEvent, ScanId, ScanStatus,
    SeverityCount, SpaceKey,
};

type CheckpointKey = (ScanId, SpaceKey);

/// An in-memory, non-persistent implementation of every `pii-store-core`
/// trait, backed by `Arc<RwLock<HashMap>>` collections.
///
/// Intended for unit tests and local development; `pii-store-sqlite` is the
/// durable driver used in production.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    events: Arc<RwLock<HashMap<ScanId, Vec<ScanEvent>>>>,
    checkpoints: Arc<RwLock<HashMap<CheckpointKey, ScanCheckpoint>>>,
    counters: Arc<RwLock<HashMap<CheckpointKey, SeverityCount>>>,
    audit: Arc<RwLock<Vec<AuditRecord>>>,
    next_audit_id: Arc<AtomicI64>,
    seq_locks: Arc<ScanSeqLocks>,
}

impl MemoryBackend {
    /// Create a new, empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored across all scans.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    /// Clear all stored events, checkpoints, counters, and audit records.
    ///
    /// Useful for tests and for implementing `purgeAll` against a memory
    /// backend.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.checkpoints.write().await.clear();
        self.counters.write().await.clear();
        self.audit.write().await.clear();
    }
}

#[async_trait]
impl EventStore for MemoryBackend {
    async fn append(&self, event: &ScanEvent) -> StorageResult<()> {
        let mut events = self.events.write().await;
        let bucket = events.entry(event.scan_id.clone()).or_default();
        if let Some(last) = bucket.last() {
            if event.event_seq <= last.event_seq {
                return Err(StorageError::Backend(format!(
                    "event_seq {} is not strictly greater than last stored seq {}",
                    event.event_seq, last.event_seq
                )));
            }
        }
        bucket.push(event.clone());
        Ok(())
    }

    async fn max_seq(&self, scan_id: &ScanId) -> StorageResult<u64> {
        Ok(self
            .events
            .read()
            .await
            .get(scan_id)
            .and_then(|bucket| bucket.last())
            .map(|e| e.event_seq)
            .unwrap_or(0))
    }

    async fn lock_sequence(&self, scan_id: &ScanId) -> OwnedMutexGuard<()> {
        self.seq_locks.acquire(scan_id).await
    }

    async fn list_items(
        &self,
        scan_id: &ScanId,
        filter: EventKindFilter,
    ) -> StorageResult<Vec<ScanEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(scan_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| filter.matches(e.event_type()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_for_export(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Vec<ScanEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(scan_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| e.space_key.as_ref() == Some(space_key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        self.events.write().await.clear();
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryBackend {
    async fn upsert(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        last_processed_page_id: Option<&str>,
        last_processed_attachment_name: Option<&str>,
        status: ScanStatus,
        progress_percentage: f32,
        ts: DateTime<Utc>,
    ) -> StorageResult<()> {
        let key = (scan_id.clone(), space_key.clone());
        let mut checkpoints = self.checkpoints.write().await;
        match checkpoints.get(&key) {
            Some(existing) => {
                existing.status.validate_transition(status)?;
                let last_page_id = match last_processed_page_id {
                    Some(id) => Some(PageId::new(id).map_err(StorageError::IllegalTransition)?),
                    None => existing.last_processed_page_id.clone(),
                };
                let last_attachment_name = match last_processed_attachment_name {
                    Some(name) => {
                        Some(AttachmentName::new(name).map_err(StorageError::IllegalTransition)?)
                    }
                    None => existing.last_processed_attachment_name.clone(),
                };
                checkpoints.insert(
                    key,
                    ScanCheckpoint {
                        scan_id: scan_id.clone(),
                        space_key: space_key.clone(),
                        last_processed_page_id: last_page_id,
                        last_processed_attachment_name: last_attachment_name,
                        status,
                        progress_percentage,
                        updated_at: ts,
                    },
                );
            }
            None => {
                let last_page_id = last_processed_page_id
                    .map(PageId::new)
                    .transpose()
                    .map_err(StorageError::IllegalTransition)?;
                let last_attachment_name = last_processed_attachment_name
                    .map(AttachmentName::new)
                    .transpose()
                    .map_err(StorageError::IllegalTransition)?;
                checkpoints.insert(
                    key,
                    ScanCheckpoint {
                        scan_id: scan_id.clone(),
                        space_key: space_key.clone(),
                        last_processed_page_id: last_page_id,
                        last_processed_attachment_name: last_attachment_name,
                        status,
                        progress_percentage,
                        updated_at: ts,
                    },
                );
            }
        }
        Ok(())
    }

    async fn find_by(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(&(scan_id.clone(), space_key.clone()))
            .cloned())
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| &c.scan_id == scan_id)
            .cloned()
            .collect())
    }

    async fn find_by_space(&self, space_key: &SpaceKey) -> StorageResult<Vec<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| &c.space_key == space_key)
            .cloned()
            .collect())
    }

    async fn find_latest_by_space(
        &self,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| &c.space_key == space_key)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn find_running(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| &c.scan_id == scan_id && c.status == ScanStatus::Running)
            .cloned()
            .collect())
    }

    async fn find_all_running(&self) -> StorageResult<Vec<ScanCheckpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| c.status == ScanStatus::Running)
            .cloned()
            .collect())
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()> {
        self.checkpoints
            .write()
            .await
            .retain(|key, _| &key.0 != scan_id);
        Ok(())
    }

    async fn delete_active(&self) -> StorageResult<()> {
        self.checkpoints
            .write()
            .await
            .retain(|_, c| c.status.is_terminal());
        Ok(())
    }

    async fn delete_active_for_spaces(&self, space_keys: &[SpaceKey]) -> StorageResult<()> {
        self.checkpoints.write().await.retain(|key, c| {
            !(space_keys.contains(&key.1) && !c.status.is_terminal())
        });
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        self.checkpoints.write().await.clear();
        Ok(())
    }
}

#[async_trait]
impl SeverityCounterStore for MemoryBackend {
    async fn increment(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        delta_high: u64,
        delta_medium: u64,
        delta_low: u64,
    ) -> StorageResult<()> {
        let mut counters = self.counters.write().await;
        let entry = counters
            .entry((scan_id.clone(), space_key.clone()))
            .or_default();
        entry.high += delta_high;
        entry.medium += delta_medium;
        entry.low += delta_low;
        Ok(())
    }

    async fn get(&self, scan_id: &ScanId, space_key: &SpaceKey) -> StorageResult<SeverityCount> {
        Ok(self
            .counters
            .read()
            .await
            .get(&(scan_id.clone(), space_key.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn list_by_scan(
        &self,
        scan_id: &ScanId,
    ) -> StorageResult<Vec<(SpaceKey, SeverityCount)>> {
        Ok(self
            .counters
            .read()
            .await
            .iter()
            .filter(|(key, _)| &key.0 == scan_id)
            .map(|(key, count)| (key.1.clone(), *count))
            .collect())
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()> {
        self.counters.write().await.retain(|key, _| &key.0 != scan_id);
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        self.counters.write().await.clear();
        Ok(())
    }
}

#[async_trait]
impl AuditRecordStore for MemoryBackend {
    async fn append(&self, record: &AuditRecord) -> StorageResult<()> {
        let mut record = record.clone();
        record.id = Some(self.next_audit_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.audit.write().await.push(record);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let mut audit = self.audit.write().await;
        let before = audit.len();
        audit.retain(|r| r.retention_until >= now);
        Ok((before - audit.len()) as u64)
    }
}

#[async_trait]
impl TransactionalStore for MemoryBackend {
    // Uses the default sequential-write implementation: each of the three
    // writes below takes its own lock briefly and there is no other writer
    // interleaved between them within a single `commit_item` call.
}

#[cfg(test)]
mod tests {
    use super::*;
    use pii_types::{ScanEventPayload, SeverityCount};

    fn scan_id() -> ScanId {
        ScanId::new("scan-1").unwrap()
    }

    fn space_key() -> SpaceKey {
        SpaceKey::new("ENGINEERING").unwrap()
    }

    fn sample_event(seq: u64) -> ScanEvent {
        ScanEvent {
            scan_id: scan_id(),
            event_seq: seq,
            space_key: Some(space_key()),
            ts: Utc::now(),
            page_id: None,
            page_title: None,
            attachment_name: None,
            attachment_type: None,
            payload: ScanEventPayload::SpaceStart,
        }
    }

    #[tokio::test]
    async fn append_and_max_seq_roundtrip() {
        let backend = MemoryBackend::new();
        backend.append(&sample_event(1)).await.unwrap();
        backend.append(&sample_event(2)).await.unwrap();
        assert_eq!(backend.max_seq(&scan_id()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn append_rejects_non_monotonic_seq() {
        let backend = MemoryBackend::new();
        backend.append(&sample_event(2)).await.unwrap();
        assert!(backend.append(&sample_event(2)).await.is_err());
        assert!(backend.append(&sample_event(1)).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_sequence_assignment_never_collides() {
        let backend = MemoryBackend::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let guard = backend.lock_sequence(&scan_id()).await;
                let seq = backend.max_seq(&scan_id()).await.unwrap() + 1;
                let mut event = sample_event(seq);
                event.scan_id = scan_id();
                backend.append(&event).await.unwrap();
                drop(guard);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(backend.max_seq(&scan_id()).await.unwrap(), 50);
        assert_eq!(backend.event_count().await, 50);
    }

    #[tokio::test]
    async fn checkpoint_upsert_preserves_last_processed_on_none() {
        let backend = MemoryBackend::new();
        backend
            .upsert(
                &scan_id(),
                &space_key(),
                Some("p1"),
                None,
                ScanStatus::Running,
                10.0,
                Utc::now(),
            )
            .await
            .unwrap();
        backend
            .upsert(
                &scan_id(),
                &space_key(),
                None,
                None,
                ScanStatus::Running,
                20.0,
                Utc::now(),
            )
            .await
            .unwrap();
        let checkpoint = backend.find_by(&scan_id(), &space_key()).await.unwrap().unwrap();
        assert_eq!(checkpoint.last_processed_page_id.unwrap().as_str(), "p1");
        assert_eq!(checkpoint.progress_percentage, 20.0);
    }

    #[tokio::test]
    async fn checkpoint_rejects_illegal_transition() {
        let backend = MemoryBackend::new();
        backend
            .upsert(
                &scan_id(),
                &space_key(),
                None,
                None,
                ScanStatus::Completed,
                100.0,
                Utc::now(),
            )
            .await
            .unwrap();
        let result = backend
            .upsert(
                &scan_id(),
                &space_key(),
                None,
                None,
                ScanStatus::Running,
                0.0,
                Utc::now(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn severity_counters_accumulate() {
        let backend = MemoryBackend::new();
        backend.increment(&scan_id(), &space_key(), 1, 0, 0).await.unwrap();
        backend.increment(&scan_id(), &space_key(), 0, 0, 2).await.unwrap();
        let count = backend.get(&scan_id(), &space_key()).await.unwrap();
        assert_eq!(count, SeverityCount { high: 1, medium: 0, low: 2 });
    }

    #[tokio::test]
    async fn delete_all_counters_clears_every_scan() {
        let backend = MemoryBackend::new();
        backend.increment(&scan_id(), &space_key(), 1, 0, 0).await.unwrap();
        backend
            .increment(&ScanId::new("scan-2").unwrap(), &space_key(), 0, 1, 0)
            .await
            .unwrap();
        backend.delete_all().await.unwrap();
        assert_eq!(
            backend.get(&scan_id(), &space_key()).await.unwrap(),
            SeverityCount::default()
        );
        assert_eq!(
            backend
                .get(&ScanId::new("scan-2").unwrap(), &space_key())
                .await
                .unwrap(),
            SeverityCount::default()
        );
    }

    #[tokio::test]
    async fn delete_all_checkpoints_clears_every_status() {
        let backend = MemoryBackend::new();
        backend
            .upsert(&scan_id(), &space_key(), Some("p1"), None, ScanStatus::Running, 10.0, Utc::now())
            .await
            .unwrap();
        backend
            .upsert(&scan_id(), &space_key(), Some("p1"), None, ScanStatus::Completed, 100.0, Utc::now())
            .await
            .unwrap();
        backend.delete_all().await.unwrap();
        assert!(backend.find_by(&scan_id(), &space_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let backend = MemoryBackend::new();
        backend.append(&sample_event(1)).await.unwrap();
        backend.increment(&scan_id(), &space_key(), 1, 0, 0).await.unwrap();
        backend.clear().await;
        assert_eq!(backend.event_count().await, 0);
        assert_eq!(
            backend.get(&scan_id(), &space_key()).await.unwrap(),
            SeverityCount::default()
        );
    }

    #[tokio::test]
    async fn audit_purge_removes_expired_only() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend
            .append(&AuditRecord {
                id: None,
                scan_id: scan_id(),
                space_key: Some(space_key()),
                page_id: None,
                accessed_at: now,
                retention_until: now - chrono::Duration::days(1),
                purpose: "review".to_string(),
                pii_entities_count: 2,
            })
            .await
            .unwrap();
        backend
            .append(&AuditRecord {
                id: None,
                scan_id: scan_id(),
                space_key: Some(space_key()),
                page_id: None,
                accessed_at: now,
                retention_until: now + chrono::Duration::days(30),
                purpose: "review".to_string(),
                pii_entities_count: 1,
            })
            .await
            .unwrap();
        let purged = backend.purge_expired(now).await.unwrap();
        assert_eq!(purged, 1);
    }
}

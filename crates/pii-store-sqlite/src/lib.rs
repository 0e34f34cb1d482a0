#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-store-sqlite** – SQLite-based persistent storage driver for the PII
//! scan engine.
//!
//! Provides a single durable backend for the event log, checkpoints,
//! severity counters, and audit records, using `sqlx` over SQLite with
//! `STRICT` tables. [`SqliteBackend::commit_item`] writes an event, its
//! checkpoint, and its counter deltas inside one transaction, which is the
//! atomicity the scan orchestrator relies on for each processed item.

use std::path::Path;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::OwnedMutexGuard;

use pii_store_core::{
    AuditRecordStore, CheckpointStore, EventKindFilter, EventStore, ScanSeqLocks,
    SeverityCounterStore, StorageError, StorageResult, TransactionalStore,
};
use pii_types::{
    AttachmentName, AuditRecord, EventType, PageId, ScanCheckpoint, ScanEvent, ScanEventPayload,
    ScanId, ScanStatus, SeverityCount, SpaceKey,
};

/// A durable storage backend using a SQLite database via `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    seq_locks: Arc<ScanSeqLocks>,
}

impl SqliteBackend {
    /// Open or create a SQLite database at `path`, running migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await?;
        Self::from_pool(pool).await
    }

    /// Open an in-memory SQLite database, useful for tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing connection pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let backend = Self {
            pool,
            seq_locks: Arc::new(ScanSeqLocks::new()),
        };
        backend.migrate().await?;
        Ok(backend)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_events (
                scan_id TEXT NOT NULL,
                event_seq INTEGER NOT NULL,
                space_key TEXT,
                event_type TEXT NOT NULL,
                ts TEXT NOT NULL,
                page_id TEXT,
                page_title TEXT,
                attachment_name TEXT,
                attachment_type TEXT,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (scan_id, event_seq)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_scan_space ON scan_events(scan_id, space_key)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_checkpoints (
                scan_id TEXT NOT NULL,
                space_key TEXT NOT NULL,
                last_processed_page_id TEXT,
                last_processed_attachment_name TEXT,
                status TEXT NOT NULL,
                progress_percentage REAL NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scan_id, space_key)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_space ON scan_checkpoints(space_key)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS severity_counters (
                scan_id TEXT NOT NULL,
                space_key TEXT NOT NULL,
                high INTEGER NOT NULL DEFAULT 0,
                medium INTEGER NOT NULL DEFAULT 0,
                low INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scan_id, space_key)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL,
                space_key TEXT,
                page_id TEXT,
                accessed_at TEXT NOT NULL,
                retention_until TEXT NOT NULL,
                purpose TEXT NOT NULL,
                pii_entities_count INTEGER NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_retention ON audit_records(retention_until)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically persist `event`, upsert its checkpoint, and add the
    /// severity deltas — the single transaction the scan orchestrator
    /// depends on for each processed item (see `pii-orchestrator`).
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_item(
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
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        insert_event(&mut tx, event).await?;
        upsert_checkpoint_tx(
            &mut tx,
            &event.scan_id,
            space_key,
            last_processed_page_id,
            last_processed_attachment_name,
            status,
            progress_percentage,
            event.ts,
        )
        .await?;
        increment_tx(
            &mut tx,
            &event.scan_id,
            space_key,
            delta_high,
            delta_medium,
            delta_low,
        )
        .await?;

        tx.commit().await.map_err(sqlx_err)
    }

    /// Total number of events stored across all scans.
    pub async fn event_count(&self) -> StorageResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM scan_events")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(row.get("count"))
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TransactionalStore for SqliteBackend {
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
        SqliteBackend::commit_item(
            self,
            event,
            space_key,
            last_processed_page_id,
            last_processed_attachment_name,
            status,
            progress_percentage,
            delta_high,
            delta_medium,
            delta_low,
        )
        .await
    }
}

fn sqlx_err(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn event_type_str(kind: EventType) -> &'static str {
    match kind {
        EventType::Start => "START",
        EventType::SpaceStart => "SPACE_START",
        EventType::Item => "ITEM",
        EventType::AttachmentItem => "ATTACHMENT_ITEM",
        EventType::Progress => "PROGRESS",
        EventType::SpaceComplete => "SPACE_COMPLETE",
        EventType::Complete => "COMPLETE",
        EventType::Error => "ERROR",
        EventType::Paused => "PAUSED",
        EventType::Resumed => "RESUMED",
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &ScanEvent,
) -> StorageResult<()> {
    let payload_json =
        serde_json::to_string(&event.payload).map_err(|e| StorageError::Serialization(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO scan_events
            (scan_id, event_seq, space_key, event_type, ts, page_id, page_title,
             attachment_name, attachment_type, payload_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.scan_id.as_str())
    .bind(event.event_seq as i64)
    .bind(event.space_key.as_ref().map(SpaceKey::as_str))
    .bind(event_type_str(event.event_type()))
    .bind(event.ts.to_rfc3339())
    .bind(event.page_id.as_ref().map(PageId::as_str))
    .bind(event.page_title.as_deref())
    .bind(event.attachment_name.as_ref().map(AttachmentName::as_str))
    .bind(event.attachment_type.as_deref())
    .bind(payload_json)
    .execute(&mut **tx)
    .await
    .map_err(sqlx_err)?;
    Ok(())
}

fn status_str(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Running => "RUNNING",
        ScanStatus::Paused => "PAUSED",
        ScanStatus::Completed => "COMPLETED",
        ScanStatus::Failed => "FAILED",
    }
}

fn parse_status(raw: &str) -> StorageResult<ScanStatus> {
    match raw {
        "RUNNING" => Ok(ScanStatus::Running),
        "PAUSED" => Ok(ScanStatus::Paused),
        "COMPLETED" => Ok(ScanStatus::Completed),
        "FAILED" => Ok(ScanStatus::Failed),
        other => Err(StorageError::Backend(format!("unknown status {other}"))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn upsert_checkpoint_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    scan_id: &ScanId,
    space_key: &SpaceKey,
    last_processed_page_id: Option<&str>,
    last_processed_attachment_name: Option<&str>,
    status: ScanStatus,
    progress_percentage: f32,
    ts: DateTime<Utc>,
) -> StorageResult<()> {
    let existing = sqlx::query(
        "SELECT last_processed_page_id, last_processed_attachment_name, status \
         FROM scan_checkpoints WHERE scan_id = ? AND space_key = ?",
    )
    .bind(scan_id.as_str())
    .bind(space_key.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(sqlx_err)?;

    let (merged_page_id, merged_attachment_name) = match &existing {
        Some(row) => {
            let prior_page_id: Option<String> = row.get("last_processed_page_id");
            let prior_attachment: Option<String> = row.get("last_processed_attachment_name");
            let prior_status: String = row.get("status");
            parse_status(&prior_status)?.validate_transition(status)?;
            (
                last_processed_page_id
                    .map(str::to_string)
                    .or(prior_page_id),
                last_processed_attachment_name
                    .map(str::to_string)
                    .or(prior_attachment),
            )
        }
        None => (
            last_processed_page_id.map(str::to_string),
            last_processed_attachment_name.map(str::to_string),
        ),
    };

    sqlx::query(
        r#"
        INSERT INTO scan_checkpoints
            (scan_id, space_key, last_processed_page_id, last_processed_attachment_name,
             status, progress_percentage, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(scan_id, space_key) DO UPDATE SET
            last_processed_page_id = excluded.last_processed_page_id,
            last_processed_attachment_name = excluded.last_processed_attachment_name,
            status = excluded.status,
            progress_percentage = excluded.progress_percentage,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(scan_id.as_str())
    .bind(space_key.as_str())
    .bind(merged_page_id)
    .bind(merged_attachment_name)
    .bind(status_str(status))
    .bind(progress_percentage)
    .bind(ts.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(sqlx_err)?;

    Ok(())
}

async fn increment_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    scan_id: &ScanId,
    space_key: &SpaceKey,
    delta_high: u64,
    delta_medium: u64,
    delta_low: u64,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO severity_counters (scan_id, space_key, high, medium, low)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(scan_id, space_key) DO UPDATE SET
            high = high + excluded.high,
            medium = medium + excluded.medium,
            low = low + excluded.low
        "#,
    )
    .bind(scan_id.as_str())
    .bind(space_key.as_str())
    .bind(delta_high as i64)
    .bind(delta_medium as i64)
    .bind(delta_low as i64)
    .execute(&mut **tx)
    .await
    .map_err(sqlx_err)?;
    Ok(())
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ScanEvent> {
    let scan_id_raw: String = row.get("scan_id");
    let event_seq: i64 = row.get("event_seq");
    let space_key_raw: Option<String> = row.get("space_key");
    let ts_raw: String = row.get("ts");
    let page_id_raw: Option<String> = row.get("page_id");
    let page_title: Option<String> = row.get("page_title");
    let attachment_name_raw: Option<String> = row.get("attachment_name");
    let attachment_type: Option<String> = row.get("attachment_type");
    let payload_json: String = row.get("payload_json");

    let scan_id = ScanId::new(scan_id_raw).map_err(StorageError::IllegalTransition)?;
    let space_key = space_key_raw
        .map(SpaceKey::new)
        .transpose()
        .map_err(StorageError::IllegalTransition)?;
    let page_id = page_id_raw
        .map(PageId::new)
        .transpose()
        .map_err(StorageError::IllegalTransition)?;
    let attachment_name = attachment_name_raw
        .map(AttachmentName::new)
        .transpose()
        .map_err(StorageError::IllegalTransition)?;
    let ts = DateTime::parse_from_rfc3339(&ts_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap());
    let payload: ScanEventPayload =
        serde_json::from_str(&payload_json).map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(ScanEvent {
        scan_id,
        event_seq: event_seq as u64,
        space_key,
        ts,
        page_id,
        page_title,
        attachment_name,
        attachment_type,
        payload,
    })
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> StorageResult<ScanCheckpoint> {
    let scan_id: String = row.get("scan_id");
    let space_key: String = row.get("space_key");
    let last_processed_page_id: Option<String> = row.get("last_processed_page_id");
    let last_processed_attachment_name: Option<String> = row.get("last_processed_attachment_name");
    let status: String = row.get("status");
    let progress_percentage: f64 = row.get("progress_percentage");
    let updated_at: String = row.get("updated_at");

    Ok(ScanCheckpoint {
        scan_id: ScanId::new(scan_id).map_err(StorageError::IllegalTransition)?,
        space_key: SpaceKey::new(space_key).map_err(StorageError::IllegalTransition)?,
        last_processed_page_id: last_processed_page_id
            .map(PageId::new)
            .transpose()
            .map_err(StorageError::IllegalTransition)?,
        last_processed_attachment_name: last_processed_attachment_name
            .map(AttachmentName::new)
            .transpose()
            .map_err(StorageError::IllegalTransition)?,
        status: parse_status(&status)?,
        progress_percentage: progress_percentage as f32,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap()),
    })
}

#[async_trait]
impl EventStore for SqliteBackend {
    async fn append(&self, event: &ScanEvent) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        insert_event(&mut tx, event).await?;
        tx.commit().await.map_err(sqlx_err)
    }

    async fn max_seq(&self, scan_id: &ScanId) -> StorageResult<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(event_seq), 0) AS max_seq FROM scan_events WHERE scan_id = ?",
        )
        .bind(scan_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;
        let max_seq: i64 = row.get("max_seq");
        Ok(max_seq as u64)
    }

    async fn lock_sequence(&self, scan_id: &ScanId) -> OwnedMutexGuard<()> {
        self.seq_locks.acquire(scan_id).await
    }

    async fn list_items(
        &self,
        scan_id: &ScanId,
        filter: EventKindFilter,
    ) -> StorageResult<Vec<ScanEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM scan_events WHERE scan_id = ? ORDER BY event_seq ASC",
        )
        .bind(scan_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.iter()
            .map(row_to_event)
            .collect::<StorageResult<Vec<_>>>()
            .map(|events| {
                events
                    .into_iter()
                    .filter(|e| filter.matches(e.event_type()))
                    .collect()
            })
    }

    async fn list_for_export(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Vec<ScanEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM scan_events WHERE scan_id = ? AND space_key = ? ORDER BY event_seq ASC",
        )
        .bind(scan_id.as_str())
        .bind(space_key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn delete_all(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM scan_events")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteBackend {
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
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        upsert_checkpoint_tx(
            &mut tx,
            scan_id,
            space_key,
            last_processed_page_id,
            last_processed_attachment_name,
            status,
            progress_percentage,
            ts,
        )
        .await?;
        tx.commit().await.map_err(sqlx_err)
    }

    async fn find_by(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>> {
        let row = sqlx::query(
            "SELECT * FROM scan_checkpoints WHERE scan_id = ? AND space_key = ?",
        )
        .bind(scan_id.as_str())
        .bind(space_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>> {
        let rows = sqlx::query("SELECT * FROM scan_checkpoints WHERE scan_id = ?")
            .bind(scan_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn find_by_space(&self, space_key: &SpaceKey) -> StorageResult<Vec<ScanCheckpoint>> {
        let rows = sqlx::query("SELECT * FROM scan_checkpoints WHERE space_key = ?")
            .bind(space_key.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn find_latest_by_space(
        &self,
        space_key: &SpaceKey,
    ) -> StorageResult<Option<ScanCheckpoint>> {
        let row = sqlx::query(
            "SELECT * FROM scan_checkpoints WHERE space_key = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(space_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn find_running(&self, scan_id: &ScanId) -> StorageResult<Vec<ScanCheckpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM scan_checkpoints WHERE scan_id = ? AND status = 'RUNNING'",
        )
        .bind(scan_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn find_all_running(&self) -> StorageResult<Vec<ScanCheckpoint>> {
        let rows = sqlx::query("SELECT * FROM scan_checkpoints WHERE status = 'RUNNING'")
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(row_to_checkpoint).collect()
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()> {
        sqlx::query("DELETE FROM scan_checkpoints WHERE scan_id = ?")
            .bind(scan_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn delete_active(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM scan_checkpoints WHERE status IN ('RUNNING', 'PAUSED')")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn delete_active_for_spaces(&self, space_keys: &[SpaceKey]) -> StorageResult<()> {
        if space_keys.is_empty() {
            return Ok(());
        }
        let placeholders = std::iter::repeat("?")
            .take(space_keys.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DELETE FROM scan_checkpoints WHERE status IN ('RUNNING', 'PAUSED') AND space_key IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for key in space_keys {
            query = query.bind(key.as_str());
        }
        query.execute(&self.pool).await.map_err(sqlx_err)?;
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM scan_checkpoints")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl SeverityCounterStore for SqliteBackend {
    async fn increment(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        delta_high: u64,
        delta_medium: u64,
        delta_low: u64,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        increment_tx(&mut tx, scan_id, space_key, delta_high, delta_medium, delta_low).await?;
        tx.commit().await.map_err(sqlx_err)
    }

    async fn get(&self, scan_id: &ScanId, space_key: &SpaceKey) -> StorageResult<SeverityCount> {
        let row = sqlx::query(
            "SELECT high, medium, low FROM severity_counters WHERE scan_id = ? AND space_key = ?",
        )
        .bind(scan_id.as_str())
        .bind(space_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(match row {
            Some(row) => SeverityCount {
                high: row.get::<i64, _>("high") as u64,
                medium: row.get::<i64, _>("medium") as u64,
                low: row.get::<i64, _>("low") as u64,
            },
            None => SeverityCount::default(),
        })
    }

    async fn list_by_scan(
        &self,
        scan_id: &ScanId,
    ) -> StorageResult<Vec<(SpaceKey, SeverityCount)>> {
        let rows = sqlx::query(
            "SELECT space_key, high, medium, low FROM severity_counters WHERE scan_id = ?",
        )
        .bind(scan_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.iter()
            .map(|row| {
                let space_key: String = row.get("space_key");
                Ok((
                    SpaceKey::new(space_key).map_err(StorageError::IllegalTransition)?,
                    SeverityCount {
                        high: row.get::<i64, _>("high") as u64,
                        medium: row.get::<i64, _>("medium") as u64,
                        low: row.get::<i64, _>("low") as u64,
                    },
                ))
            })
            .collect()
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> StorageResult<()> {
        sqlx::query("DELETE FROM severity_counters WHERE scan_id = ?")
            .bind(scan_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM severity_counters")
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl AuditRecordStore for SqliteBackend {
    async fn append(&self, record: &AuditRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_records
                (scan_id, space_key, page_id, accessed_at, retention_until, purpose, pii_entities_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.scan_id.as_str())
        .bind(record.space_key.as_ref().map(SpaceKey::as_str))
        .bind(record.page_id.as_ref().map(PageId::as_str))
        .bind(record.accessed_at.to_rfc3339())
        .bind(record.retention_until.to_rfc3339())
        .bind(&record.purpose)
        .bind(record.pii_entities_count as i64)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM audit_records WHERE retention_until < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pii_types::ScanEventPayload;

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
            page_id: Some(PageId::new("p1").unwrap()),
            page_title: Some("Runbook".to_string()),
            attachment_name: None,
            attachment_type: None,
            payload: ScanEventPayload::Item {
                entities: vec![],
                severity: SeverityCount::default(),
            },
        }
    }

    #[tokio::test]
    async fn append_and_list_items_round_trip() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend.append(&sample_event(1)).await.unwrap();
        let items = backend
            .list_items(&scan_id(), EventKindFilter::Items)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].page_title.as_deref(), Some("Runbook"));
    }

    #[tokio::test]
    async fn max_seq_starts_at_zero() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        assert_eq!(backend.max_seq(&scan_id()).await.unwrap(), 0);
        backend.append(&sample_event(1)).await.unwrap();
        assert_eq!(backend.max_seq(&scan_id()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkpoint_transition_is_validated() {
        let backend = SqliteBackend::in_memory().await.unwrap();
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
    async fn severity_counters_accumulate_atomically() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend.increment(&scan_id(), &space_key(), 1, 0, 0).await.unwrap();
        backend.increment(&scan_id(), &space_key(), 0, 2, 0).await.unwrap();
        let count = backend.get(&scan_id(), &space_key()).await.unwrap();
        assert_eq!(count, SeverityCount { high: 1, medium: 2, low: 0 });
    }

    #[tokio::test]
    async fn delete_all_counters_clears_every_scan() {
        let backend = SqliteBackend::in_memory().await.unwrap();
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
        let backend = SqliteBackend::in_memory().await.unwrap();
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
    async fn commit_item_writes_event_checkpoint_and_counters_together() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend
            .commit_item(
                &sample_event(1),
                &space_key(),
                Some("p1"),
                None,
                ScanStatus::Running,
                50.0,
                0,
                0,
                1,
            )
            .await
            .unwrap();

        assert_eq!(backend.event_count().await.unwrap(), 1);
        let checkpoint = backend.find_by(&scan_id(), &space_key()).await.unwrap().unwrap();
        assert_eq!(checkpoint.progress_percentage, 50.0);
        let count = backend.get(&scan_id(), &space_key()).await.unwrap();
        assert_eq!(count.low, 1);
    }

    #[tokio::test]
    async fn persistence_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let backend = SqliteBackend::open(&db_path).await.unwrap();
            backend.append(&sample_event(1)).await.unwrap();
            backend.close().await;
        }
        {
            let backend = SqliteBackend::open(&db_path).await.unwrap();
            assert_eq!(backend.event_count().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn audit_purge_removes_only_expired() {
        let backend = SqliteBackend::in_memory().await.unwrap();
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
                pii_entities_count: 1,
            })
            .await
            .unwrap();
        let purged = backend.purge_expired(now).await.unwrap();
        assert_eq!(purged, 1);
    }
}

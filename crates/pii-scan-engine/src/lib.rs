#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-scan-engine** – Top-level driver for `startAll`, `resumeAll`,
//! `pause`, `cancel`, and `purgeAll`.
//!
//! This crate owns canonical ordering (spaces, then pages ascending by id,
//! then each page's attachments ascending by name), cooperative
//! cancellation via a [`tokio_util::sync::CancellationToken`] carried end to
//! end through a [`ScanContext`], and the session/phase bookkeeping exposed
//! for status polling. Per-item masking, encryption, and the transactional
//! event/checkpoint/counter write live in `pii-orchestrator`; this crate
//! only decides *which* item to hand it next and *what* to do when an
//! operator asks to pause or cancel.

mod error;
mod session;

pub use error::ScanEngineError;
pub use session::{ScanPhase, SessionState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use pii_attachment_processor::AttachmentProcessor;
use pii_bus::EventBus;
use pii_content_accessor::{AttachmentInfo, CachingContentAccessor, Page, Space};
use pii_crypto::CryptoService;
use pii_detection_client::DetectionClient;
use pii_orchestrator::{handle_detection, reveal, ScanItem};
use pii_store_core::{
    AuditRecordStore, CheckpointStore, EventStore, SeverityCounterStore, TransactionalStore,
};
use pii_types::{
    compute_progress, DetectedEntity, PageId, ScanCheckpoint, ScanEvent, ScanEventPayload, ScanId,
    ScanStatus, SpaceKey,
};

/// Tunables for scan execution, independent of any one `startAll` call.
#[derive(Debug, Clone)]
pub struct ScanEngineConfig {
    /// Confidence threshold passed to every `analyze` call.
    pub default_threshold: f32,
    /// Per-call deadline for the detection engine.
    pub detection_timeout: Duration,
    /// Number of spaces processed concurrently. `1` (the default) processes
    /// spaces strictly one at a time in canonical order.
    pub space_parallelism: usize,
}

impl Default for ScanEngineConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.5,
            detection_timeout: Duration::from_secs(10),
            space_parallelism: 1,
        }
    }
}

/// Caller-supplied parameters for `startAll`. Reserved for future scoping
/// (e.g. restricting to a subset of spaces); empty today because a scan
/// always covers every space visible to the scanning identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartCommand;

/// Why a scan is being cancelled, since the resulting checkpoint transition
/// differs between the two causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// An unrecoverable error drove the cancellation; active checkpoints are
    /// transitioned to `Failed`.
    Error,
    /// The caller disconnected; active checkpoints are left untouched and
    /// are reconciled to `Paused` the next time the engine starts up.
    Disconnect,
}

/// Returned by `startAll`/`resumeAll`: the allocated scan id plus its live
/// event stream, primed with whatever replay the bus already has buffered.
pub struct ScanStream {
    /// The scan this stream belongs to.
    pub scan_id: ScanId,
    /// Buffered events published before this call subscribed.
    pub replay: Vec<ScanEvent>,
    /// Receiver for events published from this point onward.
    pub receiver: broadcast::Receiver<ScanEvent>,
}

/// Cancellation and pause signaling threaded through one scan's execution.
/// Cloned cheaply into every space's processing task.
#[derive(Clone)]
pub struct ScanContext {
    cancellation: CancellationToken,
    pause_requested: Arc<AtomicBool>,
}

impl ScanContext {
    fn fresh() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            pause_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }
}

struct ScanSessionHandle {
    ctx: ScanContext,
    state: Arc<RwLock<SessionState>>,
}

/// One unit of work within a space, in canonical processing order.
enum WorkUnit {
    Page(Page),
    Attachment(Page, AttachmentInfo),
}

impl WorkUnit {
    fn page_id(&self) -> &PageId {
        match self {
            WorkUnit::Page(p) => &p.id,
            WorkUnit::Attachment(p, _) => &p.id,
        }
    }

    fn attachment_name(&self) -> Option<&pii_types::AttachmentName> {
        match self {
            WorkUnit::Page(_) => None,
            WorkUnit::Attachment(_, info) => Some(&info.name),
        }
    }
}

/// Top-level scan driver, generic over the storage backend so callers can
/// wire either `pii-store-memory` (tests) or `pii-store-sqlite`
/// (production) behind the same API.
pub struct ScanEngine<S> {
    store: Arc<S>,
    crypto: Arc<CryptoService>,
    bus: Arc<dyn EventBus>,
    content: Arc<CachingContentAccessor>,
    detection: Arc<DetectionClient>,
    attachments: Arc<AttachmentProcessor>,
    config: ScanEngineConfig,
    sessions: DashMap<ScanId, Arc<ScanSessionHandle>>,
}

impl<S> ScanEngine<S>
where
    S: TransactionalStore + AuditRecordStore + Send + Sync + 'static,
{
    /// Construct an engine from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        crypto: Arc<CryptoService>,
        bus: Arc<dyn EventBus>,
        content: Arc<CachingContentAccessor>,
        detection: Arc<DetectionClient>,
        attachments: Arc<AttachmentProcessor>,
        config: ScanEngineConfig,
    ) -> Self {
        Self {
            store,
            crypto,
            bus,
            content,
            detection,
            attachments,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Startup reconciliation: any checkpoint persisted as `Running` with no
    /// live session in this (freshly started) process is evidence of a
    /// crash or ungraceful shutdown, not of a scan actually in progress.
    /// Transition each to `Paused` so a later `resumeAll` finds a state it
    /// knows how to resume from, instead of failing with `IllegalTransition`
    /// the first time someone tries. Callers run this once, before serving
    /// any new scan traffic.
    pub async fn reconcile_startup(&self) -> Result<u64, ScanEngineError> {
        reconcile_startup_checkpoints(&*self.store).await
    }

    /// In-memory snapshot of a scan's progress, if it has an active session
    /// in this process.
    pub async fn session_state(&self, scan_id: &ScanId) -> Option<SessionState> {
        let handle = self.sessions.get(scan_id)?;
        Some(handle.state.read().await.clone())
    }

    /// Scan ids with a live session in this process.
    pub fn active_scans(&self) -> Vec<ScanId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Discover every visible space and begin processing it from scratch,
    /// in ascending space-key order.
    pub async fn start_all(
        self: &Arc<Self>,
        _command: StartCommand,
    ) -> Result<ScanStream, ScanEngineError> {
        let scan_id = ScanId::new(Uuid::new_v4().to_string())?;

        let mut spaces = self.content.list_spaces().await?;
        spaces.sort_by(|a, b| a.key.cmp(&b.key));

        let ctx = ScanContext::fresh();
        let state = Arc::new(RwLock::new(SessionState {
            scan_id: scan_id.clone(),
            started_at: Utc::now(),
            phase: ScanPhase::Initializing,
            progress: 0.0,
            error: None,
        }));
        self.sessions.insert(
            scan_id.clone(),
            Arc::new(ScanSessionHandle {
                ctx: ctx.clone(),
                state: state.clone(),
            }),
        );

        let (replay, receiver) = self.bus.subscribe(&scan_id);

        self.emit_event(
            &scan_id,
            None,
            ScanEventPayload::Start {
                spaces_count: spaces.len() as u32,
            },
        )
        .await?;

        let plan: Vec<(Space, Option<ScanCheckpoint>)> =
            spaces.into_iter().map(|space| (space, None)).collect();

        let engine = Arc::clone(self);
        let run_scan_id = scan_id.clone();
        tokio::spawn(async move {
            engine.drive(run_scan_id, ctx, state, plan).await;
        });

        Ok(ScanStream {
            scan_id,
            replay,
            receiver,
        })
    }

    /// Resume a previously paused (or interrupted) scan from its durable
    /// checkpoints, skipping spaces already `Completed`.
    pub async fn resume_all(self: &Arc<Self>, scan_id: ScanId) -> Result<ScanStream, ScanEngineError> {
        let checkpoints = self.store.find_by_scan(&scan_id).await?;
        if checkpoints.is_empty() {
            return Err(ScanEngineError::ScanNotFound(scan_id.to_string()));
        }

        let mut resumable: Vec<ScanCheckpoint> = checkpoints
            .into_iter()
            .filter(|c| !c.status.is_terminal())
            .collect();
        resumable.sort_by(|a, b| a.space_key.cmp(&b.space_key));

        let ctx = ScanContext::fresh();
        let state = Arc::new(RwLock::new(SessionState {
            scan_id: scan_id.clone(),
            started_at: Utc::now(),
            phase: ScanPhase::Initializing,
            progress: 0.0,
            error: None,
        }));
        self.sessions.insert(
            scan_id.clone(),
            Arc::new(ScanSessionHandle {
                ctx: ctx.clone(),
                state: state.clone(),
            }),
        );

        let (replay, receiver) = self.bus.subscribe(&scan_id);

        self.emit_event(&scan_id, None, ScanEventPayload::Resumed).await?;

        let mut plan = Vec::with_capacity(resumable.len());
        for checkpoint in resumable {
            let space = self.content.get_space(&checkpoint.space_key).await?;
            plan.push((space, Some(checkpoint)));
        }

        let engine = Arc::clone(self);
        let run_scan_id = scan_id.clone();
        tokio::spawn(async move {
            engine.drive(run_scan_id, ctx, state, plan).await;
        });

        Ok(ScanStream {
            scan_id,
            replay,
            receiver,
        })
    }

    /// Request a pause: the in-flight producer stops cooperatively at the
    /// next safe point (a completed item), its checkpoint transitions to
    /// `Paused`. If no session is active in this process (e.g. after a
    /// restart), any `Running` checkpoints are transitioned directly.
    pub async fn pause(&self, scan_id: &ScanId) -> Result<(), ScanEngineError> {
        if let Some(handle) = self.sessions.get(scan_id) {
            handle.ctx.pause_requested.store(true, Ordering::SeqCst);
        }
        for checkpoint in self.store.find_running(scan_id).await? {
            self.store
                .upsert(
                    scan_id,
                    &checkpoint.space_key,
                    None,
                    None,
                    ScanStatus::Paused,
                    checkpoint.progress_percentage,
                    Utc::now(),
                )
                .await?;
        }
        self.emit_event(scan_id, None, ScanEventPayload::Paused).await?;
        Ok(())
    }

    /// Cancel a scan. Logically a pause followed by a `Failed` transition
    /// when `reason` is [`CancelReason::Error`]; a clean stop with no
    /// checkpoint transition when the caller disconnected, relying on the
    /// orphaned-`Running`-checkpoint reconciliation performed at startup.
    pub async fn cancel(&self, scan_id: &ScanId, reason: CancelReason) -> Result<(), ScanEngineError> {
        if let Some(handle) = self.sessions.get(scan_id) {
            handle.ctx.cancellation.cancel();
        }
        if reason == CancelReason::Error {
            for checkpoint in self.store.find_running(scan_id).await? {
                self.store
                    .upsert(
                        scan_id,
                        &checkpoint.space_key,
                        None,
                        None,
                        ScanStatus::Failed,
                        checkpoint.progress_percentage,
                        Utc::now(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Purge every prior scan's events, checkpoints, and counters, and close
    /// any active session's bus channel. Irreversible.
    pub async fn purge_all(&self) -> Result<(), ScanEngineError> {
        for entry in self.sessions.iter() {
            entry.value().ctx.cancellation.cancel();
            self.bus.close(entry.key());
        }
        self.sessions.clear();
        EventStore::delete_all(&*self.store).await?;
        CheckpointStore::delete_all(&*self.store).await?;
        SeverityCounterStore::delete_all(&*self.store).await?;
        Ok(())
    }

    /// Decrypt a page's persisted entities and record the reveal, delegating
    /// to [`pii_orchestrator::reveal`].
    pub async fn reveal(
        &self,
        scan_id: &ScanId,
        page_id: &PageId,
        purpose: impl Into<String>,
        retention: chrono::Duration,
    ) -> Result<Vec<DetectedEntity>, ScanEngineError> {
        Ok(reveal(&*self.store, &self.crypto, scan_id, page_id, purpose, retention).await?)
    }

    /// Drive one scan to completion or an early stop, across every planned
    /// space in order.
    async fn drive(
        self: Arc<Self>,
        scan_id: ScanId,
        ctx: ScanContext,
        state: Arc<RwLock<SessionState>>,
        plan: Vec<(Space, Option<ScanCheckpoint>)>,
    ) {
        {
            let mut s = state.write().await;
            s.phase = ScanPhase::Running;
        }

        let space_count = plan.len().max(1) as u64;
        for (index, (space, checkpoint)) in plan.into_iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            if let Err(e) = self.process_space(&scan_id, &ctx, &space, checkpoint).await {
                warn!(scan_id = %scan_id, space = %space.key, error = %e, "space processing aborted");
                let mut s = state.write().await;
                s.phase = ScanPhase::Failed;
                s.error = Some(e.to_string());
                drop(s);
                let _ = self.cancel(&scan_id, CancelReason::Error).await;
                return;
            }
            let mut s = state.write().await;
            s.progress = compute_progress((index + 1) as u64, space_count);
        }

        let mut s = state.write().await;
        if ctx.is_pause_requested() {
            s.phase = ScanPhase::Paused;
            return;
        }
        if ctx.is_cancelled() {
            return;
        }

        s.phase = ScanPhase::Completed;
        s.progress = 100.0;
        drop(s);

        if let Err(e) = self
            .emit_event(&scan_id, None, ScanEventPayload::Complete { success: true })
            .await
        {
            warn!(scan_id = %scan_id, error = %e, "failed to publish scan completion event");
        }
        info!(scan_id = %scan_id, "scan completed");
    }

    /// Process one space: build the canonical unit list, skip the prefix
    /// already covered by `resume_from` if resuming, then run detection and
    /// commit every remaining unit in order.
    async fn process_space(
        &self,
        scan_id: &ScanId,
        ctx: &ScanContext,
        space: &Space,
        resume_from: Option<ScanCheckpoint>,
    ) -> Result<(), ScanEngineError> {
        let mut pages = self.content.list_pages(&space.key).await?;
        pages.sort_by(|a, b| a.id.cmp(&b.id));

        let mut units = Vec::new();
        for page in pages {
            let mut attachments = self.content.list_attachments(&page.id).await?;
            attachments.sort_by(|a, b| a.name.cmp(&b.name));
            units.push(WorkUnit::Page(page.clone()));
            for info in attachments {
                units.push(WorkUnit::Attachment(page.clone(), info));
            }
        }

        let total = units.len() as u64;
        let analyzed_offset = match &resume_from {
            None => {
                self.emit_event(scan_id, Some(space.key.clone()), ScanEventPayload::SpaceStart)
                    .await?;
                0
            }
            Some(checkpoint) => resume_offset(&units, checkpoint),
        };

        for (index, unit) in units.iter().enumerate().skip(analyzed_offset as usize) {
            if ctx.is_cancelled() {
                return Ok(());
            }
            if ctx.is_pause_requested() {
                let progress = compute_progress(index as u64, total);
                self.store
                    .upsert(
                        scan_id,
                        &space.key,
                        Some(unit.page_id().as_str()),
                        unit.attachment_name().map(|n| n.as_str()),
                        ScanStatus::Paused,
                        progress,
                        Utc::now(),
                    )
                    .await?;
                return Ok(());
            }

            let processed = index as u64 + 1;
            let progress = compute_progress(processed, total);
            let status = if processed == total {
                ScanStatus::Completed
            } else {
                ScanStatus::Running
            };

            if let Err(e) = self.process_unit(scan_id, space, unit, status, progress).await {
                warn!(scan_id = %scan_id, page = %unit.page_id(), error = %e, "item processing failed, recording and continuing");
                self.emit_event(
                    scan_id,
                    Some(space.key.clone()),
                    ScanEventPayload::Error {
                        message: e.to_string(),
                    },
                )
                .await?;
            }
        }

        if !ctx.is_cancelled() && !ctx.is_pause_requested() {
            self.emit_event(
                scan_id,
                Some(space.key.clone()),
                ScanEventPayload::SpaceComplete {
                    percentage: 100.0,
                    error: None,
                },
            )
            .await?;
        }

        Ok(())
    }

    async fn process_unit(
        &self,
        scan_id: &ScanId,
        space: &Space,
        unit: &WorkUnit,
        status: ScanStatus,
        progress: f32,
    ) -> Result<(), ScanEngineError> {
        match unit {
            WorkUnit::Page(page) => {
                let outcome = self
                    .detection
                    .analyze(&page.body, self.config.default_threshold, self.config.detection_timeout)
                    .await?;
                let item = ScanItem::Page {
                    page_id: page.id.clone(),
                    page_title: page.title.clone(),
                };
                handle_detection(
                    &*self.store,
                    &self.crypto,
                    &*self.bus,
                    scan_id,
                    &space.key,
                    &item,
                    &page.body,
                    &outcome,
                    status,
                    progress,
                )
                .await?;
            }
            WorkUnit::Attachment(page, info) => {
                let bytes = self.content.download_attachment(&page.id, &info.name).await?;
                let extracted = self.attachments.process(info, &bytes).await?;
                let text = extracted.unwrap_or_default();
                let outcome = self
                    .detection
                    .analyze(&text, self.config.default_threshold, self.config.detection_timeout)
                    .await?;
                let item = ScanItem::Attachment {
                    page_id: page.id.clone(),
                    page_title: page.title.clone(),
                    attachment_name: info.name.clone(),
                    attachment_type: info.content_type.clone(),
                };
                handle_detection(
                    &*self.store,
                    &self.crypto,
                    &*self.bus,
                    scan_id,
                    &space.key,
                    &item,
                    &text,
                    &outcome,
                    status,
                    progress,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Append and publish a plain marker event (no checkpoint/counter
    /// update), used for `Start`/`SpaceStart`/`Complete`/etc.
    async fn emit_event(
        &self,
        scan_id: &ScanId,
        space_key: Option<SpaceKey>,
        payload: ScanEventPayload,
    ) -> Result<(), ScanEngineError> {
        // Hold the per-scan sequence lock across the max_seq read and the
        // append so a marker event can never collide with another event
        // (e.g. a page result committed through `handle_detection`) racing
        // for the same scan_id.
        let seq_guard = self.store.lock_sequence(scan_id).await;
        let event_seq = self.store.max_seq(scan_id).await? + 1;
        let event = ScanEvent {
            scan_id: scan_id.clone(),
            event_seq,
            space_key,
            ts: Utc::now(),
            page_id: None,
            page_title: None,
            attachment_name: None,
            attachment_type: None,
            payload,
        };
        self.store.append(&event).await?;
        drop(seq_guard);
        self.bus
            .publish(&event)
            .map_err(|e| ScanEngineError::Orchestrator(pii_orchestrator::OrchestratorError::from(e)))?;
        Ok(())
    }
}

/// Transition every cross-scan `Running` checkpoint to `Paused`. Exposed as
/// a free function (not just [`ScanEngine::reconcile_startup`]) so a caller
/// that only holds a store handle — no content accessor, no detection
/// client — can still run it before serving any command that touches
/// checkpoints, which is the realistic entry point for a CLI invocation.
pub async fn reconcile_startup_checkpoints<S: CheckpointStore>(store: &S) -> Result<u64, ScanEngineError> {
    let orphaned = store.find_all_running().await?;
    let mut reconciled = 0u64;
    for checkpoint in &orphaned {
        store
            .upsert(
                &checkpoint.scan_id,
                &checkpoint.space_key,
                None,
                None,
                ScanStatus::Paused,
                checkpoint.progress_percentage,
                Utc::now(),
            )
            .await?;
        reconciled += 1;
    }
    if reconciled > 0 {
        tracing::warn!(count = reconciled, "reconciled orphaned running checkpoints to paused");
    }
    Ok(reconciled)
}

/// Find how many leading units of `units` the checkpoint already covers, by
/// locating the last processed (page, attachment) pair in canonical order.
/// If the content platform's listing has changed since the checkpoint was
/// written and the position can no longer be found, resumes from the start
/// of the space rather than skipping unknown work.
fn resume_offset(units: &[WorkUnit], checkpoint: &ScanCheckpoint) -> u64 {
    let Some(last_page) = &checkpoint.last_processed_page_id else {
        return 0;
    };
    let position = units.iter().position(|unit| match &checkpoint.last_processed_attachment_name {
        Some(name) => unit.page_id() == last_page && unit.attachment_name() == Some(name),
        None => unit.page_id() == last_page && unit.attachment_name().is_none(),
    });
    match position {
        Some(idx) => idx as u64 + 1,
        None => 0,
    }
}

#![forbid(unsafe_code)]

//! **pii-scan-cli** – Administrative command-line tool for the PII discovery
//! scan engine.
//!
//! `start`/`resume` run a scan to completion (or until paused/cancelled)
//! inside this process, driving the full [`pii_scan_engine::ScanEngine`].
//! The remaining commands (`pause`, `cancel`, `purge`, `status`, `reveal`,
//! `maintenance`) act directly on the durable store: an operator runs them
//! from a separate, short-lived invocation while a `start`/`resume`
//! invocation may be running elsewhere, so they rely on the same
//! checkpoint-status reconciliation the engine itself uses rather than on
//! any in-process session state. This mirrors how the engine's own
//! `pause`/`cancel` already behave when no session is active in the calling
//! process. There is no REST/SSE surface here; that remains an external
//! collaborator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::Secret;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use pii_attachment_processor::{
    AttachmentProcessor, ExtractionStrategy, PlainTextExtractionStrategy, TextQualityThresholds,
};
use pii_bus::{EventBus, InMemoryBus};
use pii_config::ScanConfig;
use pii_content_accessor::{CachingContentAccessor, HttpContentBackend};
use pii_crypto::CryptoService;
use pii_detection_client::DetectionClient;
use pii_orchestrator::reveal;
use pii_scan_engine::{
    reconcile_startup_checkpoints, CancelReason, ScanEngine, ScanEngineConfig, ScanPhase, StartCommand,
};
use pii_store_core::{AuditRecordStore, CheckpointStore, EventStore, SeverityCounterStore, TransactionalStore};
use pii_store_memory::MemoryBackend;
use pii_store_sqlite::SqliteBackend;
use pii_types::{PageId, ScanId, ScanStatus};

#[derive(Parser)]
#[command(name = "pii-scan-cli")]
#[command(about = "Administrative tool for the PII discovery scan engine")]
#[command(version)]
struct Cli {
    /// Storage backend.
    #[arg(long, value_enum, default_value_t = StorageKind::Sqlite)]
    storage: StorageKind,

    /// Path to the SQLite database file (ignored for `--storage memory`).
    #[arg(long, env = "PII_SCAN_DB_PATH", default_value = "pii-scan.db")]
    db_path: PathBuf,

    /// Base URL of the content platform's HTTP API, used by `start`/`resume`.
    #[arg(long, env = "PII_SCAN_CONTENT_BASE_URL")]
    content_base_url: Option<Url>,

    /// Bearer token for the content platform, used by `start`/`resume`.
    #[arg(long, env = "PII_SCAN_CONTENT_TOKEN")]
    content_token: Option<String>,

    /// Address of the remote PII detection engine, used by `start`/`resume`.
    #[arg(long, env = "PII_SCAN_DETECTION_ADDR")]
    detection_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StorageKind {
    Memory,
    Sqlite,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum CancelReasonArg {
    Error,
    #[default]
    Disconnect,
}

impl From<CancelReasonArg> for CancelReason {
    fn from(value: CancelReasonArg) -> Self {
        match value {
            CancelReasonArg::Error => CancelReason::Error,
            CancelReasonArg::Disconnect => CancelReason::Disconnect,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Discover every visible space and scan it from scratch.
    Start,
    /// Resume a previously paused or interrupted scan.
    Resume {
        /// Scan identifier to resume.
        scan_id: String,
    },
    /// Request a cooperative pause.
    Pause {
        /// Scan identifier to pause.
        scan_id: String,
    },
    /// Cancel a scan.
    Cancel {
        /// Scan identifier to cancel.
        scan_id: String,
        /// Why the scan is being cancelled; affects checkpoint transitions.
        #[arg(long, value_enum, default_value_t = CancelReasonArg::default())]
        reason: CancelReasonArg,
    },
    /// Irreversibly purge every prior scan's events, checkpoints, and
    /// counters.
    Purge,
    /// Print checkpoint and severity-counter status for a scan.
    Status {
        /// Scan identifier to inspect.
        scan_id: String,
    },
    /// Decrypt and print a page's detected entities, recording an audit
    /// record for the access. Refuses to run unless `allow_secret_reveal`
    /// is set in configuration.
    Reveal {
        /// Scan the page was processed under.
        scan_id: String,
        /// Page identifier to reveal.
        page_id: String,
        /// Free-text reason for the access, recorded in the audit log.
        #[arg(long)]
        purpose: String,
        /// How long this audit record should be retained, in hours.
        #[arg(long, default_value_t = 24)]
        retention_hours: i64,
    },
    /// Periodic housekeeping: purge expired audit records.
    Maintenance,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = ScanConfig::load().context("loading configuration")?;

    match cli.storage {
        StorageKind::Memory => {
            let store = Arc::new(MemoryBackend::new());
            run(store, &cli, &config).await
        }
        StorageKind::Sqlite => {
            let store = Arc::new(
                SqliteBackend::open(&cli.db_path)
                    .await
                    .with_context(|| format!("opening sqlite store at {}", cli.db_path.display()))?,
            );
            run(store, &cli, &config).await
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = format!("pii_scan_cli={log_level},pii_scan_engine={log_level},pii_orchestrator={log_level}");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run<S>(store: Arc<S>, cli: &Cli, config: &ScanConfig) -> anyhow::Result<()>
where
    S: TransactionalStore + AuditRecordStore + Send + Sync + 'static,
{
    let reconciled = reconcile_startup_checkpoints(&*store)
        .await
        .context("reconciling orphaned running checkpoints at startup")?;
    if reconciled > 0 {
        info!(count = reconciled, "reconciled orphaned running checkpoints to paused");
    }

    match &cli.command {
        Command::Start => start_or_resume(store, cli, config, None).await,
        Command::Resume { scan_id } => {
            let scan_id = ScanId::new(scan_id.clone()).context("invalid scan id")?;
            start_or_resume(store, cli, config, Some(scan_id)).await
        }
        Command::Pause { scan_id } => {
            let scan_id = ScanId::new(scan_id.clone()).context("invalid scan id")?;
            cmd_pause(&*store, &scan_id).await
        }
        Command::Cancel { scan_id, reason } => {
            let scan_id = ScanId::new(scan_id.clone()).context("invalid scan id")?;
            cmd_cancel(&*store, &scan_id, (*reason).into()).await
        }
        Command::Purge => cmd_purge(&*store).await,
        Command::Status { scan_id } => {
            let scan_id = ScanId::new(scan_id.clone()).context("invalid scan id")?;
            cmd_status(&*store, &scan_id).await
        }
        Command::Reveal {
            scan_id,
            page_id,
            purpose,
            retention_hours,
        } => {
            let scan_id = ScanId::new(scan_id.clone()).context("invalid scan id")?;
            let page_id = PageId::new(page_id.clone()).context("invalid page id")?;
            cmd_reveal(&*store, config, &scan_id, &page_id, purpose.clone(), *retention_hours).await
        }
        Command::Maintenance => cmd_maintenance(&*store).await,
    }
}

async fn start_or_resume<S>(
    store: Arc<S>,
    cli: &Cli,
    config: &ScanConfig,
    resume_scan_id: Option<ScanId>,
) -> anyhow::Result<()>
where
    S: TransactionalStore + AuditRecordStore + Send + Sync + 'static,
{
    let base_url = cli
        .content_base_url
        .clone()
        .context("--content-base-url (or PII_SCAN_CONTENT_BASE_URL) is required to start or resume a scan")?;
    let token = cli
        .content_token
        .clone()
        .context("--content-token (or PII_SCAN_CONTENT_TOKEN) is required to start or resume a scan")?;
    let detection_addr = cli
        .detection_addr
        .clone()
        .context("--detection-addr (or PII_SCAN_DETECTION_ADDR) is required to start or resume a scan")?;

    let crypto = Arc::new(CryptoService::new(config.kek_bytes()));
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(config.event_bus.buffer_capacity));

    let backend = HttpContentBackend::new(base_url, Secret::new(token), config.detection_timeout())
        .context("constructing content platform client")?;
    let content = Arc::new(CachingContentAccessor::new(Arc::new(backend)));
    content.spawn_refresh_task(config.cache_initial_delay(), config.cache_refresh_interval());

    let detection = Arc::new(
        DetectionClient::connect(detection_addr, Duration::from_secs(30))
            .await
            .context("connecting to detection engine")?,
    );

    let thresholds = TextQualityThresholds {
        min_length: config.text_quality.min_length,
        min_alphanumeric_ratio: config.text_quality.min_alphanumeric_ratio,
        max_space_ratio: config.text_quality.max_space_ratio,
        min_printable_ratio: config.text_quality.min_printable_ratio,
        max_special_char_ratio: config.text_quality.max_special_char_ratio,
    };
    let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![Box::new(PlainTextExtractionStrategy)];
    let attachments = Arc::new(AttachmentProcessor::new(strategies, thresholds));

    let engine_config = ScanEngineConfig {
        default_threshold: config.detection.default_threshold,
        detection_timeout: config.detection_timeout(),
        space_parallelism: config.scan_parallelism,
    };

    let engine = Arc::new(ScanEngine::new(
        store,
        crypto,
        bus,
        content,
        detection,
        attachments,
        engine_config,
    ));

    let mut stream = match resume_scan_id {
        Some(scan_id) => engine.resume_all(scan_id).await?,
        None => engine.start_all(StartCommand).await?,
    };

    info!(scan_id = %stream.scan_id, "scan started");
    println!("scan_id: {}", stream.scan_id);

    for event in stream.replay {
        println!("{event:?}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(scan_id = %stream.scan_id, "received interrupt, cancelling scan");
                engine.cancel(&stream.scan_id, CancelReason::Disconnect).await?;
                break;
            }
            received = stream.receiver.recv() => {
                match received {
                    Ok(event) => {
                        println!("{event:?}");
                    }
                    Err(_) => break,
                }
            }
        }

        if let Some(session) = engine.session_state(&stream.scan_id).await {
            if matches!(session.phase, ScanPhase::Completed | ScanPhase::Failed | ScanPhase::Paused) {
                if let Some(err) = &session.error {
                    error!(scan_id = %stream.scan_id, error = %err, "scan failed");
                }
                break;
            }
        }
    }

    Ok(())
}

async fn cmd_pause<S: CheckpointStore>(store: &S, scan_id: &ScanId) -> anyhow::Result<()> {
    let running = store.find_running(scan_id).await?;
    for checkpoint in &running {
        store
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
    println!("paused {} space checkpoint(s) for scan {scan_id}", running.len());
    Ok(())
}

async fn cmd_cancel<S: CheckpointStore>(
    store: &S,
    scan_id: &ScanId,
    reason: CancelReason,
) -> anyhow::Result<()> {
    let running = store.find_running(scan_id).await?;
    if reason == CancelReason::Error {
        for checkpoint in &running {
            store
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
        println!("cancelled scan {scan_id}: {} checkpoint(s) marked failed", running.len());
    } else {
        println!("cancelled scan {scan_id}: checkpoints left as-is for reconciliation on next startup");
    }
    Ok(())
}

async fn cmd_purge<S>(store: &S) -> anyhow::Result<()>
where
    S: EventStore + CheckpointStore + SeverityCounterStore,
{
    EventStore::delete_all(store).await?;
    CheckpointStore::delete_all(store).await?;
    SeverityCounterStore::delete_all(store).await?;
    println!("purged all events, checkpoints, and severity counters");
    Ok(())
}

async fn cmd_status<S>(store: &S, scan_id: &ScanId) -> anyhow::Result<()>
where
    S: CheckpointStore + SeverityCounterStore,
{
    let checkpoints = store.find_by_scan(scan_id).await?;
    if checkpoints.is_empty() {
        println!("no checkpoints found for scan {scan_id}");
        return Ok(());
    }

    let counters = store.list_by_scan(scan_id).await?;
    println!("scan {scan_id}:");
    for checkpoint in &checkpoints {
        let count = counters
            .iter()
            .find(|(space, _)| space == &checkpoint.space_key)
            .map(|(_, count)| *count)
            .unwrap_or_default();
        println!(
            "  space={:<20} status={:?} progress={:.1}% high={} medium={} low={}",
            checkpoint.space_key.as_str(),
            checkpoint.status,
            checkpoint.progress_percentage,
            count.high,
            count.medium,
            count.low,
        );
    }
    Ok(())
}

async fn cmd_reveal<S>(
    store: &S,
    config: &ScanConfig,
    scan_id: &ScanId,
    page_id: &PageId,
    purpose: String,
    retention_hours: i64,
) -> anyhow::Result<()>
where
    S: EventStore + AuditRecordStore,
{
    if !config.allow_secret_reveal {
        anyhow::bail!("reveal is disabled by configuration (pii.allowSecretReveal = false)");
    }

    let crypto = CryptoService::new(config.kek_bytes());
    let entities = reveal(
        store,
        &crypto,
        scan_id,
        page_id,
        purpose,
        chrono::Duration::hours(retention_hours),
    )
    .await?;

    if entities.is_empty() {
        println!("no detected entities found for page {page_id} in scan {scan_id}");
        return Ok(());
    }

    for entity in &entities {
        println!(
            "[{:>6}] {} = {}  (context: {})",
            entity.pii_type, entity.start_position, entity.sensitive_value, entity.sensitive_context,
        );
    }
    Ok(())
}

async fn cmd_maintenance<S: AuditRecordStore>(store: &S) -> anyhow::Result<()> {
    let purged = store.purge_expired(Utc::now()).await?;
    println!("purged {purged} expired audit record(s)");
    Ok(())
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-orchestrator** – Transactional per-item commit of one detection
//! outcome, and the reveal/audit path.
//!
//! [`handle_detection`] is the single place where a freshly produced
//! [`DetectionOutcome`] turns into durable state: it masks and encrypts the
//! sensitive spans, maps severities, writes the event/checkpoint/counter
//! triple through one [`TransactionalStore::commit_item`] call, and only
//! then publishes to the live bus. [`reveal`] is the inverse path used by
//! an operator to decrypt a page's entities on demand, which always leaves
//! an [`AuditRecord`] behind.

mod error;

pub use error::OrchestratorError;

use chrono::{Duration, Utc};

use pii_bus::EventBus;
use pii_crypto::{CryptoService, EncryptionMetadata};
use pii_detection_client::{DetectionOutcome, RawEntity};
use pii_store_core::{AuditRecordStore, EventKindFilter, EventStore, TransactionalStore};
use pii_types::{
    severity_for, AttachmentName, AuditRecord, DetectedEntity, PageId, ScanEvent,
    ScanEventPayload, ScanId, ScanStatus, SeverityCount, SpaceKey,
};

/// Maximum length of a `maskedContext` string before truncation with an
/// ellipsis sentinel. Carried as a named constant pending product
/// confirmation of the bound (Open Question (c)).
pub const MASKED_CONTEXT_MAX_CHARS: usize = 5000;

const MASKED_CONTEXT_ELLIPSIS: &str = "...";

/// Characters of source text kept on each side of a matched span when
/// building that entity's `sensitiveContext` snippet.
const SENSITIVE_CONTEXT_WINDOW_CHARS: usize = 80;

/// One unit of work handed to [`handle_detection`]: either a page body or
/// one of its attachments.
#[derive(Debug, Clone)]
pub enum ScanItem {
    /// A wiki page body.
    Page {
        /// Page identifier.
        page_id: PageId,
        /// Page title, carried onto the emitted event for display.
        page_title: String,
    },
    /// An attachment on a page.
    Attachment {
        /// Owning page identifier.
        page_id: PageId,
        /// Owning page title.
        page_title: String,
        /// Attachment file name.
        attachment_name: AttachmentName,
        /// Attachment MIME type.
        attachment_type: String,
    },
}

impl ScanItem {
    /// Owning page id, for both pages and their attachments.
    pub fn page_id(&self) -> &PageId {
        match self {
            ScanItem::Page { page_id, .. } => page_id,
            ScanItem::Attachment { page_id, .. } => page_id,
        }
    }

    fn page_title(&self) -> &str {
        match self {
            ScanItem::Page { page_title, .. } => page_title,
            ScanItem::Attachment { page_title, .. } => page_title,
        }
    }

    fn attachment_name(&self) -> Option<&AttachmentName> {
        match self {
            ScanItem::Page { .. } => None,
            ScanItem::Attachment {
                attachment_name, ..
            } => Some(attachment_name),
        }
    }

    fn attachment_type(&self) -> Option<&str> {
        match self {
            ScanItem::Page { .. } => None,
            ScanItem::Attachment {
                attachment_type, ..
            } => Some(attachment_type.as_str()),
        }
    }
}

/// Consume one detection outcome and commit it atomically: mask/encrypt
/// entities, map severities, write the event/checkpoint/counter triple
/// through one transactional call, then publish to the live bus.
///
/// `status` and `progress_percentage` are the checkpoint values the caller
/// (the scan engine) wants recorded alongside this item; the orchestrator
/// does not itself decide scan-level progress.
#[allow(clippy::too_many_arguments)]
pub async fn handle_detection<S>(
    store: &S,
    crypto: &CryptoService,
    bus: &dyn EventBus,
    scan_id: &ScanId,
    space_key: &SpaceKey,
    item: &ScanItem,
    source_content: &str,
    detector_output: &DetectionOutcome,
    status: ScanStatus,
    progress_percentage: f32,
) -> Result<(), OrchestratorError>
where
    S: TransactionalStore,
{
    let masked_context = build_masked_context(source_content, &detector_output.entities);

    let mut severity = SeverityCount::default();
    let mut entities = Vec::with_capacity(detector_output.entities.len());
    for raw in &detector_output.entities {
        severity.add(severity_for(&raw.pii_type));

        let metadata = EncryptionMetadata {
            pii_type: raw.pii_type.clone(),
            position_begin: raw.start,
            position_end: raw.end,
        };
        let sensitive_value = crypto.encrypt(&raw.text, &metadata)?;
        let context_window = extract_context_window(source_content, raw.start, raw.end);
        let sensitive_context = crypto.encrypt(&context_window, &metadata)?;

        entities.push(DetectedEntity::new(
            raw.start,
            raw.end,
            raw.pii_type.clone(),
            raw.score,
            sensitive_value,
            sensitive_context,
            masked_context.clone(),
        )?);
    }

    let payload = match item {
        ScanItem::Page { .. } => ScanEventPayload::Item { entities, severity },
        ScanItem::Attachment { .. } => ScanEventPayload::AttachmentItem { entities, severity },
    };

    // Hold the per-scan sequence lock across the max_seq read and the
    // commit so two concurrent items for this scan can never be assigned
    // the same event_seq.
    let seq_guard = store.lock_sequence(scan_id).await;
    let event_seq = store.max_seq(scan_id).await? + 1;

    let event = ScanEvent {
        scan_id: scan_id.clone(),
        event_seq,
        space_key: Some(space_key.clone()),
        ts: Utc::now(),
        page_id: Some(item.page_id().clone()),
        page_title: Some(item.page_title().to_string()),
        attachment_name: item.attachment_name().cloned(),
        attachment_type: item.attachment_type().map(str::to_string),
        payload,
    };

    store
        .commit_item(
            &event,
            space_key,
            Some(item.page_id().as_str()),
            item.attachment_name().map(AttachmentName::as_str),
            status,
            progress_percentage,
            severity.high,
            severity.medium,
            severity.low,
        )
        .await?;
    drop(seq_guard);

    bus.publish(&event)?;
    Ok(())
}

/// Decrypt every entity embedded in `page_id`'s persisted `ITEM`/
/// `ATTACHMENT_ITEM` events and append one [`AuditRecord`] for the call.
///
/// Gating on `pii.allowSecretReveal` is the caller's responsibility (the
/// external HTTP surface); this function always performs the reveal and
/// always records it.
pub async fn reveal<S>(
    store: &S,
    crypto: &CryptoService,
    scan_id: &ScanId,
    page_id: &PageId,
    purpose: impl Into<String>,
    retention: Duration,
) -> Result<Vec<DetectedEntity>, OrchestratorError>
where
    S: EventStore + AuditRecordStore,
{
    let events = store.list_items(scan_id, EventKindFilter::Both).await?;

    let mut space_key: Option<SpaceKey> = None;
    let mut revealed = Vec::new();
    for event in events
        .into_iter()
        .filter(|event| event.page_id.as_ref() == Some(page_id))
    {
        if space_key.is_none() {
            space_key = event.space_key.clone();
        }
        let entities = match event.payload {
            ScanEventPayload::Item { entities, .. } => entities,
            ScanEventPayload::AttachmentItem { entities, .. } => entities,
            _ => continue,
        };
        for entity in entities {
            let metadata = EncryptionMetadata {
                pii_type: entity.pii_type.clone(),
                position_begin: entity.start_position,
                position_end: entity.end_position,
            };
            let sensitive_value = crypto.decrypt(&entity.sensitive_value, &metadata)?;
            let sensitive_context = crypto.decrypt(&entity.sensitive_context, &metadata)?;
            revealed.push(DetectedEntity::new(
                entity.start_position,
                entity.end_position,
                entity.pii_type.clone(),
                entity.confidence(),
                sensitive_value,
                sensitive_context,
                entity.masked_context.clone(),
            )?);
        }
    }

    let accessed_at = Utc::now();
    store
        .append(&AuditRecord {
            id: None,
            scan_id: scan_id.clone(),
            space_key,
            page_id: Some(page_id.clone()),
            accessed_at,
            retention_until: accessed_at + retention,
            purpose: purpose.into(),
            pii_entities_count: revealed.len() as u32,
        })
        .await?;

    Ok(revealed)
}

/// Build the plaintext `maskedContext` shared by every entity detected in
/// one item: entities sorted by `start`, each span clamped to the source
/// bounds and replaced with `[TYPE]`, truncated to
/// [`MASKED_CONTEXT_MAX_CHARS`] with an ellipsis sentinel when it overflows.
fn build_masked_context(source: &str, entities: &[RawEntity]) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();

    let mut sorted: Vec<&RawEntity> = entities.iter().collect();
    sorted.sort_by_key(|entity| entity.start);

    let mut out = String::new();
    let mut cursor = 0usize;
    for entity in sorted {
        let start = entity.start.min(len);
        let end = entity.end.min(len).max(start);
        if start < cursor {
            // Overlapping span already covered by a prior replacement.
            continue;
        }
        out.extend(chars[cursor..start].iter());
        out.push('[');
        out.push_str(&entity.pii_type);
        out.push(']');
        cursor = end;
    }
    out.extend(chars[cursor..len].iter());

    if out.chars().count() > MASKED_CONTEXT_MAX_CHARS {
        let truncated: String = out.chars().take(MASKED_CONTEXT_MAX_CHARS).collect();
        format!("{truncated}{MASKED_CONTEXT_ELLIPSIS}")
    } else {
        out
    }
}

/// Extract the plaintext window around `[start, end)` used as an entity's
/// `sensitiveContext`, clamped to the source bounds.
fn extract_context_window(source: &str, start: usize, end: usize) -> String {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let start = start.min(len);
    let end = end.min(len).max(start);
    let window_start = start.saturating_sub(SENSITIVE_CONTEXT_WINDOW_CHARS);
    let window_end = (end + SENSITIVE_CONTEXT_WINDOW_CHARS).min(len);
    chars[window_start..window_end].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pii_bus::InMemoryBus;
    use pii_store_core::{CheckpointStore, SeverityCounterStore};
    use pii_store_memory::MemoryBackend;

    fn crypto() -> CryptoService {
        CryptoService::new([9u8; 32])
    }

    fn scan_id() -> ScanId {
        ScanId::new("scan-1").unwrap()
    }

    fn space_key() -> SpaceKey {
        SpaceKey::new("ENGINEERING").unwrap()
    }

    fn page_item() -> ScanItem {
        ScanItem::Page {
            page_id: PageId::new("p1").unwrap(),
            page_title: "Runbook".to_string(),
        }
    }

    fn outcome_with_one_email() -> DetectionOutcome {
        DetectionOutcome {
            entities: vec![RawEntity {
                pii_type: "EMAIL_ADDRESS".to_string(),
                start: 14,
                end: 23,
                score: 0.92,
                text: "a@b.co.uk".to_string(),
            }],
            per_type_counts: Default::default(),
        }
    }

    #[tokio::test]
    async fn commits_event_checkpoint_and_counters_and_publishes() {
        let store = MemoryBackend::new();
        let crypto = crypto();
        let bus = InMemoryBus::new(16);
        let (_, mut rx) = bus.subscribe(&scan_id());

        handle_detection(
            &store,
            &crypto,
            &bus,
            &scan_id(),
            &space_key(),
            &page_item(),
            "contact me at a@b.co.uk please",
            &outcome_with_one_email(),
            ScanStatus::Running,
            50.0,
        )
        .await
        .unwrap();

        let published = rx.recv().await.unwrap();
        assert_eq!(published.event_seq, 1);

        let checkpoint = store
            .find_by(&scan_id(), &space_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.progress_percentage, 50.0);
        assert_eq!(checkpoint.last_processed_page_id.unwrap().as_str(), "p1");

        let counts = store.get(&scan_id(), &space_key()).await.unwrap();
        assert_eq!(counts, SeverityCount { high: 0, medium: 0, low: 1 });
    }

    #[tokio::test]
    async fn sensitive_fields_are_encrypted_not_plaintext() {
        let store = MemoryBackend::new();
        let crypto = crypto();
        let bus = InMemoryBus::new(16);

        handle_detection(
            &store,
            &crypto,
            &bus,
            &scan_id(),
            &space_key(),
            &page_item(),
            "contact me at a@b.co.uk please",
            &outcome_with_one_email(),
            ScanStatus::Running,
            50.0,
        )
        .await
        .unwrap();

        let events = store
            .list_items(&scan_id(), EventKindFilter::Items)
            .await
            .unwrap();
        let ScanEventPayload::Item { entities, .. } = &events[0].payload else {
            panic!("expected an Item payload");
        };
        let entity = &entities[0];
        assert!(CryptoService::is_encrypted(&entity.sensitive_value));
        assert!(CryptoService::is_encrypted(&entity.sensitive_context));
        assert!(entity.masked_context.contains("[EMAIL_ADDRESS]"));
        assert!(!entity.masked_context.contains("a@b.co.uk"));
    }

    #[tokio::test]
    async fn reveal_decrypts_and_appends_audit_record() {
        let store = MemoryBackend::new();
        let crypto = crypto();
        let bus = InMemoryBus::new(16);

        handle_detection(
            &store,
            &crypto,
            &bus,
            &scan_id(),
            &space_key(),
            &page_item(),
            "contact me at a@b.co.uk please",
            &outcome_with_one_email(),
            ScanStatus::Running,
            50.0,
        )
        .await
        .unwrap();

        let revealed = reveal(
            &store,
            &crypto,
            &scan_id(),
            &PageId::new("p1").unwrap(),
            "compliance review",
            Duration::days(30),
        )
        .await
        .unwrap();

        assert_eq!(revealed.len(), 1);
        assert_eq!(revealed[0].sensitive_value, "a@b.co.uk");

        let purged = store.purge_expired(Utc::now() + Duration::days(31)).await.unwrap();
        assert_eq!(purged, 1);
    }

    #[test]
    fn masked_context_replaces_and_sorts_by_start() {
        let entities = vec![
            RawEntity {
                pii_type: "SSN".to_string(),
                start: 15,
                end: 26,
                score: 0.9,
                text: "123-45-6789".to_string(),
            },
            RawEntity {
                pii_type: "EMAIL_ADDRESS".to_string(),
                start: 0,
                end: 9,
                score: 0.9,
                text: "a@b.co.uk".to_string(),
            },
        ];
        let masked = build_masked_context("a@b.co.uk says 123-45-6789 is mine", &entities);
        assert_eq!(masked, "[EMAIL_ADDRESS] says [SSN] is mine");
    }

    #[test]
    fn masked_context_truncates_with_ellipsis() {
        let long_source = "x".repeat(MASKED_CONTEXT_MAX_CHARS + 50);
        let masked = build_masked_context(&long_source, &[]);
        assert!(masked.ends_with(MASKED_CONTEXT_ELLIPSIS));
        assert_eq!(
            masked.chars().count(),
            MASKED_CONTEXT_MAX_CHARS + MASKED_CONTEXT_ELLIPSIS.chars().count()
        );
    }

    #[test]
    fn context_window_clamps_to_source_bounds() {
        let window = extract_context_window("short", 0, 5);
        assert_eq!(window, "short");
    }
}

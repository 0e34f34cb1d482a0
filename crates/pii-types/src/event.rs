use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::DetectedEntity;
use crate::ids::{AttachmentName, PageId, ScanId, SpaceKey};
use crate::severity::SeverityCount;

/// Durable, append-only record of one step of a scan.
///
/// `event_seq` is strictly monotonic per `scan_id`, assigned by the event
/// store at insertion time and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Scan this event belongs to.
    pub scan_id: ScanId,
    /// Strictly monotonic sequence number, unique within `scan_id`.
    pub event_seq: u64,
    /// Space the event pertains to, when applicable.
    pub space_key: Option<SpaceKey>,
    /// Wall-clock time the event was produced.
    pub ts: DateTime<Utc>,
    /// Page the event pertains to, when applicable.
    pub page_id: Option<PageId>,
    /// Human-readable page title, when applicable.
    pub page_title: Option<String>,
    /// Attachment the event pertains to, when applicable.
    pub attachment_name: Option<AttachmentName>,
    /// MIME type of the attachment, when applicable.
    pub attachment_type: Option<String>,
    /// Kind-specific payload.
    pub payload: ScanEventPayload,
}

impl ScanEvent {
    /// The [`EventType`] discriminant of this event's payload.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// Discriminant for [`ScanEventPayload`], exposed separately so storage
/// layers can filter/index on event kind without deserializing the full
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Scan has begun.
    Start,
    /// A space has begun processing.
    SpaceStart,
    /// A page has finished processing.
    Item,
    /// An attachment has finished processing.
    AttachmentItem,
    /// Progress update for a space.
    Progress,
    /// A space has finished processing.
    SpaceComplete,
    /// The scan has finished.
    Complete,
    /// A recoverable error occurred while processing one item.
    Error,
    /// The scan was paused.
    Paused,
    /// The scan was resumed.
    Resumed,
}

/// Kind-specific event payload. One variant per [`EventType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEventPayload {
    /// Emitted once at the beginning of `startAll`.
    Start {
        /// Number of spaces discovered.
        spaces_count: u32,
    },
    /// Emitted when a space begins processing.
    SpaceStart,
    /// Emitted after a page has been processed.
    Item {
        /// Entities detected in the page body.
        entities: Vec<DetectedEntity>,
        /// Severity deltas contributed by this item.
        severity: SeverityCount,
    },
    /// Emitted after an attachment has been processed.
    AttachmentItem {
        /// Entities detected in the extracted attachment text.
        entities: Vec<DetectedEntity>,
        /// Severity deltas contributed by this item.
        severity: SeverityCount,
    },
    /// Emitted periodically while a space is processing.
    Progress {
        /// Percentage in `[0, 100]`, rounded to one decimal.
        percentage: f32,
    },
    /// Emitted when a space finishes, successfully or with an error marker.
    SpaceComplete {
        /// Final progress percentage for the space.
        percentage: f32,
        /// Error message, set only if the space closed due to a fatal error.
        error: Option<String>,
    },
    /// Emitted once after all spaces have finished.
    Complete {
        /// `true` if every space completed without a fatal error.
        success: bool,
    },
    /// Emitted when a single item fails without aborting the scan.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// Emitted when an operator pauses the scan.
    Paused,
    /// Emitted when an operator resumes the scan.
    Resumed,
}

impl ScanEventPayload {
    /// The [`EventType`] discriminant for this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            ScanEventPayload::Start { .. } => EventType::Start,
            ScanEventPayload::SpaceStart => EventType::SpaceStart,
            ScanEventPayload::Item { .. } => EventType::Item,
            ScanEventPayload::AttachmentItem { .. } => EventType::AttachmentItem,
            ScanEventPayload::Progress { .. } => EventType::Progress,
            ScanEventPayload::SpaceComplete { .. } => EventType::SpaceComplete,
            ScanEventPayload::Complete { .. } => EventType::Complete,
            ScanEventPayload::Error { .. } => EventType::Error,
            ScanEventPayload::Paused => EventType::Paused,
            ScanEventPayload::Resumed => EventType::Resumed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(seq: u64, payload: ScanEventPayload) -> ScanEvent {
        ScanEvent {
            scan_id: ScanId::new("scan-1").unwrap(),
            event_seq: seq,
            space_key: Some(SpaceKey::new("ENGINEERING").unwrap()),
            ts: Utc::now(),
            page_id: None,
            page_title: None,
            attachment_name: None,
            attachment_type: None,
            payload,
        }
    }

    #[test]
    fn event_type_matches_payload_discriminant() {
        let event = sample_event(1, ScanEventPayload::SpaceStart);
        assert_eq!(event.event_type(), EventType::SpaceStart);
    }

    #[test]
    fn serde_round_trip_preserves_payload() {
        let event = sample_event(
            3,
            ScanEventPayload::Item {
                entities: vec![],
                severity: SeverityCount::default(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let decoded: ScanEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.event_seq, 3);
        assert_eq!(decoded.event_type(), EventType::Item);
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-bus** – In-memory live event fan-out for the PII scan engine.
//!
//! Publishes freshly persisted [`ScanEvent`]s to active subscribers of a
//! given scan. Each scan gets its own bounded ring buffer so a late
//! subscriber can be primed with the most recent events before switching to
//! live delivery, without one busy scan's volume affecting another's buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::broadcast;

use pii_types::{ScanEvent, ScanId};

/// Default number of buffered events retained per scan for late subscribers.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1000;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Event could not be published (no active channel and creation failed).
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
}

/// Publish/subscribe abstraction scoped to a single scan.
///
/// Implementations must let a subscriber created after `N` events were
/// published see at least `min(N, capacity)` of the most recent ones before
/// any event published after subscribing, with no duplicates and no gaps
/// relative to the replay cutoff.
pub trait EventBus: Send + Sync {
    /// Publish `event` to all current and future subscribers of its
    /// `scan_id`. Must be called only after the event has been durably
    /// stored.
    fn publish(&self, event: &ScanEvent) -> Result<(), BusError>;

    /// Subscribe to the live stream for `scan_id`. Returns a snapshot of the
    /// buffered replay (oldest first, at most the configured capacity)
    /// together with a receiver for events published from this point
    /// onward.
    fn subscribe(&self, scan_id: &ScanId) -> (Vec<ScanEvent>, broadcast::Receiver<ScanEvent>);

    /// Drop the buffered replay state and broadcast channel for a scan,
    /// e.g. as part of `purgeAll`.
    fn close(&self, scan_id: &ScanId);
}

struct ScanChannel {
    tx: broadcast::Sender<ScanEvent>,
    replay: Mutex<VecDeque<ScanEvent>>,
}

/// In-memory event bus with one bounded replay ring buffer and broadcast
/// channel per scan.
pub struct InMemoryBus {
    channels: DashMap<ScanId, ScanChannel>,
    capacity: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

impl InMemoryBus {
    /// Create a new bus with the given per-scan replay buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of active subscribers across all of a scan's subscriptions.
    pub fn subscriber_count(&self, scan_id: &ScanId) -> usize {
        self.channels
            .get(scan_id)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }

    fn channel_for(&self, scan_id: &ScanId) -> dashmap::mapref::one::Ref<'_, ScanId, ScanChannel> {
        self.channels.entry(scan_id.clone()).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(self.capacity);
            ScanChannel {
                tx,
                replay: Mutex::new(VecDeque::with_capacity(self.capacity)),
            }
        });
        self.channels.get(scan_id).expect("just inserted")
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &ScanEvent) -> Result<(), BusError> {
        let channel = self.channel_for(&event.scan_id);
        // Hold the replay lock across the buffer push and the broadcast
        // send so a concurrent `subscribe` sees this event in exactly one
        // place: either in its replay snapshot (if subscribe's own
        // critical section runs after this one) or via the receiver it
        // subscribes with here (if before), never both and never neither.
        let mut replay = channel
            .replay
            .lock()
            .map_err(|_| BusError::PublishFailed("replay buffer lock poisoned".to_string()))?;
        if replay.len() == self.capacity {
            replay.pop_front();
        }
        replay.push_back(event.clone());
        // Ignore lagging/no-receiver errors: subscribers reconcile via the
        // event store's listing endpoints.
        let _ = channel.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self, scan_id: &ScanId) -> (Vec<ScanEvent>, broadcast::Receiver<ScanEvent>) {
        let channel = self.channel_for(scan_id);
        let replay = channel.replay.lock().unwrap_or_else(|e| e.into_inner());
        // Snapshot and subscribe while still holding the lock: a `publish`
        // racing with this call has either fully completed (its event is
        // in `replay` and was already sent, but our receiver is created
        // after that send so we won't see it twice) or hasn't started yet
        // (not in `replay`, but our receiver is live before its send).
        let snapshot = replay.iter().cloned().collect();
        let receiver = channel.tx.subscribe();
        drop(replay);
        (snapshot, receiver)
    }

    fn close(&self, scan_id: &ScanId) {
        self.channels.remove(scan_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pii_types::ScanEventPayload;
    use tokio::sync::broadcast::error::RecvError;

    fn scan_id() -> ScanId {
        ScanId::new("scan-1").unwrap()
    }

    fn event(seq: u64) -> ScanEvent {
        ScanEvent {
            scan_id: scan_id(),
            event_seq: seq,
            space_key: None,
            ts: chrono::Utc::now(),
            page_id: None,
            page_title: None,
            attachment_name: None,
            attachment_type: None,
            payload: ScanEventPayload::SpaceStart,
        }
    }

    #[tokio::test]
    async fn basic_publish_and_receive() {
        let bus = InMemoryBus::new(16);
        let (replay, mut rx) = bus.subscribe(&scan_id());
        assert!(replay.is_empty());

        bus.publish(&event(1)).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_seq, 1);
    }

    #[tokio::test]
    async fn late_subscriber_is_primed_with_replay() {
        let bus = InMemoryBus::new(16);
        bus.publish(&event(1)).unwrap();
        bus.publish(&event(2)).unwrap();

        let (replay, _rx) = bus.subscribe(&scan_id());
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].event_seq, 1);
        assert_eq!(replay[1].event_seq, 2);
    }

    #[tokio::test]
    async fn replay_buffer_is_bounded() {
        let bus = InMemoryBus::new(2);
        for seq in 1..=5 {
            bus.publish(&event(seq)).unwrap();
        }
        let (replay, _rx) = bus.subscribe(&scan_id());
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].event_seq, 4);
        assert_eq!(replay[1].event_seq, 5);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = InMemoryBus::new(16);
        let (_, mut rx1) = bus.subscribe(&scan_id());
        let (_, mut rx2) = bus.subscribe(&scan_id());
        assert_eq!(bus.subscriber_count(&scan_id()), 2);

        bus.publish(&event(1)).unwrap();
        assert_eq!(rx1.recv().await.unwrap().event_seq, 1);
        assert_eq!(rx2.recv().await.unwrap().event_seq, 1);
    }

    #[tokio::test]
    async fn broadcast_overflow_reports_lagged_not_panic() {
        let bus = InMemoryBus::new(2);
        let (_, mut rx) = bus.subscribe(&scan_id());
        for seq in 1..=5 {
            bus.publish(&event(seq)).unwrap();
        }
        match rx.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[tokio::test]
    async fn close_drops_buffered_state() {
        let bus = InMemoryBus::new(16);
        bus.publish(&event(1)).unwrap();
        bus.close(&scan_id());
        let (replay, _rx) = bus.subscribe(&scan_id());
        assert!(replay.is_empty());
    }

    #[tokio::test]
    async fn concurrent_publish_and_subscribe_never_duplicates_or_drops() {
        use std::sync::Arc;

        let bus = Arc::new(InMemoryBus::new(64));
        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for seq in 1..=200u64 {
                    bus.publish(&event(seq)).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut seen = std::collections::HashSet::new();
        let (replay, mut rx) = bus.subscribe(&scan_id());
        for e in replay {
            assert!(seen.insert(e.event_seq), "duplicate seq {} in replay", e.event_seq);
        }
        loop {
            match rx.recv().await {
                Ok(e) => {
                    assert!(seen.insert(e.event_seq), "duplicate seq {} from live stream", e.event_seq);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
            if seen.len() == 200 {
                break;
            }
        }

        publisher.await.unwrap();
    }
}

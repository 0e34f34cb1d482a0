#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-detection-client** – gRPC client for the external PII detection
//! engine.
//!
//! Wraps a single long-lived `tonic` channel with keep-alive, a per-call
//! deadline, and a narrow retry policy: transient transport failures are
//! retried once, and a specific `UNIMPLEMENTED` signature from the remote
//! triggers a one-time channel reconnect (the engine process restarted with
//! a newer protocol revision behind the same address). Everything else
//! propagates as a typed [`DetectionError`].

pub mod error;

use std::collections::HashMap;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::{debug, warn};

pub use error::DetectionError;

#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("pii.detection.v1");
}

use proto::pii_detection_service_client::PiiDetectionServiceClient;
use proto::AnalyzeRequest;

/// A single PII hit as reported by the detection engine, before any
/// masking or encryption has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    /// PII type name (e.g. `"EMAIL_ADDRESS"`).
    pub pii_type: String,
    /// Offset of the first matched character.
    pub start: usize,
    /// Offset one past the last matched character.
    pub end: usize,
    /// Detector confidence in `[0, 1]`.
    pub score: f32,
    /// The raw matched text.
    pub text: String,
}

/// Result of one `analyze` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionOutcome {
    /// Every entity at or above the requested threshold.
    pub entities: Vec<RawEntity>,
    /// Count of entities per PII type, for quick severity pre-aggregation.
    pub per_type_counts: HashMap<String, u32>,
}

impl DetectionOutcome {
    fn from_entities(entities: Vec<RawEntity>) -> Self {
        let mut per_type_counts = HashMap::new();
        for entity in &entities {
            *per_type_counts.entry(entity.pii_type.clone()).or_insert(0) += 1;
        }
        Self {
            entities,
            per_type_counts,
        }
    }
}

/// The specific service-identity string the remote reports when it has been
/// redeployed with a protocol revision this client does not recognize.
/// Seeing it once is a cue to reconnect, not a hard failure.
const RECONNECT_SIGNATURE: &str = "pii-detection-engine/protocol-unsupported";

/// Client for the external PII detection engine.
pub struct DetectionClient {
    endpoint: Endpoint,
    client: tokio::sync::Mutex<PiiDetectionServiceClient<Channel>>,
}

impl DetectionClient {
    /// Connect to `addr` (e.g. `http://detection-engine:50051`) with the
    /// given keep-alive interval.
    pub async fn connect(addr: impl Into<String>, keep_alive: Duration) -> Result<Self, DetectionError> {
        let addr = addr.into();
        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|e| DetectionError::Connect {
                endpoint: addr.clone(),
                source: e.into(),
            })?
            .keep_alive_while_idle(true)
            .http2_keep_alive_interval(keep_alive);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| DetectionError::Connect {
                endpoint: addr,
                source: e,
            })?;

        Ok(Self {
            endpoint,
            client: tokio::sync::Mutex::new(PiiDetectionServiceClient::new(channel)),
        })
    }

    /// Analyze `text` for PII entities scoring at or above `threshold`,
    /// with a per-call deadline of `timeout`.
    ///
    /// Whitespace-only text short-circuits to an empty outcome without a
    /// network call.
    pub async fn analyze(
        &self,
        text: &str,
        threshold: f32,
        timeout: Duration,
    ) -> Result<DetectionOutcome, DetectionError> {
        if text.trim().is_empty() {
            return Ok(DetectionOutcome::default());
        }

        let request = AnalyzeRequest {
            text: text.to_string(),
            threshold,
        };

        match self.call_once(request.clone(), timeout).await {
            Ok(response) => Ok(response),
            Err(status) if Self::is_reconnect_signal(&status) => {
                warn!("detection engine signalled protocol mismatch, reconnecting");
                self.reconnect().await?;
                self.call_once(request, timeout)
                    .await
                    .map_err(DetectionError::from)
            }
            Err(status) if Self::is_transient(&status) => {
                debug!(code = ?status.code(), "transient detection call failure, retrying once");
                self.call_once(request, timeout)
                    .await
                    .map_err(DetectionError::from)
            }
            Err(status) => Err(Self::classify(status, timeout.as_millis() as u64)),
        }
    }

    async fn call_once(
        &self,
        request: AnalyzeRequest,
        timeout: Duration,
    ) -> Result<DetectionOutcome, tonic::Status> {
        let mut request = Request::new(request);
        request.set_timeout(timeout);

        let mut client = self.client.lock().await;
        let response = client.analyze(request).await?.into_inner();

        let entities = response
            .entities
            .into_iter()
            .map(|e| RawEntity {
                pii_type: e.pii_type,
                start: e.start as usize,
                end: e.end as usize,
                score: e.score,
                text: e.text,
            })
            .collect();

        Ok(DetectionOutcome::from_entities(entities))
    }

    async fn reconnect(&self) -> Result<(), DetectionError> {
        let channel = self
            .endpoint
            .clone()
            .connect()
            .await
            .map_err(|e| DetectionError::Connect {
                endpoint: self.endpoint.uri().to_string(),
                source: e,
            })?;
        *self.client.lock().await = PiiDetectionServiceClient::new(channel);
        Ok(())
    }

    fn is_reconnect_signal(status: &tonic::Status) -> bool {
        status.code() == tonic::Code::Unimplemented && status.message().contains(RECONNECT_SIGNATURE)
    }

    fn is_transient(status: &tonic::Status) -> bool {
        matches!(
            status.code(),
            tonic::Code::Unavailable | tonic::Code::ResourceExhausted | tonic::Code::Aborted
        )
    }

    fn classify(status: tonic::Status, deadline_ms: u64) -> DetectionError {
        match status.code() {
            tonic::Code::DeadlineExceeded => DetectionError::DeadlineExceeded { deadline_ms },
            tonic::Code::Cancelled => DetectionError::Cancelled,
            _ => DetectionError::Rpc(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_text_short_circuits() {
        // Exercised indirectly: DetectionOutcome::default() carries no
        // entities and an empty count map, matching what `analyze` returns
        // for blank input without needing a live server in unit tests.
        let outcome = DetectionOutcome::default();
        assert!(outcome.entities.is_empty());
        assert!(outcome.per_type_counts.is_empty());
    }

    #[test]
    fn per_type_counts_aggregate_from_entities() {
        let entities = vec![
            RawEntity {
                pii_type: "EMAIL".to_string(),
                start: 0,
                end: 5,
                score: 0.9,
                text: "a@b.c".to_string(),
            },
            RawEntity {
                pii_type: "EMAIL".to_string(),
                start: 10,
                end: 15,
                score: 0.8,
                text: "d@e.f".to_string(),
            },
            RawEntity {
                pii_type: "SSN".to_string(),
                start: 20,
                end: 31,
                score: 0.95,
                text: "123-45-6789".to_string(),
            },
        ];
        let outcome = DetectionOutcome::from_entities(entities);
        assert_eq!(outcome.per_type_counts["EMAIL"], 2);
        assert_eq!(outcome.per_type_counts["SSN"], 1);
    }

    #[test]
    fn reconnect_signature_is_detected_only_on_unimplemented() {
        let matching = tonic::Status::unimplemented(format!(
            "engine restarted: {RECONNECT_SIGNATURE}"
        ));
        assert!(DetectionClient::is_reconnect_signal(&matching));

        let wrong_code = tonic::Status::unavailable(RECONNECT_SIGNATURE);
        assert!(!DetectionClient::is_reconnect_signal(&wrong_code));

        let wrong_message = tonic::Status::unimplemented("some other reason");
        assert!(!DetectionClient::is_reconnect_signal(&wrong_message));
    }

    #[test]
    fn transient_codes_are_recognized() {
        assert!(DetectionClient::is_transient(&tonic::Status::unavailable("")));
        assert!(DetectionClient::is_transient(&tonic::Status::resource_exhausted("")));
        assert!(!DetectionClient::is_transient(&tonic::Status::invalid_argument("")));
    }
}

//! Typed errors surfaced by the detection client.

use thiserror::Error;

/// Errors raised while calling the external PII detection engine.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The gRPC channel could not be (re)established.
    #[error("failed to connect to detection engine at {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Underlying transport error.
        #[source]
        source: tonic::transport::Error,
    },

    /// The call exceeded its per-call deadline.
    #[error("detection call exceeded deadline of {deadline_ms}ms")]
    DeadlineExceeded {
        /// Configured deadline, in milliseconds.
        deadline_ms: u64,
    },

    /// The caller's context was cancelled while the call was in flight.
    #[error("detection call cancelled")]
    Cancelled,

    /// The remote returned a gRPC status this client does not treat as
    /// transient or reconnect-worthy.
    #[error("detection engine returned {0}")]
    Rpc(#[from] tonic::Status),

    /// A response field was outside the range `pii-types` requires.
    #[error("detection engine returned an invalid entity: {0}")]
    InvalidEntity(#[from] pii_types::TypesError),
}

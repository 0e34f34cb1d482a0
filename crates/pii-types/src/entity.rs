use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};
use crate::severity::{severity_for, Severity};

/// One PII hit surfaced by the detection engine for a single page or
/// attachment body.
///
/// `sensitive_value` and `sensitive_context` hold ciphertext
/// (`ENC:v1:...` tokens, see `pii-crypto`) once an entity has been through
/// the scan orchestrator; they are constructed with the plaintext at
/// detection time and encrypted before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedEntity {
    /// Offset of the first matched character in the normalized source text.
    pub start_position: usize,
    /// Offset one past the last matched character.
    pub end_position: usize,
    /// PII type name as reported by the detector (e.g. `"EMAIL_ADDRESS"`).
    pub pii_type: String,
    /// Detector confidence in the closed range `[0, 1]`, stored as
    /// millipercent (`0..=1000`) to keep the type `Eq`.
    pub confidence_millis: u16,
    /// The raw matched value. Ciphertext once persisted.
    pub sensitive_value: String,
    /// Surrounding context snippet. Ciphertext once persisted.
    pub sensitive_context: String,
    /// Plaintext context with the sensitive span replaced by `[TYPE]`.
    pub masked_context: String,
}

impl DetectedEntity {
    /// Construct a new entity from detector output, validating position
    /// ordering and confidence range.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        start_position: usize,
        end_position: usize,
        pii_type: impl Into<String>,
        confidence: f32,
        sensitive_value: impl Into<String>,
        sensitive_context: impl Into<String>,
        masked_context: impl Into<String>,
    ) -> TypesResult<Self> {
        if start_position > end_position {
            return Err(TypesError::OutOfRange {
                field: "start_position",
                value: start_position.to_string(),
                min: "0".to_string(),
                max: end_position.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(TypesError::OutOfRange {
                field: "confidence",
                value: confidence.to_string(),
                min: "0.0".to_string(),
                max: "1.0".to_string(),
            });
        }
        Ok(Self {
            start_position,
            end_position,
            pii_type: pii_type.into(),
            confidence_millis: (confidence * 1000.0).round() as u16,
            sensitive_value: sensitive_value.into(),
            sensitive_context: sensitive_context.into(),
            masked_context: masked_context.into(),
        })
    }

    /// Confidence as a float in `[0, 1]`.
    pub fn confidence(&self) -> f32 {
        f32::from(self.confidence_millis) / 1000.0
    }

    /// Severity bucket for this entity's PII type, per the fixed table.
    pub fn severity(&self) -> Severity {
        severity_for(&self.pii_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_positions() {
        let result = DetectedEntity::new(10, 5, "EMAIL", 0.9, "x", "y", "z");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(DetectedEntity::new(0, 5, "EMAIL", 1.01, "x", "y", "z").is_err());
        assert!(DetectedEntity::new(0, 5, "EMAIL", -0.01, "x", "y", "z").is_err());
    }

    #[test]
    fn accepts_boundary_confidence() {
        assert!(DetectedEntity::new(0, 5, "EMAIL", 0.0, "x", "y", "z").is_ok());
        assert!(DetectedEntity::new(0, 5, "EMAIL", 1.0, "x", "y", "z").is_ok());
    }

    #[test]
    fn confidence_round_trips_through_millis() {
        let entity = DetectedEntity::new(0, 5, "EMAIL", 0.873, "x", "y", "z").unwrap();
        assert!((entity.confidence() - 0.873).abs() < 0.001);
    }

    #[test]
    fn severity_follows_pii_type() {
        let entity = DetectedEntity::new(0, 5, "PASSWORD", 0.9, "x", "y", "z").unwrap();
        assert_eq!(entity.severity(), Severity::High);
    }
}

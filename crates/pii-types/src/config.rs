use serde::{Deserialize, Serialize};

use crate::error::{TypesError, TypesResult};

/// Detector engines the system can dispatch to, as enumerated by the
/// detection configuration. Detection logic itself is delegated to the
/// external detection engine; this crate only names the kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detector {
    /// GLiNER-style zero-shot NER detector.
    Gliner,
    /// Presidio-style rule+ML detector.
    Presidio,
    /// Plain regex detector.
    Regex,
}

/// Singleton detection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Whether the GLiNER detector is enabled.
    pub gliner_enabled: bool,
    /// Whether the Presidio detector is enabled.
    pub presidio_enabled: bool,
    /// Whether the plain regex detector is enabled.
    pub regex_enabled: bool,
    /// Default confidence threshold applied when a per-type override is
    /// absent, in `[0, 1]`.
    pub default_threshold: f32,
    /// Maximum number of labels requested per detection batch.
    pub labels_per_batch: u32,
}

impl DetectionConfig {
    /// Validate the configuration: at least one detector enabled, threshold
    /// in range, non-zero batch size.
    pub fn validate(&self) -> TypesResult<()> {
        if !(self.gliner_enabled || self.presidio_enabled || self.regex_enabled) {
            return Err(TypesError::OutOfRange {
                field: "detectors_enabled",
                value: "none".to_string(),
                min: "1".to_string(),
                max: "3".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(TypesError::OutOfRange {
                field: "default_threshold",
                value: self.default_threshold.to_string(),
                min: "0.0".to_string(),
                max: "1.0".to_string(),
            });
        }
        if self.labels_per_batch == 0 {
            return Err(TypesError::OutOfRange {
                field: "labels_per_batch",
                value: "0".to_string(),
                min: "1".to_string(),
                max: "u32::MAX".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-(detector, PII type) configuration override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiTypeConfig {
    /// Which detector this override applies to.
    pub detector: Detector,
    /// PII type name (e.g. `"EMAIL_ADDRESS"`).
    pub pii_type: String,
    /// Whether this type is enabled for this detector.
    pub enabled: bool,
    /// Confidence threshold override, in `[0, 1]`.
    pub threshold: f32,
    /// Grouping category (e.g. `"Contact"`, `"Financial"`).
    pub category: String,
    /// ISO country code this type is scoped to, if any (e.g. national ID
    /// formats that only make sense for one jurisdiction).
    pub country_code: Option<String>,
    /// Human-readable display name shown in the dashboard.
    pub display_name: String,
    /// Label string the detector itself uses for this type.
    pub detector_label: String,
}

impl PiiTypeConfig {
    /// Validate the threshold range.
    pub fn validate(&self) -> TypesResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(TypesError::OutOfRange {
                field: "threshold",
                value: self.threshold.to_string(),
                min: "0.0".to_string(),
                max: "1.0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DetectionConfig {
        DetectionConfig {
            gliner_enabled: true,
            presidio_enabled: false,
            regex_enabled: false,
            default_threshold: 0.5,
            labels_per_batch: 20,
        }
    }

    #[test]
    fn rejects_no_detector_enabled() {
        let mut cfg = base_config();
        cfg.gliner_enabled = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_boundary_thresholds() {
        let mut cfg = base_config();
        cfg.default_threshold = 0.0;
        assert!(cfg.validate().is_ok());
        cfg.default_threshold = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = base_config();
        cfg.default_threshold = 1.01;
        assert!(cfg.validate().is_err());
        cfg.default_threshold = -0.01;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut cfg = base_config();
        cfg.labels_per_batch = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pii_type_config_validates_threshold() {
        let cfg = PiiTypeConfig {
            detector: Detector::Regex,
            pii_type: "EMAIL_ADDRESS".to_string(),
            enabled: true,
            threshold: 1.5,
            category: "Contact".to_string(),
            country_code: None,
            display_name: "Email address".to_string(),
            detector_label: "EMAIL".to_string(),
        };
        assert!(cfg.validate().is_err());
    }
}

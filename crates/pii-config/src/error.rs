use thiserror::Error;

use pii_types::TypesError;

/// Errors raised while loading or validating [`crate::ScanConfig`].
///
/// Every variant is a fail-fast startup error: configuration is never
/// allowed to reach a running scan in a state that could only be discovered
/// at first use (e.g. an out-of-range threshold surfacing mid-scan).
#[derive(Debug, Error)]
pub enum ConfigInvalid {
    /// The layered source (defaults, file, environment) could not be parsed
    /// or deserialized into the target shape.
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    /// A required value had no default, no file entry, and no environment
    /// override.
    #[error("missing required configuration value: {0}")]
    Missing(String),

    /// A numeric or enumerated value fell outside its valid range.
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        /// Name of the offending field, in `section.key` form.
        field: &'static str,
        /// Observed value, formatted for display.
        value: String,
        /// Lower bound, formatted for display.
        min: String,
        /// Upper bound, formatted for display.
        max: String,
    },

    /// A nested `pii-types` domain config (`DetectionConfig`/`PiiTypeConfig`)
    /// failed its own validation.
    #[error("detection configuration invalid: {0}")]
    Detection(#[from] TypesError),
}

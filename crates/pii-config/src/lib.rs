#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-config** – Layered configuration loading for the scan service.
//!
//! [`ScanConfig::load`] merges, lowest to highest precedence: compiled-in
//! defaults, an optional `pii-scan.toml` file in the working directory, and
//! `PII_SCAN_`-prefixed environment variables. The key-encryption-key is the
//! only secret-shaped value handled here; it is read into a
//! [`zeroize`]-guarded buffer immediately and never logged or `Debug`-printed.
//! Every other knob validates eagerly in [`ScanConfig::load`] so a
//! misconfigured deployment fails at startup rather than mid-scan.

mod error;

pub use error::ConfigInvalid;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use zeroize::{Zeroize, Zeroizing};

use pii_types::{DetectionConfig, PiiTypeConfig};

const ENV_PREFIX: &str = "PII_SCAN";
const CONFIG_FILE_STEM: &str = "pii-scan";

/// Background refresh cadence of the content-platform space cache.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
    /// Interval between refreshes, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Delay before the first refresh, in milliseconds.
    pub initial_delay_ms: u64,
}

/// Per-call deadlines used by the scan engine.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScanTimeouts {
    /// Deadline for one detection-engine `analyze` call, in milliseconds.
    pub pii_detection_ms: u64,
}

/// Per-scan replay buffer sizing for the event bus.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EventBusConfig {
    /// Number of most-recent events retained per scan for replay.
    pub buffer_capacity: usize,
}

/// Audit-record retention for the `reveal` path.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AuditConfig {
    /// Days an `AuditRecord` survives before `purge_expired_audit_records`
    /// removes it.
    pub retention_days: i64,
}

/// Thresholds used by the attachment processor's text-quality gate, loaded
/// the same way as every other knob so the processor itself stays
/// config-agnostic.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DocumentTextQualityConfig {
    /// Minimum character count.
    pub min_length: usize,
    /// Minimum fraction of alphanumeric characters.
    pub min_alphanumeric_ratio: f32,
    /// Maximum fraction of whitespace characters.
    pub max_space_ratio: f32,
    /// Minimum fraction of printable characters.
    pub min_printable_ratio: f32,
    /// Maximum fraction of non-alphanumeric, non-space "special" characters.
    pub max_special_char_ratio: f32,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    cache: CacheConfig,
    scan_parallelism: usize,
    timeouts: ScanTimeouts,
    event_bus: EventBusConfig,
    audit: AuditConfig,
    allow_secret_reveal: bool,
    text_quality: DocumentTextQualityConfig,
    detection: DetectionConfig,
    #[serde(default)]
    pii_types: Vec<PiiTypeConfig>,
    kek_b64: Secret<String>,
}

/// Fully loaded and validated scan-service configuration.
///
/// There is no public constructor that skips validation: an unvalidated
/// config is never a value this crate wants callers to be able to hold.
pub struct ScanConfig {
    kek: Zeroizing<[u8; 32]>,
    /// Content cache refresh cadence.
    pub cache: CacheConfig,
    /// Max spaces processed concurrently.
    pub scan_parallelism: usize,
    /// Per-call deadlines.
    pub timeouts: ScanTimeouts,
    /// Event bus replay buffer sizing.
    pub event_bus: EventBusConfig,
    /// Audit-record retention.
    pub audit: AuditConfig,
    /// Whether the `reveal` operation is permitted at all.
    pub allow_secret_reveal: bool,
    /// Attachment text-quality gate thresholds.
    pub text_quality: DocumentTextQualityConfig,
    /// Detector engine configuration.
    pub detection: DetectionConfig,
    /// Per-(detector, PII type) overrides.
    pub pii_types: Vec<PiiTypeConfig>,
}

impl ScanConfig {
    /// Load and validate configuration.
    ///
    /// Environment variables use double underscores to address nested keys,
    /// e.g. `PII_SCAN_CACHE__REFRESH_INTERVAL_MS=30000` or
    /// `PII_SCAN_KEK_B64=<32 bytes, base64>`. A `.env` file in the working
    /// directory is loaded first, if present, via `dotenvy`.
    pub fn load() -> Result<Self, ConfigInvalid> {
        let _ = dotenvy::dotenv();

        let built = config::Config::builder()
            .set_default("cache.refresh_interval_ms", 60_000i64)?
            .set_default("cache.initial_delay_ms", 0i64)?
            .set_default("scan_parallelism", 1i64)?
            .set_default("timeouts.pii_detection_ms", 10_000i64)?
            .set_default("event_bus.buffer_capacity", 1_000i64)?
            .set_default("audit.retention_days", 90i64)?
            .set_default("allow_secret_reveal", false)?
            .set_default("text_quality.min_length", 20i64)?
            .set_default("text_quality.min_alphanumeric_ratio", 0.3)?
            .set_default("text_quality.max_space_ratio", 0.6)?
            .set_default("text_quality.min_printable_ratio", 0.9)?
            .set_default("text_quality.max_special_char_ratio", 0.3)?
            .set_default("detection.gliner_enabled", true)?
            .set_default("detection.presidio_enabled", false)?
            .set_default("detection.regex_enabled", false)?
            .set_default("detection.default_threshold", 0.5)?
            .set_default("detection.labels_per_batch", 20i64)?
            .add_source(config::File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let raw: RawConfig = built.try_deserialize()?;
        let config = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigInvalid> {
        let kek = decode_kek(&raw.kek_b64)?;
        Ok(Self {
            kek,
            cache: raw.cache,
            scan_parallelism: raw.scan_parallelism,
            timeouts: raw.timeouts,
            event_bus: raw.event_bus,
            audit: raw.audit,
            allow_secret_reveal: raw.allow_secret_reveal,
            text_quality: raw.text_quality,
            detection: raw.detection,
            pii_types: raw.pii_types,
        })
    }

    fn validate(&self) -> Result<(), ConfigInvalid> {
        if self.scan_parallelism == 0 {
            return Err(out_of_range("scan_parallelism", "0", "1", "usize::MAX"));
        }
        if self.cache.refresh_interval_ms == 0 {
            return Err(out_of_range("cache.refresh_interval_ms", "0", "1", "u64::MAX"));
        }
        if self.timeouts.pii_detection_ms == 0 {
            return Err(out_of_range("timeouts.pii_detection_ms", "0", "1", "u64::MAX"));
        }
        if self.event_bus.buffer_capacity == 0 {
            return Err(out_of_range("event_bus.buffer_capacity", "0", "1", "usize::MAX"));
        }
        if self.audit.retention_days < 1 {
            return Err(out_of_range(
                "audit.retention_days",
                &self.audit.retention_days.to_string(),
                "1",
                "i64::MAX",
            ));
        }

        for (field, ratio) in [
            ("text_quality.min_alphanumeric_ratio", self.text_quality.min_alphanumeric_ratio),
            ("text_quality.max_space_ratio", self.text_quality.max_space_ratio),
            ("text_quality.min_printable_ratio", self.text_quality.min_printable_ratio),
            ("text_quality.max_special_char_ratio", self.text_quality.max_special_char_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(out_of_range(field, &ratio.to_string(), "0.0", "1.0"));
            }
        }

        self.detection.validate()?;
        for pii_type in &self.pii_types {
            pii_type.validate()?;
        }

        Ok(())
    }

    /// The 32-byte key-encryption-key, for handing to `CryptoService::new`.
    /// Copies out of the zeroize-guarded buffer; the caller becomes
    /// responsible for the copy's lifetime.
    pub fn kek_bytes(&self) -> [u8; 32] {
        *self.kek
    }

    /// `cache.refresh_interval_ms` as a [`Duration`].
    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.cache.refresh_interval_ms)
    }

    /// `cache.initial_delay_ms` as a [`Duration`].
    pub fn cache_initial_delay(&self) -> Duration {
        Duration::from_millis(self.cache.initial_delay_ms)
    }

    /// `timeouts.pii_detection_ms` as a [`Duration`].
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.pii_detection_ms)
    }
}

impl std::fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanConfig")
            .field("kek", &"<redacted>")
            .field("cache", &self.cache)
            .field("scan_parallelism", &self.scan_parallelism)
            .field("timeouts", &self.timeouts)
            .field("event_bus", &self.event_bus)
            .field("audit", &self.audit)
            .field("allow_secret_reveal", &self.allow_secret_reveal)
            .field("text_quality", &self.text_quality)
            .field("detection", &self.detection)
            .field("pii_types", &self.pii_types)
            .finish()
    }
}

fn out_of_range(field: &'static str, value: &str, min: &str, max: &str) -> ConfigInvalid {
    ConfigInvalid::OutOfRange {
        field,
        value: value.to_string(),
        min: min.to_string(),
        max: max.to_string(),
    }
}

fn decode_kek(raw: &Secret<String>) -> Result<Zeroizing<[u8; 32]>, ConfigInvalid> {
    let mut decoded = BASE64.decode(raw.expose_secret().trim()).map_err(|_| {
        ConfigInvalid::OutOfRange {
            field: "kek_b64",
            value: "<redacted, invalid base64>".to_string(),
            min: "32 bytes".to_string(),
            max: "32 bytes".to_string(),
        }
    })?;

    if decoded.len() != 32 {
        let len = decoded.len();
        decoded.zeroize();
        return Err(ConfigInvalid::OutOfRange {
            field: "kek_b64",
            value: format!("{len} bytes"),
            min: "32".to_string(),
            max: "32".to_string(),
        });
    }

    let mut buf = [0u8; 32];
    buf.copy_from_slice(&decoded);
    decoded.zeroize();
    Ok(Zeroizing::new(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_env(pairs: &[(&str, &str)]) {
        for (k, v) in pairs {
            std::env::set_var(k, v);
        }
    }

    fn clear_env(keys: &[&str]) {
        for k in keys {
            std::env::remove_var(k);
        }
    }

    const REQUIRED_KEYS: &[&str] = &[
        "PII_SCAN_KEK_B64",
        "PII_SCAN_CACHE__REFRESH_INTERVAL_MS",
        "PII_SCAN_SCAN_PARALLELISM",
    ];

    #[test]
    fn loads_with_defaults_plus_required_kek() {
        clear_env(REQUIRED_KEYS);
        set_env(&[("PII_SCAN_KEK_B64", &BASE64.encode([1u8; 32]))]);
        let config = ScanConfig::load().unwrap();
        assert_eq!(config.scan_parallelism, 1);
        assert_eq!(config.kek_bytes(), [1u8; 32]);
        clear_env(REQUIRED_KEYS);
    }

    #[test]
    fn rejects_zero_parallelism() {
        clear_env(REQUIRED_KEYS);
        set_env(&[
            ("PII_SCAN_KEK_B64", &BASE64.encode([1u8; 32])),
            ("PII_SCAN_SCAN_PARALLELISM", "0"),
        ]);
        let result = ScanConfig::load();
        assert!(matches!(result, Err(ConfigInvalid::OutOfRange { field: "scan_parallelism", .. })));
        clear_env(REQUIRED_KEYS);
    }

    #[test]
    fn rejects_malformed_kek_length() {
        clear_env(REQUIRED_KEYS);
        set_env(&[("PII_SCAN_KEK_B64", &BASE64.encode([1u8; 16]))]);
        let result = ScanConfig::load();
        assert!(matches!(result, Err(ConfigInvalid::OutOfRange { field: "kek_b64", .. })));
        clear_env(REQUIRED_KEYS);
    }

    #[test]
    fn env_override_beats_default() {
        clear_env(REQUIRED_KEYS);
        set_env(&[
            ("PII_SCAN_KEK_B64", &BASE64.encode([1u8; 32])),
            ("PII_SCAN_CACHE__REFRESH_INTERVAL_MS", "5000"),
        ]);
        let config = ScanConfig::load().unwrap();
        assert_eq!(config.cache.refresh_interval_ms, 5000);
        clear_env(REQUIRED_KEYS);
    }
}

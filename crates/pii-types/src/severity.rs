use serde::{Deserialize, Serialize};

/// Severity bucket assigned to a detected PII type.
///
/// Assignment is by the fixed table in [`severity_for`]; there is no way to
/// construct a `Severity` outside that table, which keeps the mapping the
/// single source of truth for both live events and aggregated counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Secrets, financial and medical identifiers.
    High,
    /// Official documents and dates of birth.
    Medium,
    /// Contact, name, and location data; also the default for unknown types.
    Low,
}

const HIGH_TYPES: &[&str] = &[
    "PASSWORD",
    "CREDIT_CARD",
    "API_KEY",
    "AWS_KEY",
    "JWT_TOKEN",
    "SSN",
    "US_SSN",
    "IBAN",
    "MEDICAL_LICENSE",
    "IN_AADHAAR",
    "BANK_ACCOUNT",
    "ACCOUNT_NUMBER",
];

const MEDIUM_TYPES: &[&str] = &[
    "US_DRIVER_LICENSE",
    "DRIVER_LICENSE",
    "PASSPORT",
    "US_PASSPORT",
    "TAX_ID",
    "NATIONAL_ID",
    "DATE_OF_BIRTH",
    "AGE",
];

/// Map a PII type name to its severity bucket.
///
/// Matching is case-insensitive after trimming whitespace. A type absent
/// from both tables defaults to [`Severity::Low`].
pub fn severity_for(pii_type: &str) -> Severity {
    let normalized = pii_type.trim().to_ascii_uppercase();
    if HIGH_TYPES.contains(&normalized.as_str()) {
        Severity::High
    } else if MEDIUM_TYPES.contains(&normalized.as_str()) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Aggregated severity counts for a (scan, space) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeverityCount {
    /// Count of HIGH severity entities.
    pub high: u64,
    /// Count of MEDIUM severity entities.
    pub medium: u64,
    /// Count of LOW severity entities.
    pub low: u64,
}

impl SeverityCount {
    /// Total number of entities represented by this count.
    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low
    }

    /// Add one occurrence of `severity` to the appropriate bucket.
    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_matching() {
        assert_eq!(severity_for("password"), Severity::High);
        assert_eq!(severity_for("  Password  "), Severity::High);
        assert_eq!(severity_for("PASSWORD"), Severity::High);
    }

    #[test]
    fn unknown_type_defaults_to_low() {
        assert_eq!(severity_for("PHONE_NUMBER"), Severity::Low);
        assert_eq!(severity_for(""), Severity::Low);
    }

    #[test]
    fn medium_table_covers_dates_of_birth() {
        assert_eq!(severity_for("DATE_OF_BIRTH"), Severity::Medium);
        assert_eq!(severity_for("AGE"), Severity::Medium);
    }

    #[test]
    fn severity_count_sums_to_total() {
        let mut count = SeverityCount::default();
        count.add(Severity::High);
        count.add(Severity::Low);
        count.add(Severity::Low);
        assert_eq!(count.total(), 3);
        assert_eq!(count, SeverityCount { high: 1, medium: 0, low: 2 });
    }
}

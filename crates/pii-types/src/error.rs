use thiserror::Error;

/// Validation and state-machine errors shared by every domain primitive in
/// this crate. Kept separate from the storage/transport error enums defined
/// downstream (`pii-store-core::StorageError`, etc.) so this crate has no
/// dependency on I/O concerns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// A string identifier exceeded its maximum allowed length.
    #[error("{field} too long: {len} > {max}")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Observed length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A required identifier was empty or all-whitespace.
    #[error("{field} cannot be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A numeric value fell outside its valid range.
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Observed value, formatted for display.
        value: String,
        /// Lower bound, formatted for display.
        min: String,
        /// Upper bound, formatted for display.
        max: String,
    },

    /// A state machine transition was attempted that is not part of the
    /// allowed arc set.
    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Source state, formatted for display.
        from: String,
        /// Target state, formatted for display.
        to: String,
    },
}

/// Convenience result alias for validation-fallible constructors in this crate.
pub type TypesResult<T> = std::result::Result<T, TypesError>;

//! Error types for record integrity and storage.

use thiserror::Error;

/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors produced while sealing, verifying or storing records.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordError {
    /// The stored fingerprint does not match the record's content.
    ///
    /// Never corrected automatically: the mismatch is evidence that the
    /// record changed after issuance.
    #[error("Integrity violation: stored hash {stored} does not match computed {computed}")]
    IntegrityViolation {
        /// The fingerprint persisted at issuance.
        stored: String,
        /// The fingerprint recomputed from the current fields.
        computed: String,
    },

    /// The record carries no fingerprint at all.
    #[error("Integrity violation: record has no stored hash")]
    MissingFingerprint,

    /// No record with the given identifier exists.
    #[error("Record not found: {id}")]
    NotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// A record could not be converted to its canonical form.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record's fields are invalid for the requested operation.
    #[error("Invalid record: {0}")]
    Invalid(String),
}

impl RecordError {
    /// Returns `true` for either flavour of integrity failure.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation { .. } | Self::MissingFingerprint)
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

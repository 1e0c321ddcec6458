//! Error types for the record access service.

use ehealth_ledger::AccessDecision;
use ehealth_records::{RecordError, RecordId};
use ehealth_wallet::WalletError;
use thiserror::Error;

/// Result type alias for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Why an access-controlled operation was refused or failed.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The requesting doctor has no linked wallet. No ledger call was made.
    #[error("Doctor wallet not linked")]
    DoctorWalletNotLinked {
        /// The doctor.
        doctor_id: String,
    },

    /// The patient has no linked wallet. No ledger call was made.
    #[error("Patient wallet not linked")]
    PatientWalletNotLinked {
        /// The patient.
        patient_id: String,
    },

    /// The ledger did not authorize the read.
    ///
    /// `decision` distinguishes a missing consent from an unavailable
    /// ledger; both deny.
    #[error("Access denied: {decision}")]
    AccessDenied {
        /// The consent decision.
        decision: AccessDecision,
    },

    /// A prescription was issued against an appointment that does not exist,
    /// belongs to another doctor, or is not accepted.
    #[error("Invalid appointment {appointment_id}")]
    InvalidAppointment {
        /// The appointment named in the request.
        appointment_id: String,
    },

    /// A stored record no longer matches its fingerprint.
    #[error("Record {record_id} failed integrity verification: {source}")]
    IntegrityViolation {
        /// The offending record.
        record_id: RecordId,
        /// The verification failure.
        #[source]
        source: RecordError,
    },

    /// Record creation or storage failed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Wallet resolution failed.
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl AccessError {
    /// Returns `true` if the ledger could not be consulted, as opposed to
    /// consent being absent.
    #[must_use]
    pub fn is_ledger_unavailable(&self) -> bool {
        matches!(self, Self::AccessDenied { decision: AccessDecision::Unavailable { .. } })
    }

    /// Returns `true` for integrity failures.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation { .. })
    }
}

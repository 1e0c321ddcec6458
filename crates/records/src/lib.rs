//! Tamper-evident clinical records.
//!
//! Every record is sealed at issuance with a [`Fingerprint`]: the SHA-256
//! digest of its canonical encoding, creation timestamp included. Readers
//! re-derive the fingerprint and compare; any difference surfaces as
//! [`RecordError::IntegrityViolation`] and is never corrected in place.
//!
//! # Canonical Form
//!
//! Compact JSON, object keys sorted by byte order at every depth, the
//! top-level `hash` field removed, timestamps rendered as
//! `YYYY-MM-DDTHH:MM:SS.ffffffZ` in UTC. See [`canonical`].
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables `MemoryRecordStore::tamper` so other crates can simulate direct
//!   edits to the document store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod canonical;
pub mod error;
pub mod fingerprint;
pub mod prescription;
pub mod store;

/// Error types.
pub use error::{RecordError, Result};
/// Fingerprinting and verification.
pub use fingerprint::{Fingerprint, IntegrityProtected, canonical_form, fingerprint, verify};
/// The prescription document model.
pub use prescription::{ClinicalContent, Medicine, Prescription, Provenance, RecordSource};
/// Document-store seams and in-memory implementations.
pub use store::{
    Appointment, AppointmentStatus, AppointmentStore, MemoryAppointmentStore, MemoryRecordStore,
    RecordId, RecordStore, StoredPrescription,
};

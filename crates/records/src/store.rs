//! Document-store seam for records and appointments.
//!
//! The production document store is an external collaborator; this module
//! defines the narrow CRUD surface the access service consumes and an
//! in-memory implementation for tests and development.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{RecordError, Result},
    prescription::Prescription,
};

/// Opaque identifier assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh 24-hex-character identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; 12]>()))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A prescription together with its store identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPrescription {
    /// Store identifier.
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// The record as persisted.
    #[serde(flatten)]
    pub prescription: Prescription,
}

/// Persistence for prescription records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a sealed record and returns its identifier.
    async fn insert(&self, prescription: Prescription) -> Result<RecordId>;

    /// Fetches one record.
    async fn get(&self, id: &RecordId) -> Result<Option<StoredPrescription>>;

    /// Fetches every record of `patient_id`, newest first.
    async fn find_by_patient(&self, patient_id: &str) -> Result<Vec<StoredPrescription>>;

    /// Fetches every record issued by `doctor_id`, newest first.
    async fn find_by_doctor(&self, doctor_id: &str) -> Result<Vec<StoredPrescription>>;
}

/// In-memory [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordId, Prescription>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Mutates a stored record in place, bypassing the issuance path.
    ///
    /// Simulates direct tampering with the document store.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NotFound`] if `id` is unknown.
    #[cfg(any(test, feature = "testutil"))]
    pub fn tamper(&self, id: &RecordId, mutate: impl FnOnce(&mut Prescription)) -> Result<()> {
        let mut records = self.records.write();
        let record =
            records.get_mut(id).ok_or_else(|| RecordError::NotFound { id: id.to_string() })?;
        mutate(record);
        Ok(())
    }

    fn select(&self, matches: impl Fn(&Prescription) -> bool) -> Vec<StoredPrescription> {
        let mut found: Vec<StoredPrescription> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| matches(record))
            .map(|(id, record)| StoredPrescription { id: id.clone(), prescription: record.clone() })
            .collect();
        found.sort_by(|a, b| {
            b.prescription.created_at.cmp(&a.prescription.created_at).then_with(|| a.id.cmp(&b.id))
        });
        found
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, prescription: Prescription) -> Result<RecordId> {
        if prescription.hash().is_none() {
            return Err(RecordError::Invalid("refusing to store an unsealed record".into()));
        }
        let id = RecordId::generate();
        self.records.write().insert(id.clone(), prescription);
        Ok(id)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<StoredPrescription>> {
        Ok(self
            .records
            .read()
            .get(id)
            .map(|record| StoredPrescription { id: id.clone(), prescription: record.clone() }))
    }

    async fn find_by_patient(&self, patient_id: &str) -> Result<Vec<StoredPrescription>> {
        Ok(self.select(|record| record.patient_id == patient_id))
    }

    async fn find_by_doctor(&self, doctor_id: &str) -> Result<Vec<StoredPrescription>> {
        Ok(self.select(|record| record.doctor_id == doctor_id))
    }
}

/// Appointment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    /// Requested by the patient.
    Pending,
    /// Accepted by the doctor; prescriptions may be issued against it.
    Accepted,
    /// Declined by the doctor.
    Rejected,
    /// Finished.
    Completed,
}

/// An appointment between a patient and a doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    /// Store identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Patient.
    pub patient_id: String,
    /// Doctor.
    pub doctor_id: String,
    /// Hospital.
    pub hospital_id: String,
    /// Current state.
    pub status: AppointmentStatus,
}

/// Read access to appointments.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Returns the appointment if it exists, belongs to `doctor_id` and is
    /// accepted.
    async fn accepted_appointment(
        &self,
        appointment_id: &str,
        doctor_id: &str,
    ) -> Result<Option<Appointment>>;
}

/// In-memory [`AppointmentStore`].
#[derive(Debug, Default)]
pub struct MemoryAppointmentStore {
    appointments: RwLock<HashMap<String, Appointment>>,
}

impl MemoryAppointmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an appointment.
    pub fn upsert(&self, appointment: Appointment) {
        self.appointments.write().insert(appointment.id.clone(), appointment);
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn accepted_appointment(
        &self,
        appointment_id: &str,
        doctor_id: &str,
    ) -> Result<Option<Appointment>> {
        Ok(self
            .appointments
            .read()
            .get(appointment_id)
            .filter(|a| a.doctor_id == doctor_id && a.status == AppointmentStatus::Accepted)
            .cloned())
    }
}

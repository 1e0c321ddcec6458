//! The consent-gated record access service.
//!
//! A doctor's read of a patient's records follows one path:
//!
//! ```text
//! resolve wallets ──→ check consent (blocking) ──→ dispatch audit (queued)
//!       │                    │                            │
//!  not linked           denied/unavailable          fetch + verify records
//!       ▼                    ▼                            ▼
//!   AccessError          AccessError               records or IntegrityViolation
//! ```
//!
//! The audit entry is queued before the records are fetched and the
//! response never waits for it. The creation paths seal every record with
//! its fingerprint before it reaches the store.

use std::sync::Arc;

use chrono::Utc;
use ehealth_ledger::{AccessLogger, Address, ConsentOracle};
use ehealth_records::{
    AppointmentStore, ClinicalContent, Prescription, Provenance, RecordId, RecordStore,
    StoredPrescription,
};
use ehealth_wallet::{UserId, WalletBindingStore};

use crate::error::{AccessError, Result};

/// Resource identifier recorded on the ledger for a doctor's read.
#[must_use]
pub fn view_records_resource(patient_id: &UserId) -> String {
    format!("View Records of {patient_id}")
}

/// A doctor's prescription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrescriptionRequest {
    /// The patient.
    pub patient_id: UserId,
    /// The accepted appointment the prescription belongs to.
    pub appointment_id: String,
    /// Clinical content.
    pub content: ClinicalContent,
}

/// A freshly stored record and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRecord {
    /// Store identifier.
    pub id: RecordId,
    /// Fingerprint sealed at issuance.
    pub hash: String,
}

/// Mediates every access to patient records.
pub struct RecordAccessService {
    wallets: Arc<dyn WalletBindingStore>,
    consent: Arc<dyn ConsentOracle>,
    audit: Arc<AccessLogger>,
    records: Arc<dyn RecordStore>,
    appointments: Arc<dyn AppointmentStore>,
}

#[bon::bon]
impl RecordAccessService {
    /// Creates the service from its collaborators.
    #[builder]
    pub fn new(
        wallets: Arc<dyn WalletBindingStore>,
        consent: Arc<dyn ConsentOracle>,
        audit: Arc<AccessLogger>,
        records: Arc<dyn RecordStore>,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Self {
        Self { wallets, consent, audit, records, appointments }
    }

    /// Returns a patient's records to a doctor the patient has granted
    /// access on the ledger.
    ///
    /// Once consent is confirmed, exactly one audit entry with resource
    /// `"View Records of {patient_id}"` is queued. The entry is queued before
    /// the records are fetched and verified, so a read refused with
    /// [`AccessError::IntegrityViolation`] or a store failure is still
    /// audited. Reads refused for missing wallets or consent queue nothing.
    ///
    /// # Errors
    ///
    /// - [`AccessError::DoctorWalletNotLinked`] /
    ///   [`AccessError::PatientWalletNotLinked`] before any ledger call
    /// - [`AccessError::AccessDenied`] without consent or when the ledger is
    ///   unavailable
    /// - [`AccessError::IntegrityViolation`] if any returned record no
    ///   longer matches its fingerprint
    #[tracing::instrument(skip_all, fields(doctor_id = %doctor_id, patient_id = %patient_id))]
    pub async fn view_patient_records(
        &self,
        doctor_id: &UserId,
        patient_id: &UserId,
    ) -> Result<Vec<StoredPrescription>> {
        let doctor = self
            .wallet_of(doctor_id)
            .await?
            .ok_or_else(|| AccessError::DoctorWalletNotLinked { doctor_id: doctor_id.to_string() })?;
        let patient = self.wallet_of(patient_id).await?.ok_or_else(|| {
            AccessError::PatientWalletNotLinked { patient_id: patient_id.to_string() }
        })?;

        let decision = self.consent.check_access_detailed(patient, doctor).await;
        if !decision.is_authorized() {
            tracing::warn!(
                audit.action = "view_patient_records",
                audit.resource = %patient_id,
                audit.result = "denied",
                patient = %patient,
                doctor = %doctor,
                %decision,
                "audit_event",
            );
            return Err(AccessError::AccessDenied { decision });
        }

        self.audit.dispatch(patient, doctor, view_records_resource(patient_id)).await;

        let records = self.records.find_by_patient(patient_id.as_str()).await?;
        verify_all(&records)?;
        tracing::debug!(count = records.len(), "patient records released");
        Ok(records)
    }

    /// Issues a doctor's prescription against an accepted appointment.
    ///
    /// # Errors
    ///
    /// - [`AccessError::InvalidAppointment`] unless the appointment exists,
    ///   belongs to `doctor_id` and is accepted
    /// - [`AccessError::Record`] for blank content or store failures
    #[tracing::instrument(skip_all, fields(doctor_id = %doctor_id, appointment_id = %request.appointment_id))]
    pub async fn issue_prescription(
        &self,
        doctor_id: &UserId,
        request: PrescriptionRequest,
    ) -> Result<IssuedRecord> {
        let appointment = self
            .appointments
            .accepted_appointment(&request.appointment_id, doctor_id.as_str())
            .await?
            .ok_or_else(|| AccessError::InvalidAppointment {
                appointment_id: request.appointment_id.clone(),
            })?;

        let provenance = Provenance::Doctor {
            doctor_id: doctor_id.to_string(),
            hospital_id: appointment.hospital_id,
            appointment_id: request.appointment_id,
        };
        let record =
            Prescription::seal(request.patient_id.as_str(), provenance, request.content, Utc::now())?;
        self.store(record).await
    }

    /// Stores a patient's self-reported record.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Record`] for blank content or store failures.
    #[tracing::instrument(skip_all, fields(patient_id = %patient_id))]
    pub async fn upload_patient_record(
        &self,
        patient_id: &UserId,
        content: ClinicalContent,
    ) -> Result<IssuedRecord> {
        let record =
            Prescription::seal(patient_id.as_str(), Provenance::PatientUpload, content, Utc::now())?;
        self.store(record).await
    }

    /// Returns a patient's own records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::IntegrityViolation`] if any record no longer
    /// matches its fingerprint.
    pub async fn own_records(&self, patient_id: &UserId) -> Result<Vec<StoredPrescription>> {
        let records = self.records.find_by_patient(patient_id.as_str()).await?;
        verify_all(&records)?;
        Ok(records)
    }

    /// Returns every record a doctor issued, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::IntegrityViolation`] if any record no longer
    /// matches its fingerprint.
    pub async fn issued_records(&self, doctor_id: &UserId) -> Result<Vec<StoredPrescription>> {
        let records = self.records.find_by_doctor(doctor_id.as_str()).await?;
        verify_all(&records)?;
        Ok(records)
    }

    async fn wallet_of(&self, user_id: &UserId) -> Result<Option<Address>> {
        Ok(self.wallets.get(user_id).await?.map(|binding| binding.wallet_address))
    }

    async fn store(&self, record: Prescription) -> Result<IssuedRecord> {
        let hash = record.hash().unwrap_or_default().to_owned();
        let source = record.source;
        let id = self.records.insert(record).await?;
        tracing::info!(record_id = %id, %source, hash = %hash, "record sealed and stored");
        Ok(IssuedRecord { id, hash })
    }
}

fn verify_all(records: &[StoredPrescription]) -> Result<()> {
    for stored in records {
        if let Err(source) = stored.prescription.verify() {
            tracing::error!(
                record_id = %stored.id,
                error = %source,
                "stored record failed integrity verification",
            );
            return Err(AccessError::IntegrityViolation { record_id: stored.id.clone(), source });
        }
    }
    Ok(())
}

impl std::fmt::Debug for RecordAccessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordAccessService").field("audit", &self.audit).finish_non_exhaustive()
    }
}

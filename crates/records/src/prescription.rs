//! Prescription records.
//!
//! A [`Prescription`] is sealed exactly once, at issuance, by
//! [`Prescription::seal`]: the creation timestamp is fixed and the
//! fingerprint over every other field is stored in `hash`. No method
//! recomputes or replaces the stored hash afterwards.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    canonical::canonical_timestamp,
    error::{RecordError, Result},
    fingerprint::{self, Fingerprint, IntegrityProtected},
};

/// Display label used as the doctor id of patient uploads.
pub const SELF_REPORTED_DOCTOR_ID: &str = "Self";

/// Display label for the doctor of patient uploads.
pub const SELF_REPORTED_DOCTOR_NAME: &str = "Self Reported";

/// Display label for the hospital of patient uploads.
pub const SELF_REPORTED_HOSPITAL_NAME: &str = "Personal Record";

/// One prescribed medicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    /// Medicine name.
    pub name: String,
    /// Dose per administration.
    pub dosage: String,
    /// How often to take it.
    pub frequency: String,
    /// For how long.
    pub duration: String,
}

/// Who created a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordSource {
    /// Issued by a doctor against an accepted appointment.
    Doctor,
    /// Self-reported by the patient.
    PatientUpload,
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Doctor => "DOCTOR",
            Self::PatientUpload => "PATIENT_UPLOAD",
        })
    }
}

/// The clinical payload shared by every record source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClinicalContent {
    /// Diagnosis text.
    pub diagnosis: String,
    /// Prescribed medicines.
    pub medicines: Vec<Medicine>,
    /// Free-form notes.
    pub notes: Option<String>,
}

/// Where a new record comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// A doctor issuing against an accepted appointment.
    Doctor {
        /// Issuing doctor.
        doctor_id: String,
        /// Hospital of the appointment.
        hospital_id: String,
        /// The accepted appointment.
        appointment_id: String,
    },
    /// The patient uploading their own record.
    PatientUpload,
}

/// A stored prescription document.
///
/// Field names serialize in camelCase to match the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    /// Patient the record belongs to.
    pub patient_id: String,
    /// Issuing doctor, or [`SELF_REPORTED_DOCTOR_ID`] for uploads.
    pub doctor_id: String,
    /// Hospital of the appointment; absent for uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    /// The appointment the prescription was issued against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    /// Diagnosis text.
    pub diagnosis: String,
    /// Prescribed medicines.
    pub medicines: Vec<Medicine>,
    /// Free-form notes; serialized as `null` when absent.
    #[serde(default)]
    pub notes: Option<String>,
    /// Display label for uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    /// Display label for uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_name: Option<String>,
    /// Issuance instant, microsecond precision.
    #[serde(with = "canonical_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Record source.
    pub source: RecordSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl Prescription {
    /// Creates a record and seals it with its fingerprint.
    ///
    /// `created_at` is truncated to microseconds, the precision the stored
    /// form keeps, so the fingerprint survives a round trip through storage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Invalid`] if `patient_id` or the diagnosis is
    /// blank.
    pub fn seal(
        patient_id: impl Into<String>,
        provenance: Provenance,
        content: ClinicalContent,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let patient_id = patient_id.into();
        if patient_id.trim().is_empty() {
            return Err(RecordError::Invalid("patient id is empty".into()));
        }
        if content.diagnosis.trim().is_empty() {
            return Err(RecordError::Invalid("diagnosis is empty".into()));
        }

        let ClinicalContent { diagnosis, medicines, notes } = content;
        let mut record = match provenance {
            Provenance::Doctor { doctor_id, hospital_id, appointment_id } => Self {
                patient_id,
                doctor_id,
                hospital_id: Some(hospital_id),
                appointment_id: Some(appointment_id),
                diagnosis,
                medicines,
                notes,
                doctor_name: None,
                hospital_name: None,
                created_at: created_at.trunc_subsecs(6),
                source: RecordSource::Doctor,
                hash: None,
            },
            Provenance::PatientUpload => Self {
                patient_id,
                doctor_id: SELF_REPORTED_DOCTOR_ID.to_owned(),
                hospital_id: None,
                appointment_id: None,
                diagnosis,
                medicines,
                notes,
                doctor_name: Some(SELF_REPORTED_DOCTOR_NAME.to_owned()),
                hospital_name: Some(SELF_REPORTED_HOSPITAL_NAME.to_owned()),
                created_at: created_at.trunc_subsecs(6),
                source: RecordSource::PatientUpload,
                hash: None,
            },
        };

        record.hash = Some(fingerprint::fingerprint(&record)?.to_hex());
        Ok(record)
    }

    /// Returns the fingerprint stored at issuance.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Recomputes the fingerprint and compares it with the stored one.
    ///
    /// # Errors
    ///
    /// See [`fingerprint::verify`].
    pub fn verify(&self) -> Result<Fingerprint> {
        fingerprint::verify(self)
    }
}

impl IntegrityProtected for Prescription {
    fn stored_hash(&self) -> Option<&str> {
        self.hash()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    use super::*;

    fn content(diagnosis: &str) -> ClinicalContent {
        ClinicalContent {
            diagnosis: diagnosis.into(),
            medicines: vec![Medicine {
                name: "Paracetamol".into(),
                dosage: "500mg".into(),
                frequency: "twice daily".into(),
                duration: "5 days".into(),
            }],
            notes: None,
        }
    }

    fn doctor() -> Provenance {
        Provenance::Doctor {
            doctor_id: "d1".into(),
            hospital_id: "h1".into(),
            appointment_id: "a1".into(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn sealed_record_verifies() {
        let record = Prescription::seal("p1", doctor(), content("flu"), at()).unwrap();
        assert_eq!(record.hash().map(str::len), Some(64));
        assert_eq!(record.verify().unwrap().to_hex(), record.hash().unwrap());
    }

    #[test]
    fn serialized_shape() {
        let record =
            Prescription::seal("p1", Provenance::PatientUpload, content("flu"), at()).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["patientId"], "p1");
        assert_eq!(value["doctorId"], "Self");
        assert_eq!(value["doctorName"], "Self Reported");
        assert_eq!(value["hospitalName"], "Personal Record");
        assert_eq!(value["source"], "PATIENT_UPLOAD");
        assert_eq!(value["createdAt"], "2024-05-01T09:00:00.000000Z");
        assert!(value["notes"].is_null());
        assert!(value.get("hospitalId").is_none());
        assert_eq!(value["hash"], record.hash().unwrap());
    }

    #[test]
    fn different_timestamps_differ() {
        let one = Prescription::seal("p1", doctor(), content("flu"), at()).unwrap();
        let two = Prescription::seal("p1", doctor(), content("flu"), at() + Duration::microseconds(1))
            .unwrap();
        assert_ne!(one.hash(), two.hash());
    }

    #[test]
    fn survives_storage_round_trip() {
        let created = at() + Duration::nanoseconds(123_456_789);
        let record = Prescription::seal("p1", doctor(), content("flu"), created).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let restored: Prescription = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
        assert!(restored.verify().is_ok());
    }

    #[rstest]
    #[case::diagnosis(|r: &mut Prescription| r.diagnosis = "pneumonia".into())]
    #[case::notes(|r: &mut Prescription| r.notes = Some("edited".into()))]
    #[case::medicine(|r: &mut Prescription| r.medicines[0].dosage = "1000mg".into())]
    #[case::created_at(|r: &mut Prescription| r.created_at += Duration::seconds(1))]
    #[case::source(|r: &mut Prescription| r.source = RecordSource::PatientUpload)]
    fn any_field_change_is_detected(#[case] mutate: fn(&mut Prescription)) {
        let mut record = Prescription::seal("p1", doctor(), content("flu"), at()).unwrap();
        mutate(&mut record);
        assert!(matches!(record.verify(), Err(RecordError::IntegrityViolation { .. })));
    }

    #[test]
    fn stored_document_without_hash_fails_verification() {
        let json = r#"{"patientId":"p1","doctorId":"d1","diagnosis":"flu","medicines":[],
            "createdAt":"2024-05-01T09:00:00.000000Z","source":"DOCTOR"}"#;
        let record: Prescription = serde_json::from_str(json).unwrap();
        assert_eq!(record.verify(), Err(RecordError::MissingFingerprint));
    }

    #[rstest]
    #[case::blank_patient(" ", "flu")]
    #[case::blank_diagnosis("p1", "")]
    fn rejects_blank_fields(#[case] patient: &str, #[case] diagnosis: &str) {
        let err = Prescription::seal(patient, doctor(), content(diagnosis), at()).unwrap_err();
        assert!(matches!(err, RecordError::Invalid(_)));
    }
}

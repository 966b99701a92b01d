//! Generic query interface to the relational store.
//!
//! Stores enforce structure (keys, enumerations, uniqueness, defaults) but
//! know nothing about callers; authorization happens in [`crate::service`]
//! before a store is reached.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::{EhrError, Result};
use crate::models::*;
use crate::policy::Table;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Row filter for `select_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    All,
    Id(Uuid),
    /// Rows belonging to a patient
    Patient(Uuid),
    /// Rows hanging off a medical record
    MedicalRecord(Uuid),
    /// Rows attributed to a staff member: the doctor for appointments,
    /// records and prescriptions; the recorder for vitals; the orderer for
    /// lab results
    Staff(Uuid),
}

/// Sort direction on the table's natural timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

pub(crate) fn unsupported(table: Table, filter: Filter) -> EhrError {
    EhrError::validation("filter", format!("{:?} is not supported on {}", filter, table))
}

/// Take the single row of a by-id select.
pub fn first<T>(rows: Vec<T>) -> Result<T> {
    rows.into_iter().next().ok_or(EhrError::NotFound)
}

pub trait Store: Send + Sync {
    /// Identity binding lookup; not subject to read policies.
    fn find_staff_by_user(&self, user_id: Uuid) -> Result<Option<Staff>>;

    fn select_staff(&self, filter: Filter, order: SortOrder) -> Result<Vec<Staff>>;
    fn insert_staff(&self, row: NewStaff) -> Result<Staff>;
    fn update_staff(&self, id: Uuid, patch: StaffPatch) -> Result<Staff>;

    fn select_patients(&self, filter: Filter, order: SortOrder) -> Result<Vec<Patient>>;
    fn insert_patient(&self, row: NewPatient) -> Result<Patient>;
    fn update_patient(&self, id: Uuid, patch: PatientPatch) -> Result<Patient>;

    fn select_appointments(&self, filter: Filter, order: SortOrder) -> Result<Vec<Appointment>>;
    fn insert_appointment(&self, row: NewAppointment) -> Result<Appointment>;
    fn update_appointment(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment>;

    fn select_medical_records(&self, filter: Filter, order: SortOrder) -> Result<Vec<MedicalRecord>>;
    fn insert_medical_record(&self, row: NewMedicalRecord) -> Result<MedicalRecord>;
    fn update_medical_record(&self, id: Uuid, patch: MedicalRecordPatch) -> Result<MedicalRecord>;

    fn select_vitals(&self, filter: Filter, order: SortOrder) -> Result<Vec<Vital>>;
    fn insert_vital(&self, row: NewVital) -> Result<Vital>;
    fn update_vital(&self, id: Uuid, patch: VitalPatch) -> Result<Vital>;

    fn select_prescriptions(&self, filter: Filter, order: SortOrder) -> Result<Vec<Prescription>>;
    fn insert_prescription(&self, row: NewPrescription) -> Result<Prescription>;

    fn select_lab_results(&self, filter: Filter, order: SortOrder) -> Result<Vec<LabResult>>;
    fn insert_lab_result(&self, row: NewLabResult) -> Result<LabResult>;
    /// Apply `update` only while the row's status is still `expected`;
    /// a row that moved on in the meantime is a `Validation` error.
    fn update_lab_result(&self, id: Uuid, expected: LabStatus, update: LabResultUpdate) -> Result<LabResult>;
}

pub(crate) fn status_changed(now: LabStatus) -> EhrError {
    EhrError::validation("status", format!("lab result was updated concurrently and is now {}", now))
}

/// Reject negative vital readings, mirroring the column CHECK constraints.
pub(crate) fn check_readings(readings: &[(&'static str, Option<f64>)]) -> Result<()> {
    for (column, value) in readings {
        if let Some(v) = value {
            if *v < 0.0 || v.is_nan() {
                return Err(EhrError::validation(*column, "must be a non-negative number"));
            }
        }
    }
    Ok(())
}

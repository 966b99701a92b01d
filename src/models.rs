use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::policy::{Guarded, Table};
use crate::schema::{appointments, lab_results, medical_records, patients, prescriptions, staff, vitals};

/// A text column value outside its enumerated set.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed enumeration stored as a checked TEXT column.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[serde(rename_all = "snake_case")]
        #[diesel(sql_type = Text)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// Clinical or administrative role held by a staff member
    Role {
        Admin => "admin",
        Doctor => "doctor",
        Nurse => "nurse",
        Receptionist => "receptionist",
        LabTechnician => "lab_technician",
    }
}

text_enum! {
    Gender {
        Male => "male",
        Female => "female",
        Other => "other",
    }
}

text_enum! {
    AppointmentStatus {
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
        NoShow => "no_show",
    }
}

text_enum! {
    LabStatus {
        Pending => "pending",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::Scheduled
    }
}

impl Default for LabStatus {
    fn default() -> Self {
        LabStatus::Pending
    }
}

impl LabStatus {
    /// Completed and cancelled results accept no further status change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LabStatus::Completed | LabStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Staff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = staff)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Staff {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub role: Role,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub email: String,
    pub license_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = staff)]
pub struct NewStaff {
    pub user_id: Uuid,
    pub full_name: String,
    pub role: Role,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub email: String,
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = staff)]
pub struct StaffPatch {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub license_number: Option<String>,
}

impl StaffPatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.role.is_none()
            && self.specialization.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.license_number.is_none()
    }
}

// ---------------------------------------------------------------------------
// Patients
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = patients)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub national_id: String,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = patients)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub national_id: String,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = patients)]
pub struct PatientPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub national_id: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

impl PatientPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.date_of_birth.is_none()
            && self.gender.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.address.is_none()
            && self.national_id.is_none()
            && self.blood_type.is_none()
            && self.allergies.is_none()
            && self.emergency_contact_name.is_none()
            && self.emergency_contact_phone.is_none()
    }
}

// ---------------------------------------------------------------------------
// Appointments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `status` falls back to the column default (`scheduled`) when omitted.
#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = appointments)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub status: Option<AppointmentStatus>,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = appointments)]
pub struct AppointmentPatch {
    pub appointment_date: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.appointment_date.is_none()
            && self.status.is_none()
            && self.reason.is_none()
            && self.notes.is_none()
    }
}

// ---------------------------------------------------------------------------
// Medical records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = medical_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub visit_date: DateTime<Utc>,
    pub chief_complaint: String,
    pub diagnosis: String,
    pub treatment_plan: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record without `doctor_id` is attributed to the creating staff member.
#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = medical_records)]
pub struct NewMedicalRecord {
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub visit_date: Option<DateTime<Utc>>,
    pub chief_complaint: String,
    pub diagnosis: String,
    pub treatment_plan: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = medical_records)]
pub struct MedicalRecordPatch {
    pub chief_complaint: Option<String>,
    pub diagnosis: Option<String>,
    pub treatment_plan: Option<String>,
    pub notes: Option<String>,
}

impl MedicalRecordPatch {
    pub fn is_empty(&self) -> bool {
        self.chief_complaint.is_none()
            && self.diagnosis.is_none()
            && self.treatment_plan.is_none()
            && self.notes.is_none()
    }
}

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = vitals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Vital {
    pub id: Uuid,
    pub medical_record_id: Uuid,
    pub blood_pressure_systolic: Option<i32>,
    pub blood_pressure_diastolic: Option<i32>,
    pub heart_rate: Option<i32>,
    pub temperature: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub recorded_by: Uuid,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Insertable)]
#[diesel(table_name = vitals)]
pub struct NewVital {
    /// Filled from the route when posted under a medical record
    #[serde(default)]
    pub medical_record_id: Uuid,
    pub blood_pressure_systolic: Option<i32>,
    pub blood_pressure_diastolic: Option<i32>,
    pub heart_rate: Option<i32>,
    pub temperature: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    /// Always the recording staff member; never taken from the request.
    #[serde(skip_deserializing)]
    pub recorded_by: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, AsChangeset)]
#[diesel(table_name = vitals)]
pub struct VitalPatch {
    pub blood_pressure_systolic: Option<i32>,
    pub blood_pressure_diastolic: Option<i32>,
    pub heart_rate: Option<i32>,
    pub temperature: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
}

impl VitalPatch {
    pub fn is_empty(&self) -> bool {
        self.blood_pressure_systolic.is_none()
            && self.blood_pressure_diastolic.is_none()
            && self.heart_rate.is_none()
            && self.temperature.is_none()
            && self.weight.is_none()
            && self.height.is_none()
    }
}

/// Readings shared by new vitals and vital patches, keyed by column name.
pub(crate) fn vital_readings(
    systolic: Option<i32>,
    diastolic: Option<i32>,
    heart_rate: Option<i32>,
    temperature: Option<f64>,
    weight: Option<f64>,
    height: Option<f64>,
) -> [(&'static str, Option<f64>); 6] {
    [
        ("blood_pressure_systolic", systolic.map(f64::from)),
        ("blood_pressure_diastolic", diastolic.map(f64::from)),
        ("heart_rate", heart_rate.map(f64::from)),
        ("temperature", temperature),
        ("weight", weight),
        ("height", height),
    ]
}

impl NewVital {
    pub(crate) fn readings(&self) -> [(&'static str, Option<f64>); 6] {
        vital_readings(
            self.blood_pressure_systolic,
            self.blood_pressure_diastolic,
            self.heart_rate,
            self.temperature,
            self.weight,
            self.height,
        )
    }
}

impl VitalPatch {
    pub(crate) fn readings(&self) -> [(&'static str, Option<f64>); 6] {
        vital_readings(
            self.blood_pressure_systolic,
            self.blood_pressure_diastolic,
            self.heart_rate,
            self.temperature,
            self.weight,
            self.height,
        )
    }
}

// ---------------------------------------------------------------------------
// Prescriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = prescriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Prescription {
    pub id: Uuid,
    pub medical_record_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = prescriptions)]
pub struct NewPrescription {
    pub medical_record_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: Option<String>,
}

// ---------------------------------------------------------------------------
// Lab results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = lab_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LabResult {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub medical_record_id: Option<Uuid>,
    pub test_name: String,
    pub test_type: String,
    pub results: Option<String>,
    pub status: LabStatus,
    pub ordered_by: Uuid,
    pub performed_by: Option<Uuid>,
    pub ordered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A lab order. `status` may only be omitted or `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, Insertable)]
#[diesel(table_name = lab_results)]
pub struct NewLabResult {
    pub patient_id: Uuid,
    pub medical_record_id: Option<Uuid>,
    pub test_name: String,
    pub test_type: String,
    pub status: Option<LabStatus>,
    #[serde(skip_deserializing)]
    pub ordered_by: Option<Uuid>,
}

/// Fields a caller may submit against an existing lab result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabResultPatch {
    pub status: Option<LabStatus>,
    pub results: Option<String>,
}

impl LabResultPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.results.is_none()
    }
}

/// Column changes written for a lab result, including the fields derived
/// from a status transition.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = lab_results)]
pub struct LabResultUpdate {
    pub status: Option<LabStatus>,
    pub results: Option<String>,
    pub performed_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LabResultUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.results.is_none()
            && self.performed_by.is_none()
            && self.completed_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Policy bindings
// ---------------------------------------------------------------------------

impl Guarded for Staff {
    const TABLE: Table = Table::Staff;

    fn bound_identity(&self) -> Option<Uuid> {
        Some(self.user_id)
    }
}

impl Guarded for Patient {
    const TABLE: Table = Table::Patients;
}

impl Guarded for Appointment {
    const TABLE: Table = Table::Appointments;
}

impl Guarded for MedicalRecord {
    const TABLE: Table = Table::MedicalRecords;
}

impl Guarded for Vital {
    const TABLE: Table = Table::Vitals;
}

impl Guarded for Prescription {
    const TABLE: Table = Table::Prescriptions;
}

impl Guarded for LabResult {
    const TABLE: Table = Table::LabResults;
}

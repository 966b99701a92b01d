//! In-process store with the same constraint semantics as the Postgres
//! schema. Backs development mode and the test suite.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{check_readings, status_changed, unsupported, Filter, SortOrder, Store};
use crate::error::{EhrError, Result};
use crate::models::*;
use crate::policy::Table;

#[derive(Default)]
struct Tables {
    staff: Vec<Staff>,
    patients: Vec<Patient>,
    appointments: Vec<Appointment>,
    medical_records: Vec<MedicalRecord>,
    vitals: Vec<Vital>,
    prescriptions: Vec<Prescription>,
    lab_results: Vec<LabResult>,
}

/// Every call takes the single table lock, so each write's constraint
/// checks and mutation are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| EhrError::Storage("memory store lock poisoned".to_string()))
    }
}

fn sorted<T: Clone>(
    rows: &[T],
    keep: impl Fn(&T) -> bool,
    stamp: impl Fn(&T) -> DateTime<Utc>,
    order: SortOrder,
) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().filter(|r| keep(r)).cloned().collect();
    match order {
        SortOrder::Oldest => out.sort_by_key(|r| stamp(r)),
        SortOrder::Newest => {
            // later inserts win ties
            out.reverse();
            out.sort_by(|a, b| stamp(b).cmp(&stamp(a)));
        }
    }
    out
}

fn references<T>(rows: &[T], id: Uuid, key: impl Fn(&T) -> Uuid, column: &str) -> Result<()> {
    if rows.iter().any(|r| key(r) == id) {
        Ok(())
    } else {
        Err(EhrError::ReferentialIntegrity(column.to_string()))
    }
}

fn required(value: Option<Uuid>, column: &str) -> Result<Uuid> {
    value.ok_or_else(|| EhrError::validation(column, "null value violates not-null constraint"))
}

fn find_mut<T>(rows: &mut [T], id: Uuid, key: impl Fn(&T) -> Uuid) -> Result<&mut T> {
    rows.iter_mut().find(|r| key(r) == id).ok_or(EhrError::NotFound)
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn set_nullable<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl Store for MemoryStore {
    fn find_staff_by_user(&self, user_id: Uuid) -> Result<Option<Staff>> {
        let tables = self.lock()?;
        Ok(tables.staff.iter().find(|s| s.user_id == user_id).cloned())
    }

    fn select_staff(&self, filter: Filter, order: SortOrder) -> Result<Vec<Staff>> {
        let keep = match filter {
            Filter::All => None,
            Filter::Id(id) => Some(id),
            other => return Err(unsupported(Table::Staff, other)),
        };
        let tables = self.lock()?;
        Ok(sorted(
            &tables.staff,
            |s| keep.is_none_or(|id| s.id == id),
            |s| s.created_at,
            order,
        ))
    }

    fn insert_staff(&self, row: NewStaff) -> Result<Staff> {
        let mut tables = self.lock()?;
        if tables.staff.iter().any(|s| s.user_id == row.user_id) {
            return Err(EhrError::Uniqueness("staff_user_id_key".to_string()));
        }
        let now = Utc::now();
        let staff = Staff {
            id: Uuid::new_v4(),
            user_id: row.user_id,
            full_name: row.full_name,
            role: row.role,
            specialization: row.specialization,
            phone: row.phone,
            email: row.email,
            license_number: row.license_number,
            created_at: now,
            updated_at: now,
        };
        tables.staff.push(staff.clone());
        Ok(staff)
    }

    fn update_staff(&self, id: Uuid, patch: StaffPatch) -> Result<Staff> {
        let mut tables = self.lock()?;
        let staff = find_mut(&mut tables.staff, id, |s| s.id)?;
        set(&mut staff.full_name, patch.full_name);
        set(&mut staff.role, patch.role);
        set_nullable(&mut staff.specialization, patch.specialization);
        set_nullable(&mut staff.phone, patch.phone);
        set(&mut staff.email, patch.email);
        set_nullable(&mut staff.license_number, patch.license_number);
        staff.updated_at = Utc::now();
        Ok(staff.clone())
    }

    fn select_patients(&self, filter: Filter, order: SortOrder) -> Result<Vec<Patient>> {
        let keep = match filter {
            Filter::All => None,
            Filter::Id(id) | Filter::Patient(id) => Some(id),
            other => return Err(unsupported(Table::Patients, other)),
        };
        let tables = self.lock()?;
        Ok(sorted(
            &tables.patients,
            |p| keep.is_none_or(|id| p.id == id),
            |p| p.created_at,
            order,
        ))
    }

    fn insert_patient(&self, row: NewPatient) -> Result<Patient> {
        let mut tables = self.lock()?;
        if tables.patients.iter().any(|p| p.national_id == row.national_id) {
            return Err(EhrError::Uniqueness("patients_national_id_key".to_string()));
        }
        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            phone: row.phone,
            email: row.email,
            address: row.address,
            national_id: row.national_id,
            blood_type: row.blood_type,
            allergies: row.allergies,
            emergency_contact_name: row.emergency_contact_name,
            emergency_contact_phone: row.emergency_contact_phone,
            created_at: now,
            updated_at: now,
        };
        tables.patients.push(patient.clone());
        Ok(patient)
    }

    fn update_patient(&self, id: Uuid, patch: PatientPatch) -> Result<Patient> {
        let mut tables = self.lock()?;
        if let Some(national_id) = &patch.national_id {
            if tables.patients.iter().any(|p| p.id != id && &p.national_id == national_id) {
                return Err(EhrError::Uniqueness("patients_national_id_key".to_string()));
            }
        }
        let patient = find_mut(&mut tables.patients, id, |p| p.id)?;
        set(&mut patient.first_name, patch.first_name);
        set(&mut patient.last_name, patch.last_name);
        set(&mut patient.date_of_birth, patch.date_of_birth);
        set(&mut patient.gender, patch.gender);
        set_nullable(&mut patient.phone, patch.phone);
        set_nullable(&mut patient.email, patch.email);
        set_nullable(&mut patient.address, patch.address);
        set(&mut patient.national_id, patch.national_id);
        set_nullable(&mut patient.blood_type, patch.blood_type);
        set_nullable(&mut patient.allergies, patch.allergies);
        set_nullable(&mut patient.emergency_contact_name, patch.emergency_contact_name);
        set_nullable(&mut patient.emergency_contact_phone, patch.emergency_contact_phone);
        patient.updated_at = Utc::now();
        Ok(patient.clone())
    }

    fn select_appointments(&self, filter: Filter, order: SortOrder) -> Result<Vec<Appointment>> {
        if matches!(filter, Filter::MedicalRecord(_)) {
            return Err(unsupported(Table::Appointments, filter));
        }
        let tables = self.lock()?;
        Ok(sorted(
            &tables.appointments,
            |a| match filter {
                Filter::Id(id) => a.id == id,
                Filter::Patient(id) => a.patient_id == id,
                Filter::Staff(id) => a.doctor_id == id,
                _ => true,
            },
            |a| a.appointment_date,
            order,
        ))
    }

    fn insert_appointment(&self, row: NewAppointment) -> Result<Appointment> {
        let mut tables = self.lock()?;
        references(&tables.patients, row.patient_id, |p| p.id, "patient_id")?;
        references(&tables.staff, row.doctor_id, |s| s.id, "doctor_id")?;
        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            appointment_date: row.appointment_date,
            status: row.status.unwrap_or_default(),
            reason: row.reason,
            notes: row.notes,
            created_at: now,
            updated_at: now,
        };
        tables.appointments.push(appointment.clone());
        Ok(appointment)
    }

    fn update_appointment(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment> {
        let mut tables = self.lock()?;
        let appointment = find_mut(&mut tables.appointments, id, |a| a.id)?;
        set(&mut appointment.appointment_date, patch.appointment_date);
        set(&mut appointment.status, patch.status);
        set(&mut appointment.reason, patch.reason);
        set_nullable(&mut appointment.notes, patch.notes);
        appointment.updated_at = Utc::now();
        Ok(appointment.clone())
    }

    fn select_medical_records(&self, filter: Filter, order: SortOrder) -> Result<Vec<MedicalRecord>> {
        if matches!(filter, Filter::MedicalRecord(_)) {
            return Err(unsupported(Table::MedicalRecords, filter));
        }
        let tables = self.lock()?;
        Ok(sorted(
            &tables.medical_records,
            |m| match filter {
                Filter::Id(id) => m.id == id,
                Filter::Patient(id) => m.patient_id == id,
                Filter::Staff(id) => m.doctor_id == id,
                _ => true,
            },
            |m| m.visit_date,
            order,
        ))
    }

    fn insert_medical_record(&self, row: NewMedicalRecord) -> Result<MedicalRecord> {
        let mut tables = self.lock()?;
        let doctor_id = required(row.doctor_id, "doctor_id")?;
        references(&tables.patients, row.patient_id, |p| p.id, "patient_id")?;
        references(&tables.staff, doctor_id, |s| s.id, "doctor_id")?;
        if let Some(appointment_id) = row.appointment_id {
            references(&tables.appointments, appointment_id, |a| a.id, "appointment_id")?;
        }
        let now = Utc::now();
        let record = MedicalRecord {
            id: Uuid::new_v4(),
            patient_id: row.patient_id,
            doctor_id,
            appointment_id: row.appointment_id,
            visit_date: row.visit_date.unwrap_or(now),
            chief_complaint: row.chief_complaint,
            diagnosis: row.diagnosis,
            treatment_plan: row.treatment_plan,
            notes: row.notes,
            created_at: now,
            updated_at: now,
        };
        tables.medical_records.push(record.clone());
        Ok(record)
    }

    fn update_medical_record(&self, id: Uuid, patch: MedicalRecordPatch) -> Result<MedicalRecord> {
        let mut tables = self.lock()?;
        let record = find_mut(&mut tables.medical_records, id, |m| m.id)?;
        set(&mut record.chief_complaint, patch.chief_complaint);
        set(&mut record.diagnosis, patch.diagnosis);
        set(&mut record.treatment_plan, patch.treatment_plan);
        set_nullable(&mut record.notes, patch.notes);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn select_vitals(&self, filter: Filter, order: SortOrder) -> Result<Vec<Vital>> {
        if matches!(filter, Filter::Patient(_)) {
            return Err(unsupported(Table::Vitals, filter));
        }
        let tables = self.lock()?;
        Ok(sorted(
            &tables.vitals,
            |v| match filter {
                Filter::Id(id) => v.id == id,
                Filter::MedicalRecord(id) => v.medical_record_id == id,
                Filter::Staff(id) => v.recorded_by == id,
                _ => true,
            },
            |v| v.recorded_at,
            order,
        ))
    }

    fn insert_vital(&self, row: NewVital) -> Result<Vital> {
        check_readings(&row.readings())?;
        let mut tables = self.lock()?;
        let recorded_by = required(row.recorded_by, "recorded_by")?;
        references(&tables.medical_records, row.medical_record_id, |m| m.id, "medical_record_id")?;
        references(&tables.staff, recorded_by, |s| s.id, "recorded_by")?;
        let vital = Vital {
            id: Uuid::new_v4(),
            medical_record_id: row.medical_record_id,
            blood_pressure_systolic: row.blood_pressure_systolic,
            blood_pressure_diastolic: row.blood_pressure_diastolic,
            heart_rate: row.heart_rate,
            temperature: row.temperature,
            weight: row.weight,
            height: row.height,
            recorded_by,
            recorded_at: Utc::now(),
        };
        tables.vitals.push(vital.clone());
        Ok(vital)
    }

    fn update_vital(&self, id: Uuid, patch: VitalPatch) -> Result<Vital> {
        check_readings(&patch.readings())?;
        let mut tables = self.lock()?;
        let vital = find_mut(&mut tables.vitals, id, |v| v.id)?;
        set_nullable(&mut vital.blood_pressure_systolic, patch.blood_pressure_systolic);
        set_nullable(&mut vital.blood_pressure_diastolic, patch.blood_pressure_diastolic);
        set_nullable(&mut vital.heart_rate, patch.heart_rate);
        set_nullable(&mut vital.temperature, patch.temperature);
        set_nullable(&mut vital.weight, patch.weight);
        set_nullable(&mut vital.height, patch.height);
        Ok(vital.clone())
    }

    fn select_prescriptions(&self, filter: Filter, order: SortOrder) -> Result<Vec<Prescription>> {
        let tables = self.lock()?;
        Ok(sorted(
            &tables.prescriptions,
            |p| match filter {
                Filter::All => true,
                Filter::Id(id) => p.id == id,
                Filter::Patient(id) => p.patient_id == id,
                Filter::MedicalRecord(id) => p.medical_record_id == id,
                Filter::Staff(id) => p.doctor_id == id,
            },
            |p| p.created_at,
            order,
        ))
    }

    fn insert_prescription(&self, row: NewPrescription) -> Result<Prescription> {
        let mut tables = self.lock()?;
        let doctor_id = required(row.doctor_id, "doctor_id")?;
        references(&tables.medical_records, row.medical_record_id, |m| m.id, "medical_record_id")?;
        references(&tables.patients, row.patient_id, |p| p.id, "patient_id")?;
        references(&tables.staff, doctor_id, |s| s.id, "doctor_id")?;
        let prescription = Prescription {
            id: Uuid::new_v4(),
            medical_record_id: row.medical_record_id,
            patient_id: row.patient_id,
            doctor_id,
            medication_name: row.medication_name,
            dosage: row.dosage,
            frequency: row.frequency,
            duration: row.duration,
            instructions: row.instructions,
            created_at: Utc::now(),
        };
        tables.prescriptions.push(prescription.clone());
        Ok(prescription)
    }

    fn select_lab_results(&self, filter: Filter, order: SortOrder) -> Result<Vec<LabResult>> {
        let tables = self.lock()?;
        Ok(sorted(
            &tables.lab_results,
            |l| match filter {
                Filter::All => true,
                Filter::Id(id) => l.id == id,
                Filter::Patient(id) => l.patient_id == id,
                Filter::MedicalRecord(id) => l.medical_record_id == Some(id),
                Filter::Staff(id) => l.ordered_by == id,
            },
            |l| l.ordered_at,
            order,
        ))
    }

    fn insert_lab_result(&self, row: NewLabResult) -> Result<LabResult> {
        let status = row.status.unwrap_or_default();
        if status == LabStatus::Completed {
            return Err(EhrError::validation("completed_at", "completed results need a completion time"));
        }
        let mut tables = self.lock()?;
        let ordered_by = required(row.ordered_by, "ordered_by")?;
        references(&tables.patients, row.patient_id, |p| p.id, "patient_id")?;
        if let Some(record_id) = row.medical_record_id {
            references(&tables.medical_records, record_id, |m| m.id, "medical_record_id")?;
        }
        references(&tables.staff, ordered_by, |s| s.id, "ordered_by")?;
        let result = LabResult {
            id: Uuid::new_v4(),
            patient_id: row.patient_id,
            medical_record_id: row.medical_record_id,
            test_name: row.test_name,
            test_type: row.test_type,
            results: None,
            status,
            ordered_by,
            performed_by: None,
            ordered_at: Utc::now(),
            completed_at: None,
        };
        tables.lab_results.push(result.clone());
        Ok(result)
    }

    fn update_lab_result(&self, id: Uuid, expected: LabStatus, update: LabResultUpdate) -> Result<LabResult> {
        let mut tables = self.lock()?;
        if let Some(performer) = update.performed_by {
            references(&tables.staff, performer, |s| s.id, "performed_by")?;
        }
        let result = find_mut(&mut tables.lab_results, id, |l| l.id)?;
        if result.status != expected {
            return Err(status_changed(result.status));
        }
        let status = update.status.unwrap_or(result.status);
        let completed_at = update.completed_at.or(result.completed_at);
        if (status == LabStatus::Completed) != completed_at.is_some() {
            return Err(EhrError::validation(
                "completed_at",
                "must be set exactly when the result is completed",
            ));
        }
        result.status = status;
        result.completed_at = completed_at;
        set_nullable(&mut result.results, update.results);
        set_nullable(&mut result.performed_by, update.performed_by);
        Ok(result.clone())
    }
}

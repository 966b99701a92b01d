//! Role-gated data access.
//!
//! Every operation takes the caller explicitly, checks the policy for its
//! table before touching the store, and filters reads through the select
//! policy so rows a caller may not see behave exactly like missing rows.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EhrError, Result};
use crate::models::*;
use crate::policy::{self, Guarded, Operation, Table};
use crate::session::Caller;
use crate::store::{first, Filter, SortOrder, Store};

pub struct EhrService {
    store: Arc<dyn Store>,
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EhrError::validation(field, "must not be blank"));
    }
    Ok(())
}

fn require_text_opt(field: &str, value: Option<&String>) -> Result<()> {
    match value {
        Some(v) => require_text(field, v),
        None => Ok(()),
    }
}

fn require_changes(empty: bool) -> Result<()> {
    if empty {
        return Err(EhrError::validation("patch", "no fields to update"));
    }
    Ok(())
}

impl EhrService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        EhrService { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    fn authorize(&self, caller: &Caller, table: Table, operation: Operation) -> Result<()> {
        if policy::is_allowed(caller, table, operation, None) {
            return Ok(());
        }
        warn!(
            identity = %caller.identity(),
            role = caller.role().map(|r| r.as_str()).unwrap_or("none"),
            %table,
            %operation,
            "access denied"
        );
        Err(EhrError::Forbidden)
    }

    fn one<R: Guarded>(&self, caller: &Caller, rows: Vec<R>) -> Result<R> {
        first(policy::visible(caller, rows))
    }

    /// The staff member a write is attributed to.
    fn acting_staff(&self, caller: &Caller) -> Result<Uuid> {
        caller.staff_id().ok_or(EhrError::Forbidden)
    }

    // -- staff -------------------------------------------------------------

    /// The caller's own profile, `None` when the identity is unbound.
    pub fn my_profile(&self, caller: &Caller) -> Result<Option<Staff>> {
        let profile = self.store.find_staff_by_user(caller.identity())?;
        Ok(profile.filter(|s| policy::permits(caller, Operation::Select, s)))
    }

    pub fn list_staff(&self, caller: &Caller, order: SortOrder) -> Result<Vec<Staff>> {
        let rows = self.store.select_staff(Filter::All, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn get_staff(&self, caller: &Caller, id: Uuid) -> Result<Staff> {
        let rows = self.store.select_staff(Filter::Id(id), SortOrder::Newest)?;
        self.one(caller, rows)
    }

    pub fn create_staff(&self, caller: &Caller, row: NewStaff) -> Result<Staff> {
        self.authorize(caller, Table::Staff, Operation::Insert)?;
        require_text("full_name", &row.full_name)?;
        require_text("email", &row.email)?;
        let staff = self.store.insert_staff(row)?;
        info!(staff_id = %staff.id, role = %staff.role, "staff profile created");
        Ok(staff)
    }

    pub fn update_staff(&self, caller: &Caller, id: Uuid, patch: StaffPatch) -> Result<Staff> {
        self.authorize(caller, Table::Staff, Operation::Update)?;
        require_changes(patch.is_empty())?;
        require_text_opt("full_name", patch.full_name.as_ref())?;
        require_text_opt("email", patch.email.as_ref())?;
        self.store.update_staff(id, patch)
    }

    // -- patients ----------------------------------------------------------

    pub fn list_patients(&self, caller: &Caller, order: SortOrder) -> Result<Vec<Patient>> {
        let rows = self.store.select_patients(Filter::All, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn get_patient(&self, caller: &Caller, id: Uuid) -> Result<Patient> {
        let rows = self.store.select_patients(Filter::Id(id), SortOrder::Newest)?;
        self.one(caller, rows)
    }

    pub fn create_patient(&self, caller: &Caller, row: NewPatient) -> Result<Patient> {
        self.authorize(caller, Table::Patients, Operation::Insert)?;
        require_text("first_name", &row.first_name)?;
        require_text("last_name", &row.last_name)?;
        require_text("national_id", &row.national_id)?;
        let patient = self.store.insert_patient(row)?;
        info!(patient_id = %patient.id, "patient registered");
        Ok(patient)
    }

    pub fn update_patient(&self, caller: &Caller, id: Uuid, patch: PatientPatch) -> Result<Patient> {
        self.authorize(caller, Table::Patients, Operation::Update)?;
        require_changes(patch.is_empty())?;
        require_text_opt("first_name", patch.first_name.as_ref())?;
        require_text_opt("last_name", patch.last_name.as_ref())?;
        require_text_opt("national_id", patch.national_id.as_ref())?;
        self.store.update_patient(id, patch)
    }

    // -- appointments ------------------------------------------------------

    pub fn list_appointments(&self, caller: &Caller, filter: Filter, order: SortOrder) -> Result<Vec<Appointment>> {
        let rows = self.store.select_appointments(filter, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn create_appointment(&self, caller: &Caller, row: NewAppointment) -> Result<Appointment> {
        self.authorize(caller, Table::Appointments, Operation::Insert)?;
        require_text("reason", &row.reason)?;
        self.attending(row.doctor_id)?;
        let appointment = self.store.insert_appointment(row)?;
        info!(
            appointment_id = %appointment.id,
            patient_id = %appointment.patient_id,
            doctor_id = %appointment.doctor_id,
            "appointment booked"
        );
        Ok(appointment)
    }

    pub fn update_appointment(&self, caller: &Caller, id: Uuid, patch: AppointmentPatch) -> Result<Appointment> {
        self.authorize(caller, Table::Appointments, Operation::Update)?;
        require_changes(patch.is_empty())?;
        require_text_opt("reason", patch.reason.as_ref())?;
        self.store.update_appointment(id, patch)
    }

    // -- medical records ---------------------------------------------------

    pub fn list_medical_records(
        &self,
        caller: &Caller,
        filter: Filter,
        order: SortOrder,
    ) -> Result<Vec<MedicalRecord>> {
        let rows = self.store.select_medical_records(filter, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn get_medical_record(&self, caller: &Caller, id: Uuid) -> Result<MedicalRecord> {
        let rows = self.store.select_medical_records(Filter::Id(id), SortOrder::Newest)?;
        self.one(caller, rows)
    }

    pub fn create_medical_record(&self, caller: &Caller, mut row: NewMedicalRecord) -> Result<MedicalRecord> {
        self.authorize(caller, Table::MedicalRecords, Operation::Insert)?;
        require_text("chief_complaint", &row.chief_complaint)?;
        require_text("diagnosis", &row.diagnosis)?;
        require_text("treatment_plan", &row.treatment_plan)?;
        let doctor_id = match row.doctor_id {
            Some(id) => id,
            None => self.acting_staff(caller)?,
        };
        self.attending(doctor_id)?;
        row.doctor_id = Some(doctor_id);
        if let Some(appointment_id) = row.appointment_id {
            self.parent_patient(row.patient_id)?;
            let appointment = self
                .store
                .select_appointments(Filter::Id(appointment_id), SortOrder::Newest)?
                .into_iter()
                .next()
                .ok_or_else(|| EhrError::ReferentialIntegrity("appointment_id".to_string()))?;
            if appointment.patient_id != row.patient_id {
                return Err(EhrError::validation(
                    "appointment_id",
                    "appointment belongs to a different patient",
                ));
            }
        }
        let record = self.store.insert_medical_record(row)?;
        info!(record_id = %record.id, patient_id = %record.patient_id, "medical record created");
        Ok(record)
    }

    pub fn update_medical_record(
        &self,
        caller: &Caller,
        id: Uuid,
        patch: MedicalRecordPatch,
    ) -> Result<MedicalRecord> {
        self.authorize(caller, Table::MedicalRecords, Operation::Update)?;
        require_changes(patch.is_empty())?;
        require_text_opt("chief_complaint", patch.chief_complaint.as_ref())?;
        require_text_opt("diagnosis", patch.diagnosis.as_ref())?;
        require_text_opt("treatment_plan", patch.treatment_plan.as_ref())?;
        self.store.update_medical_record(id, patch)
    }

    /// Parent lookups for child-row consistency checks. They run before the
    /// insert, so a missing parent surfaces as a dangling reference.
    fn parent_patient(&self, id: Uuid) -> Result<()> {
        if self.store.select_patients(Filter::Id(id), SortOrder::Newest)?.is_empty() {
            return Err(EhrError::ReferentialIntegrity("patient_id".to_string()));
        }
        Ok(())
    }

    /// A `doctor_id` must name a doctor; admins may also act as the
    /// attending physician.
    fn attending(&self, doctor_id: Uuid) -> Result<()> {
        let staff = self
            .store
            .select_staff(Filter::Id(doctor_id), SortOrder::Newest)?
            .into_iter()
            .next()
            .ok_or_else(|| EhrError::ReferentialIntegrity("doctor_id".to_string()))?;
        match staff.role {
            Role::Doctor | Role::Admin => Ok(()),
            other => Err(EhrError::validation(
                "doctor_id",
                format!("staff member is a {}, not a doctor", other),
            )),
        }
    }

    fn parent_record(&self, id: Uuid) -> Result<MedicalRecord> {
        self.store
            .select_medical_records(Filter::Id(id), SortOrder::Newest)?
            .into_iter()
            .next()
            .ok_or_else(|| EhrError::ReferentialIntegrity("medical_record_id".to_string()))
    }

    // -- vitals ------------------------------------------------------------

    pub fn list_vitals(&self, caller: &Caller, medical_record_id: Uuid, order: SortOrder) -> Result<Vec<Vital>> {
        let rows = self.store.select_vitals(Filter::MedicalRecord(medical_record_id), order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn record_vitals(&self, caller: &Caller, mut row: NewVital) -> Result<Vital> {
        self.authorize(caller, Table::Vitals, Operation::Insert)?;
        row.recorded_by = Some(self.acting_staff(caller)?);
        let vital = self.store.insert_vital(row)?;
        info!(vital_id = %vital.id, record_id = %vital.medical_record_id, "vitals recorded");
        Ok(vital)
    }

    pub fn update_vitals(&self, caller: &Caller, id: Uuid, patch: VitalPatch) -> Result<Vital> {
        self.authorize(caller, Table::Vitals, Operation::Update)?;
        require_changes(patch.is_empty())?;
        self.store.update_vital(id, patch)
    }

    // -- prescriptions -----------------------------------------------------

    pub fn list_prescriptions(&self, caller: &Caller, filter: Filter, order: SortOrder) -> Result<Vec<Prescription>> {
        let rows = self.store.select_prescriptions(filter, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn create_prescription(&self, caller: &Caller, mut row: NewPrescription) -> Result<Prescription> {
        self.authorize(caller, Table::Prescriptions, Operation::Insert)?;
        require_text("medication_name", &row.medication_name)?;
        require_text("dosage", &row.dosage)?;
        require_text("frequency", &row.frequency)?;
        require_text("duration", &row.duration)?;
        let doctor_id = match row.doctor_id {
            Some(id) => id,
            None => self.acting_staff(caller)?,
        };
        self.attending(doctor_id)?;
        row.doctor_id = Some(doctor_id);
        self.parent_patient(row.patient_id)?;
        let record = self.parent_record(row.medical_record_id)?;
        if record.patient_id != row.patient_id {
            return Err(EhrError::validation(
                "patient_id",
                "does not match the medical record's patient",
            ));
        }
        let prescription = self.store.insert_prescription(row)?;
        info!(
            prescription_id = %prescription.id,
            patient_id = %prescription.patient_id,
            "prescription issued"
        );
        Ok(prescription)
    }

    // -- lab results -------------------------------------------------------

    pub fn list_lab_results(&self, caller: &Caller, filter: Filter, order: SortOrder) -> Result<Vec<LabResult>> {
        let rows = self.store.select_lab_results(filter, order)?;
        Ok(policy::visible(caller, rows))
    }

    pub fn order_lab_result(&self, caller: &Caller, mut row: NewLabResult) -> Result<LabResult> {
        self.authorize(caller, Table::LabResults, Operation::Insert)?;
        require_text("test_name", &row.test_name)?;
        require_text("test_type", &row.test_type)?;
        if let Some(status) = row.status {
            if status != LabStatus::Pending {
                return Err(EhrError::validation("status", "new lab orders must be pending"));
            }
        }
        if let Some(record_id) = row.medical_record_id {
            self.parent_patient(row.patient_id)?;
            let record = self.parent_record(record_id)?;
            if record.patient_id != row.patient_id {
                return Err(EhrError::validation(
                    "patient_id",
                    "does not match the medical record's patient",
                ));
            }
        }
        row.ordered_by = Some(self.acting_staff(caller)?);
        let result = self.store.insert_lab_result(row)?;
        info!(lab_result_id = %result.id, patient_id = %result.patient_id, test = %result.test_name, "lab test ordered");
        Ok(result)
    }

    /// Submit results or move a lab result through its status transitions.
    ///
    /// `pending` may become `completed` or `cancelled`; both are final, and a
    /// final result accepts no further edits, results included. Completion
    /// stamps `completed_at` and records the caller as performer. The write
    /// only lands if the status is still the one read here.
    pub fn update_lab_result(&self, caller: &Caller, id: Uuid, patch: LabResultPatch) -> Result<LabResult> {
        self.authorize(caller, Table::LabResults, Operation::Update)?;
        require_changes(patch.is_empty())?;

        let current = self.one(caller, self.store.select_lab_results(Filter::Id(id), SortOrder::Newest)?)?;
        let mut update = LabResultUpdate {
            results: patch.results,
            ..Default::default()
        };

        if let Some(next) = patch.status.filter(|s| *s != current.status) {
            update.status = Some(next);
            if next == LabStatus::Completed {
                update.completed_at = Some(Utc::now());
                update.performed_by = Some(self.acting_staff(caller)?);
            }
        }

        if update.is_empty() {
            return Ok(current);
        }
        if current.status.is_terminal() {
            let change = match update.status {
                Some(next) => format!("become {}", next),
                None => "be edited".to_string(),
            };
            return Err(EhrError::validation(
                "status",
                format!("a {} lab result cannot {}", current.status, change),
            ));
        }
        let result = self.store.update_lab_result(id, current.status, update)?;
        if result.status == LabStatus::Completed && current.status != LabStatus::Completed {
            info!(lab_result_id = %result.id, performed_by = ?result.performed_by, "lab result completed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    struct Clinic {
        service: EhrService,
        store: Arc<MemoryStore>,
    }

    impl Clinic {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            Clinic {
                service: EhrService::new(store.clone()),
                store,
            }
        }

        fn member(&self, role: Role) -> Caller {
            let staff = self
                .store
                .insert_staff(NewStaff {
                    user_id: Uuid::new_v4(),
                    full_name: format!("Test {}", role),
                    role,
                    specialization: None,
                    phone: None,
                    email: format!("{}@clinic.test", role),
                    license_number: None,
                })
                .unwrap();
            Caller::new(staff.user_id, Some(staff))
        }
    }

    fn patient(national_id: &str) -> NewPatient {
        NewPatient {
            first_name: "Alan".into(),
            last_name: "Turing".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 23).unwrap(),
            gender: Gender::Male,
            phone: None,
            email: None,
            address: None,
            national_id: national_id.into(),
            blood_type: None,
            allergies: Some("penicillin".into()),
            emergency_contact_name: None,
            emergency_contact_phone: None,
        }
    }

    #[test]
    fn blank_required_text_is_rejected_before_the_store() {
        let clinic = Clinic::new();
        let receptionist = clinic.member(Role::Receptionist);
        let err = clinic
            .service
            .create_patient(&receptionist, patient("   "))
            .unwrap_err();
        assert_eq!(err, EhrError::validation("national_id", "must not be blank"));
    }

    #[test]
    fn forbidden_update_does_not_reveal_existence() {
        let clinic = Clinic::new();
        let receptionist = clinic.member(Role::Receptionist);
        let nurse = clinic.member(Role::Nurse);
        let existing = clinic.service.create_patient(&receptionist, patient("NID-9")).unwrap();
        let patch = || PatientPatch {
            phone: Some("555-0101".into()),
            ..Default::default()
        };

        let on_existing = clinic.service.update_patient(&nurse, existing.id, patch()).unwrap_err();
        let on_missing = clinic.service.update_patient(&nurse, Uuid::new_v4(), patch()).unwrap_err();
        assert_eq!(on_existing, EhrError::Forbidden);
        assert_eq!(on_missing, EhrError::Forbidden);
    }

    #[test]
    fn filtered_row_reads_as_not_found() {
        let clinic = Clinic::new();
        let doctor = clinic.member(Role::Doctor);
        let receptionist = clinic.member(Role::Receptionist);
        let p = clinic.service.create_patient(&receptionist, patient("NID-1")).unwrap();
        let record = clinic
            .service
            .create_medical_record(
                &doctor,
                NewMedicalRecord {
                    patient_id: p.id,
                    doctor_id: None,
                    appointment_id: None,
                    visit_date: None,
                    chief_complaint: "cough".into(),
                    diagnosis: "bronchitis".into(),
                    treatment_plan: "rest".into(),
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(record.doctor_id, doctor.staff_id().unwrap());

        let hidden = clinic.service.get_medical_record(&receptionist, record.id).unwrap_err();
        let missing = clinic.service.get_medical_record(&receptionist, Uuid::new_v4()).unwrap_err();
        assert_eq!(hidden, EhrError::NotFound);
        assert_eq!(hidden, missing);
        assert!(clinic
            .service
            .list_medical_records(&receptionist, Filter::Patient(p.id), SortOrder::Newest)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn prescription_must_match_record_patient() {
        let clinic = Clinic::new();
        let doctor = clinic.member(Role::Doctor);
        let admin = clinic.member(Role::Admin);
        let first = clinic.service.create_patient(&admin, patient("NID-1")).unwrap();
        let second = clinic.service.create_patient(&admin, patient("NID-2")).unwrap();
        let record = clinic
            .service
            .create_medical_record(
                &doctor,
                NewMedicalRecord {
                    patient_id: first.id,
                    doctor_id: None,
                    appointment_id: None,
                    visit_date: None,
                    chief_complaint: "rash".into(),
                    diagnosis: "dermatitis".into(),
                    treatment_plan: "topical steroid".into(),
                    notes: None,
                },
            )
            .unwrap();
        let err = clinic
            .service
            .create_prescription(
                &doctor,
                NewPrescription {
                    medical_record_id: record.id,
                    patient_id: second.id,
                    doctor_id: None,
                    medication_name: "hydrocortisone".into(),
                    dosage: "1%".into(),
                    frequency: "twice daily".into(),
                    duration: "7 days".into(),
                    instructions: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EhrError::Validation { ref field, .. } if field == "patient_id"));
    }

    #[test]
    fn lab_orders_cannot_start_completed() {
        let clinic = Clinic::new();
        let doctor = clinic.member(Role::Doctor);
        let admin = clinic.member(Role::Admin);
        let p = clinic.service.create_patient(&admin, patient("NID-1")).unwrap();
        let err = clinic
            .service
            .order_lab_result(
                &doctor,
                NewLabResult {
                    patient_id: p.id,
                    medical_record_id: None,
                    test_name: "HbA1c".into(),
                    test_type: "blood".into(),
                    status: Some(LabStatus::Completed),
                    ordered_by: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EhrError::Validation { ref field, .. } if field == "status"));
    }

    #[test]
    fn cancelled_lab_result_is_final() {
        let clinic = Clinic::new();
        let doctor = clinic.member(Role::Doctor);
        let tech = clinic.member(Role::LabTechnician);
        let admin = clinic.member(Role::Admin);
        let p = clinic.service.create_patient(&admin, patient("NID-1")).unwrap();
        let lab = clinic
            .service
            .order_lab_result(
                &doctor,
                NewLabResult {
                    patient_id: p.id,
                    medical_record_id: None,
                    test_name: "Lipid panel".into(),
                    test_type: "blood".into(),
                    status: None,
                    ordered_by: None,
                },
            )
            .unwrap();
        let cancel = LabResultPatch {
            status: Some(LabStatus::Cancelled),
            results: None,
        };
        let cancelled = clinic.service.update_lab_result(&doctor, lab.id, cancel).unwrap();
        assert_eq!(cancelled.status, LabStatus::Cancelled);
        assert!(cancelled.completed_at.is_none());

        let complete = LabResultPatch {
            status: Some(LabStatus::Completed),
            results: Some("LDL 3.1".into()),
        };
        let err = clinic.service.update_lab_result(&tech, lab.id, complete).unwrap_err();
        assert!(matches!(err, EhrError::Validation { .. }));
    }

    #[test]
    fn completed_lab_result_is_read_only() {
        let clinic = Clinic::new();
        let doctor = clinic.member(Role::Doctor);
        let tech = clinic.member(Role::LabTechnician);
        let admin = clinic.member(Role::Admin);
        let p = clinic.service.create_patient(&admin, patient("NID-1")).unwrap();
        let lab = clinic
            .service
            .order_lab_result(
                &doctor,
                NewLabResult {
                    patient_id: p.id,
                    medical_record_id: None,
                    test_name: "TSH".into(),
                    test_type: "blood".into(),
                    status: None,
                    ordered_by: None,
                },
            )
            .unwrap();
        let done = clinic
            .service
            .update_lab_result(
                &tech,
                lab.id,
                LabResultPatch {
                    status: Some(LabStatus::Completed),
                    results: Some("2.1 mIU/L".into()),
                },
            )
            .unwrap();

        let rewrite = LabResultPatch {
            status: None,
            results: Some("4.8 mIU/L".into()),
        };
        let err = clinic.service.update_lab_result(&doctor, lab.id, rewrite).unwrap_err();
        assert!(matches!(err, EhrError::Validation { ref field, .. } if field == "status"));

        let same_status = LabResultPatch {
            status: Some(LabStatus::Completed),
            results: None,
        };
        let unchanged = clinic.service.update_lab_result(&tech, lab.id, same_status).unwrap();
        assert_eq!(unchanged, done);
    }

    #[test]
    fn doctor_id_must_name_a_doctor() {
        let clinic = Clinic::new();
        let receptionist = clinic.member(Role::Receptionist);
        let p = clinic.service.create_patient(&receptionist, patient("NID-1")).unwrap();
        let booking = |doctor_id| NewAppointment {
            patient_id: p.id,
            doctor_id,
            appointment_date: Utc::now(),
            status: None,
            reason: "check-up".into(),
            notes: None,
        };

        let err = clinic
            .service
            .create_appointment(&receptionist, booking(receptionist.staff_id().unwrap()))
            .unwrap_err();
        assert!(matches!(err, EhrError::Validation { ref field, .. } if field == "doctor_id"));

        let err = clinic
            .service
            .create_appointment(&receptionist, booking(Uuid::new_v4()))
            .unwrap_err();
        assert_eq!(err, EhrError::ReferentialIntegrity("doctor_id".into()));

        let doctor = clinic.member(Role::Doctor);
        let booked = clinic
            .service
            .create_appointment(&receptionist, booking(doctor.staff_id().unwrap()))
            .unwrap();
        assert_eq!(booked.doctor_id, doctor.staff_id().unwrap());
    }

    #[test]
    fn empty_patch_is_rejected() {
        let clinic = Clinic::new();
        let admin = clinic.member(Role::Admin);
        let err = clinic
            .service
            .update_staff(&admin, admin.staff_id().unwrap(), StaffPatch::default())
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}

//! Diesel-backed store over an r2d2 Postgres pool.

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::PgConnection;
use uuid::Uuid;

use super::{check_readings, status_changed, unsupported, Filter, SortOrder, Store};
use crate::error::Result;
use crate::models::*;
use crate::policy::Table;
use crate::schema::{appointments, lab_results, medical_records, patients, prescriptions, staff, vitals};

/// Database connection pool type
pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        PgStore { pool }
    }

    /// Build a pool for `database_url` with at most `max_size` connections.
    pub fn connect(database_url: &str, max_size: u32) -> anyhow::Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?;
        Ok(PgStore::new(pool))
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>> {
        Ok(self.pool.get()?)
    }
}

impl Store for PgStore {
    fn find_staff_by_user(&self, user_id: Uuid) -> Result<Option<Staff>> {
        let mut conn = self.conn()?;
        Ok(staff::table
            .filter(staff::user_id.eq(user_id))
            .select(Staff::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn select_staff(&self, filter: Filter, order: SortOrder) -> Result<Vec<Staff>> {
        let mut query = staff::table.select(Staff::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(staff::id.eq(id)),
            other => return Err(unsupported(Table::Staff, other)),
        };
        query = match order {
            SortOrder::Newest => query.order(staff::created_at.desc()),
            SortOrder::Oldest => query.order(staff::created_at.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_staff(&self, row: NewStaff) -> Result<Staff> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(staff::table)
            .values(&row)
            .returning(Staff::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_staff(&self, id: Uuid, patch: StaffPatch) -> Result<Staff> {
        let mut conn = self.conn()?;
        Ok(diesel::update(staff::table.find(id))
            .set((&patch, staff::updated_at.eq(Utc::now())))
            .returning(Staff::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_patients(&self, filter: Filter, order: SortOrder) -> Result<Vec<Patient>> {
        let mut query = patients::table.select(Patient::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) | Filter::Patient(id) => query.filter(patients::id.eq(id)),
            other => return Err(unsupported(Table::Patients, other)),
        };
        query = match order {
            SortOrder::Newest => query.order(patients::created_at.desc()),
            SortOrder::Oldest => query.order(patients::created_at.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_patient(&self, row: NewPatient) -> Result<Patient> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(patients::table)
            .values(&row)
            .returning(Patient::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_patient(&self, id: Uuid, patch: PatientPatch) -> Result<Patient> {
        let mut conn = self.conn()?;
        Ok(diesel::update(patients::table.find(id))
            .set((&patch, patients::updated_at.eq(Utc::now())))
            .returning(Patient::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_appointments(&self, filter: Filter, order: SortOrder) -> Result<Vec<Appointment>> {
        let mut query = appointments::table.select(Appointment::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(appointments::id.eq(id)),
            Filter::Patient(id) => query.filter(appointments::patient_id.eq(id)),
            Filter::Staff(id) => query.filter(appointments::doctor_id.eq(id)),
            other => return Err(unsupported(Table::Appointments, other)),
        };
        query = match order {
            SortOrder::Newest => query.order(appointments::appointment_date.desc()),
            SortOrder::Oldest => query.order(appointments::appointment_date.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_appointment(&self, row: NewAppointment) -> Result<Appointment> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(appointments::table)
            .values(&row)
            .returning(Appointment::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_appointment(&self, id: Uuid, patch: AppointmentPatch) -> Result<Appointment> {
        let mut conn = self.conn()?;
        Ok(diesel::update(appointments::table.find(id))
            .set((&patch, appointments::updated_at.eq(Utc::now())))
            .returning(Appointment::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_medical_records(&self, filter: Filter, order: SortOrder) -> Result<Vec<MedicalRecord>> {
        let mut query = medical_records::table.select(MedicalRecord::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(medical_records::id.eq(id)),
            Filter::Patient(id) => query.filter(medical_records::patient_id.eq(id)),
            Filter::Staff(id) => query.filter(medical_records::doctor_id.eq(id)),
            other => return Err(unsupported(Table::MedicalRecords, other)),
        };
        query = match order {
            SortOrder::Newest => query.order(medical_records::visit_date.desc()),
            SortOrder::Oldest => query.order(medical_records::visit_date.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_medical_record(&self, row: NewMedicalRecord) -> Result<MedicalRecord> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(medical_records::table)
            .values(&row)
            .returning(MedicalRecord::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_medical_record(&self, id: Uuid, patch: MedicalRecordPatch) -> Result<MedicalRecord> {
        let mut conn = self.conn()?;
        Ok(diesel::update(medical_records::table.find(id))
            .set((&patch, medical_records::updated_at.eq(Utc::now())))
            .returning(MedicalRecord::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_vitals(&self, filter: Filter, order: SortOrder) -> Result<Vec<Vital>> {
        let mut query = vitals::table.select(Vital::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(vitals::id.eq(id)),
            Filter::MedicalRecord(id) => query.filter(vitals::medical_record_id.eq(id)),
            Filter::Staff(id) => query.filter(vitals::recorded_by.eq(id)),
            other => return Err(unsupported(Table::Vitals, other)),
        };
        query = match order {
            SortOrder::Newest => query.order(vitals::recorded_at.desc()),
            SortOrder::Oldest => query.order(vitals::recorded_at.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_vital(&self, row: NewVital) -> Result<Vital> {
        check_readings(&row.readings())?;
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(vitals::table)
            .values(&row)
            .returning(Vital::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_vital(&self, id: Uuid, patch: VitalPatch) -> Result<Vital> {
        check_readings(&patch.readings())?;
        let mut conn = self.conn()?;
        Ok(diesel::update(vitals::table.find(id))
            .set(&patch)
            .returning(Vital::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_prescriptions(&self, filter: Filter, order: SortOrder) -> Result<Vec<Prescription>> {
        let mut query = prescriptions::table.select(Prescription::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(prescriptions::id.eq(id)),
            Filter::Patient(id) => query.filter(prescriptions::patient_id.eq(id)),
            Filter::MedicalRecord(id) => query.filter(prescriptions::medical_record_id.eq(id)),
            Filter::Staff(id) => query.filter(prescriptions::doctor_id.eq(id)),
        };
        query = match order {
            SortOrder::Newest => query.order(prescriptions::created_at.desc()),
            SortOrder::Oldest => query.order(prescriptions::created_at.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_prescription(&self, row: NewPrescription) -> Result<Prescription> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(prescriptions::table)
            .values(&row)
            .returning(Prescription::as_returning())
            .get_result(&mut conn)?)
    }

    fn select_lab_results(&self, filter: Filter, order: SortOrder) -> Result<Vec<LabResult>> {
        let mut query = lab_results::table.select(LabResult::as_select()).into_boxed();
        query = match filter {
            Filter::All => query,
            Filter::Id(id) => query.filter(lab_results::id.eq(id)),
            Filter::Patient(id) => query.filter(lab_results::patient_id.eq(id)),
            Filter::MedicalRecord(id) => query.filter(lab_results::medical_record_id.eq(id)),
            Filter::Staff(id) => query.filter(lab_results::ordered_by.eq(id)),
        };
        query = match order {
            SortOrder::Newest => query.order(lab_results::ordered_at.desc()),
            SortOrder::Oldest => query.order(lab_results::ordered_at.asc()),
        };
        let mut conn = self.conn()?;
        Ok(query.load(&mut conn)?)
    }

    fn insert_lab_result(&self, row: NewLabResult) -> Result<LabResult> {
        let mut conn = self.conn()?;
        Ok(diesel::insert_into(lab_results::table)
            .values(&row)
            .returning(LabResult::as_returning())
            .get_result(&mut conn)?)
    }

    fn update_lab_result(&self, id: Uuid, expected: LabStatus, update: LabResultUpdate) -> Result<LabResult> {
        let mut conn = self.conn()?;
        let updated = diesel::update(lab_results::table.find(id).filter(lab_results::status.eq(expected)))
            .set(&update)
            .returning(LabResult::as_returning())
            .get_result(&mut conn)
            .optional()?;
        match updated {
            Some(result) => Ok(result),
            None => {
                let now = lab_results::table
                    .find(id)
                    .select(lab_results::status)
                    .first::<LabStatus>(&mut conn)?;
                Err(status_changed(now))
            }
        }
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use hospital_ehr::commands::create_admin;
use hospital_ehr::models::{Gender, NewPatient, NewStaff, Role};
use hospital_ehr::service::EhrService;
use hospital_ehr::session::{self, Caller};
use hospital_ehr::store::MemoryStore;

/// A service over a fresh in-memory store, plus helpers to staff it.
pub struct Clinic {
    pub service: EhrService,
    pub store: Arc<MemoryStore>,
}

impl Clinic {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Clinic {
            service: EhrService::new(store.clone()),
            store,
        }
    }

    pub fn caller(&self, user_id: Uuid) -> Caller {
        session::resolve(self.store.as_ref(), user_id).unwrap()
    }

    /// Bootstrap an admin the way the CLI does and resolve it.
    pub fn admin(&self) -> Caller {
        let user_id = Uuid::new_v4();
        create_admin(self.store.as_ref(), user_id, "Ada Admin", "admin@clinic.test").unwrap();
        self.caller(user_id)
    }

    /// Have `admin` create a staff profile with `role` and resolve it.
    pub fn hire(&self, admin: &Caller, role: Role, name: &str) -> Caller {
        let user_id = Uuid::new_v4();
        self.service
            .create_staff(
                admin,
                NewStaff {
                    user_id,
                    full_name: name.to_string(),
                    role,
                    specialization: None,
                    phone: None,
                    email: format!("{}@clinic.test", user_id),
                    license_number: None,
                },
            )
            .unwrap();
        self.caller(user_id)
    }

    /// An authenticated identity with no staff profile.
    pub fn stranger(&self) -> Caller {
        self.caller(Uuid::new_v4())
    }
}

pub fn new_patient(national_id: &str) -> NewPatient {
    NewPatient {
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
        date_of_birth: NaiveDate::from_ymd_opt(1986, 12, 9).unwrap(),
        gender: Gender::Female,
        phone: Some("555-0100".into()),
        email: None,
        address: None,
        national_id: national_id.into(),
        blood_type: Some("O+".into()),
        allergies: None,
        emergency_contact_name: None,
        emergency_contact_phone: None,
    }
}

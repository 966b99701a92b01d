mod common;

use proptest::prelude::*;

use common::{new_patient, Clinic};
use hospital_ehr::error::EhrError;
use hospital_ehr::models::*;
use hospital_ehr::store::{Filter, SortOrder};

const ROLES: [Role; 5] = [Role::Admin, Role::Doctor, Role::Nurse, Role::Receptionist, Role::LabTechnician];

proptest! {
    /// Whatever sequence of updates is attempted, a lab result carries a
    /// completion time exactly when it is completed, and a final status
    /// never changes.
    #[test]
    fn completion_time_tracks_status(
        steps in proptest::collection::vec(
            (0..ROLES.len(), proptest::option::of(0..LabStatus::ALL.len()), any::<bool>()),
            1..12,
        )
    ) {
        let clinic = Clinic::new();
        let admin = clinic.admin();
        let staff: Vec<_> = ROLES
            .iter()
            .map(|role| clinic.hire(&admin, *role, &format!("{} on shift", role)))
            .collect();
        let patient = clinic.service.create_patient(&admin, new_patient("NID-PROP")).unwrap();
        let order = clinic
            .service
            .order_lab_result(
                &admin,
                NewLabResult {
                    patient_id: patient.id,
                    medical_record_id: None,
                    test_name: "Metabolic panel".into(),
                    test_type: "chemistry".into(),
                    status: None,
                    ordered_by: None,
                },
            )
            .unwrap();

        let mut previous = order;
        for (actor, status, with_results) in steps {
            let patch = LabResultPatch {
                status: status.map(|i| LabStatus::ALL[i]),
                results: with_results.then(|| "see attached".to_string()),
            };
            let outcome = clinic.service.update_lab_result(&staff[actor], previous.id, patch.clone());

            let current = clinic
                .service
                .list_lab_results(&admin, Filter::Id(previous.id), SortOrder::Newest)
                .unwrap()
                .remove(0);
            prop_assert_eq!(current.status == LabStatus::Completed, current.completed_at.is_some());

            if previous.status.is_terminal() {
                prop_assert_eq!(current.status, previous.status);
                prop_assert_eq!(current.completed_at, previous.completed_at);
            }
            if matches!(ROLES[actor], Role::Nurse | Role::Receptionist) {
                prop_assert_eq!(outcome, Err(EhrError::Forbidden));
                prop_assert_eq!(&current, &previous);
            } else if patch.is_empty() {
                let is_validation_err = matches!(outcome, Err(EhrError::Validation { .. }));
                prop_assert!(is_validation_err);
            }
            previous = current;
        }
    }
}

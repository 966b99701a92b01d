use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use uuid::Uuid;

use hospital_ehr::commands::create_admin;
use hospital_ehr::config::AuthSettings;
use hospital_ehr::handlers;
use hospital_ehr::service::EhrService;
use hospital_ehr::store::MemoryStore;

macro_rules! app {
    ($store:expr) => {
        app!($store, AuthSettings::default())
    };
    ($store:expr, $auth:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(EhrService::new($store.clone())))
                .app_data(web::Data::new($auth))
                .app_data(handlers::json_config())
                .configure(handlers::configure),
        )
        .await
    };
}

fn seeded() -> (Arc<MemoryStore>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let admin = Uuid::new_v4();
    create_admin(store.as_ref(), admin, "Ada Admin", "admin@clinic.test").unwrap();
    (store, admin)
}

fn staff_body(user_id: Uuid, role: &str) -> Value {
    json!({
        "user_id": user_id,
        "full_name": format!("Test {}", role),
        "role": role,
        "email": format!("{}@clinic.test", role),
    })
}

fn patient_body(national_id: &str) -> Value {
    json!({
        "first_name": "Grace",
        "last_name": "Hopper",
        "date_of_birth": "1986-12-09",
        "gender": "female",
        "national_id": national_id,
    })
}

#[actix_web::test]
async fn health_needs_no_identity() {
    let (store, _) = seeded();
    let app = app!(store);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn missing_or_malformed_identity_is_unauthorized() {
    let (store, _) = seeded();
    let app = app!(store);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/patients").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/patients")
        .insert_header(("x-user-id", "not-a-uuid"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn admin_hires_and_staff_sees_own_profile() {
    let (store, admin) = seeded();
    let app = app!(store);
    let doctor = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/staff")
        .insert_header(("x-user-id", admin.to_string()))
        .set_json(staff_body(doctor, "doctor"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri("/staff/me")
        .insert_header(("x-user-id", doctor.to_string()))
        .to_request();
    let profile: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(profile["role"], "doctor");
    assert_eq!(profile["user_id"], doctor.to_string());

    let req = test::TestRequest::get()
        .uri("/staff/me")
        .insert_header(("x-user-id", Uuid::new_v4().to_string()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn errors_map_to_status_codes() {
    let (store, admin) = seeded();
    let app = app!(store);
    let receptionist = Uuid::new_v4();
    let nurse = Uuid::new_v4();
    for (user_id, role) in [(receptionist, "receptionist"), (nurse, "nurse")] {
        let req = test::TestRequest::post()
            .uri("/staff")
            .insert_header(("x-user-id", admin.to_string()))
            .set_json(staff_body(user_id, role))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::post()
        .uri("/patients")
        .insert_header(("x-user-id", receptionist.to_string()))
        .set_json(patient_body("NID-42"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;
    let patient_id = patient["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/patients")
        .insert_header(("x-user-id", receptionist.to_string()))
        .set_json(patient_body("NID-42"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "uniqueness");

    let req = test::TestRequest::patch()
        .uri(&format!("/patients/{}", patient_id))
        .insert_header(("x-user-id", nurse.to_string()))
        .set_json(json!({ "phone": "555-0111" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["message"], "operation not permitted");

    let req = test::TestRequest::post()
        .uri("/patients")
        .insert_header(("x-user-id", receptionist.to_string()))
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"first_name\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let req = test::TestRequest::get()
        .uri(&format!("/patients/{}", Uuid::new_v4()))
        .insert_header(("x-user-id", nurse.to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn vitals_are_posted_under_their_record() {
    let (store, admin) = seeded();
    let app = app!(store);
    let admin_header = ("x-user-id", admin.to_string());

    let req = test::TestRequest::post()
        .uri("/patients")
        .insert_header(admin_header.clone())
        .set_json(patient_body("NID-77"))
        .to_request();
    let patient: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/medical-records")
        .insert_header(admin_header.clone())
        .set_json(json!({
            "patient_id": patient["id"],
            "chief_complaint": "Headache",
            "diagnosis": "Tension headache",
            "treatment_plan": "Hydration",
        }))
        .to_request();
    let record: Value = test::call_and_read_body_json(&app, req).await;
    let record_id = record["id"].as_str().unwrap().to_string();

    for heart_rate in [70, 82] {
        let req = test::TestRequest::post()
            .uri(&format!("/medical-records/{}/vitals", record_id))
            .insert_header(admin_header.clone())
            .set_json(json!({ "heart_rate": heart_rate, "recorded_by": Uuid::new_v4() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/medical-records/{}/vitals?order=oldest", record_id))
        .insert_header(admin_header.clone())
        .to_request();
    let vitals: Value = test::call_and_read_body_json(&app, req).await;
    let vitals = vitals.as_array().unwrap();
    assert_eq!(vitals.len(), 2);
    assert_eq!(vitals[0]["heart_rate"], 70);
    assert_eq!(vitals[1]["heart_rate"], 82);
    assert_eq!(vitals[0]["recorded_by"], record["doctor_id"]);
}

#[actix_web::test]
async fn identity_header_name_is_configurable() {
    let (store, admin) = seeded();
    let app = app!(
        store,
        AuthSettings {
            identity_header: "x-authenticated-user".to_string(),
        }
    );

    let req = test::TestRequest::get()
        .uri("/staff/me")
        .insert_header(("x-user-id", admin.to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/staff/me")
        .insert_header(("x-authenticated-user", admin.to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

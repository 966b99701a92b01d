use actix_web::dev::Payload;
use actix_web::error::{ErrorUnauthorized, InternalError};
use actix_web::http::StatusCode;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use futures::future::{ready, Ready};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::error::EhrError;
use crate::models::*;
use crate::service::EhrService;
use crate::session::{self, Caller};
use crate::store::{Filter, SortOrder};

impl ResponseError for EhrError {
    fn status_code(&self) -> StatusCode {
        match self {
            EhrError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EhrError::ReferentialIntegrity(_) | EhrError::Uniqueness(_) => StatusCode::CONFLICT,
            EhrError::Forbidden => StatusCode::FORBIDDEN,
            EhrError::NotFound => StatusCode::NOT_FOUND,
            EhrError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            EhrError::Storage(detail) => {
                error!(%detail, "storage failure");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": message,
        }))
    }
}

/// Authenticated identity taken from the header set by the auth service.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Uuid);

impl FromRequest for Identity {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req
            .app_data::<web::Data<AuthSettings>>()
            .map(|settings| settings.identity_header.clone())
            .unwrap_or_else(|| AuthSettings::default().identity_header);

        let identity = req
            .headers()
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok());

        ready(match identity {
            Some(id) => Ok(Identity(id)),
            None => Err(ErrorUnauthorized("missing or malformed identity header")),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub order: Option<SortOrder>,
}

impl ListQuery {
    fn order(&self) -> SortOrder {
        self.order.unwrap_or_default()
    }
}

/// JSON body config: malformed bodies are validation failures.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let response = EhrError::validation("body", err.to_string()).error_response();
        InternalError::from_response(err, response).into()
    })
}

/// Resolve the caller and run `op` on the blocking pool.
async fn with_caller<T, F>(service: web::Data<EhrService>, identity: Identity, op: F) -> Result<T, EhrError>
where
    T: Send + 'static,
    F: FnOnce(&EhrService, &Caller) -> crate::error::Result<T> + Send + 'static,
{
    match web::block(move || {
        let caller = session::resolve(service.store(), identity.0)?;
        op(service.get_ref(), &caller)
    })
    .await
    {
        Ok(result) => result,
        Err(e) => Err(EhrError::Storage(format!("Error blocking thread: {:?}", e))),
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Staff

pub async fn my_profile(service: web::Data<EhrService>, identity: Identity) -> Result<HttpResponse, EhrError> {
    let profile = with_caller(service, identity, |svc, caller| {
        svc.my_profile(caller)?.ok_or(EhrError::NotFound)
    })
    .await?;
    Ok(HttpResponse::Ok().json(profile))
}

pub async fn list_staff(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| svc.list_staff(caller, order)).await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn get_staff(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, EhrError> {
    let id = id.into_inner();
    let row = with_caller(service, identity, move |svc, caller| svc.get_staff(caller, id)).await?;
    Ok(HttpResponse::Ok().json(row))
}

pub async fn create_staff(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewStaff>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.create_staff(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_staff(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<StaffPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| svc.update_staff(caller, id, patch)).await?;
    Ok(HttpResponse::Ok().json(updated))
}

// Patients

pub async fn list_patients(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| svc.list_patients(caller, order)).await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn get_patient(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, EhrError> {
    let id = id.into_inner();
    let row = with_caller(service, identity, move |svc, caller| svc.get_patient(caller, id)).await?;
    Ok(HttpResponse::Ok().json(row))
}

pub async fn create_patient(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewPatient>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.create_patient(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_patient(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<PatientPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| svc.update_patient(caller, id, patch)).await?;
    Ok(HttpResponse::Ok().json(updated))
}

pub async fn patient_appointments(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let (filter, order) = (Filter::Patient(id.into_inner()), query.order());
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_appointments(caller, filter, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn patient_medical_records(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let (filter, order) = (Filter::Patient(id.into_inner()), query.order());
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_medical_records(caller, filter, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn patient_prescriptions(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let (filter, order) = (Filter::Patient(id.into_inner()), query.order());
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_prescriptions(caller, filter, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn patient_lab_results(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let (filter, order) = (Filter::Patient(id.into_inner()), query.order());
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_lab_results(caller, filter, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

// Appointments

pub async fn list_appointments(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_appointments(caller, Filter::All, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn create_appointment(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewAppointment>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.create_appointment(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_appointment(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<AppointmentPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| {
        svc.update_appointment(caller, id, patch)
    })
    .await?;
    Ok(HttpResponse::Ok().json(updated))
}

// Medical records

pub async fn list_medical_records(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_medical_records(caller, Filter::All, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn get_medical_record(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, EhrError> {
    let id = id.into_inner();
    let row = with_caller(service, identity, move |svc, caller| svc.get_medical_record(caller, id)).await?;
    Ok(HttpResponse::Ok().json(row))
}

pub async fn create_medical_record(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewMedicalRecord>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| {
        svc.create_medical_record(caller, row)
    })
    .await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_medical_record(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<MedicalRecordPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| {
        svc.update_medical_record(caller, id, patch)
    })
    .await?;
    Ok(HttpResponse::Ok().json(updated))
}

// Vitals

pub async fn list_vitals(
    service: web::Data<EhrService>,
    identity: Identity,
    record_id: web::Path<Uuid>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let (record_id, order) = (record_id.into_inner(), query.order());
    let rows = with_caller(service, identity, move |svc, caller| svc.list_vitals(caller, record_id, order)).await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn record_vitals(
    service: web::Data<EhrService>,
    identity: Identity,
    record_id: web::Path<Uuid>,
    body: web::Json<NewVital>,
) -> Result<HttpResponse, EhrError> {
    let mut row = body.into_inner();
    row.medical_record_id = record_id.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.record_vitals(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_vitals(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<VitalPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| svc.update_vitals(caller, id, patch)).await?;
    Ok(HttpResponse::Ok().json(updated))
}

// Prescriptions

pub async fn list_prescriptions(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_prescriptions(caller, Filter::All, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn create_prescription(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewPrescription>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.create_prescription(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

// Lab results

pub async fn list_lab_results(
    service: web::Data<EhrService>,
    identity: Identity,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, EhrError> {
    let order = query.order();
    let rows = with_caller(service, identity, move |svc, caller| {
        svc.list_lab_results(caller, Filter::All, order)
    })
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

pub async fn order_lab_result(
    service: web::Data<EhrService>,
    identity: Identity,
    body: web::Json<NewLabResult>,
) -> Result<HttpResponse, EhrError> {
    let row = body.into_inner();
    let created = with_caller(service, identity, move |svc, caller| svc.order_lab_result(caller, row)).await?;
    Ok(HttpResponse::Created().json(created))
}

pub async fn update_lab_result(
    service: web::Data<EhrService>,
    identity: Identity,
    id: web::Path<Uuid>,
    body: web::Json<LabResultPatch>,
) -> Result<HttpResponse, EhrError> {
    let (id, patch) = (id.into_inner(), body.into_inner());
    let updated = with_caller(service, identity, move |svc, caller| {
        svc.update_lab_result(caller, id, patch)
    })
    .await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// Register every route. `/staff/me` precedes `/staff/{id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::scope("/staff")
                .route("", web::get().to(list_staff))
                .route("", web::post().to(create_staff))
                .route("/me", web::get().to(my_profile))
                .route("/{id}", web::get().to(get_staff))
                .route("/{id}", web::patch().to(update_staff)),
        )
        .service(
            web::scope("/patients")
                .route("", web::get().to(list_patients))
                .route("", web::post().to(create_patient))
                .route("/{id}", web::get().to(get_patient))
                .route("/{id}", web::patch().to(update_patient))
                .route("/{id}/appointments", web::get().to(patient_appointments))
                .route("/{id}/medical-records", web::get().to(patient_medical_records))
                .route("/{id}/prescriptions", web::get().to(patient_prescriptions))
                .route("/{id}/lab-results", web::get().to(patient_lab_results)),
        )
        .service(
            web::scope("/appointments")
                .route("", web::get().to(list_appointments))
                .route("", web::post().to(create_appointment))
                .route("/{id}", web::patch().to(update_appointment)),
        )
        .service(
            web::scope("/medical-records")
                .route("", web::get().to(list_medical_records))
                .route("", web::post().to(create_medical_record))
                .route("/{id}", web::get().to(get_medical_record))
                .route("/{id}", web::patch().to(update_medical_record))
                .route("/{id}/vitals", web::get().to(list_vitals))
                .route("/{id}/vitals", web::post().to(record_vitals)),
        )
        .service(web::scope("/vitals").route("/{id}", web::patch().to(update_vitals)))
        .service(
            web::scope("/prescriptions")
                .route("", web::get().to(list_prescriptions))
                .route("", web::post().to(create_prescription)),
        )
        .service(
            web::scope("/lab-results")
                .route("", web::get().to(list_lab_results))
                .route("", web::post().to(order_lab_result))
                .route("/{id}", web::patch().to(update_lab_result)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            EhrError::validation("x", "bad").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(EhrError::Uniqueness("k".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            EhrError::ReferentialIntegrity("patient_id".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(EhrError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(EhrError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EhrError::Storage("pool".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn list_query_defaults_to_newest() {
        assert_eq!(ListQuery::default().order(), SortOrder::Newest);
        let oldest = ListQuery {
            order: Some(SortOrder::Oldest),
        };
        assert_eq!(oldest.order(), SortOrder::Oldest);
    }
}

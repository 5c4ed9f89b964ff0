use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, BookAppointmentRequest, CancelAppointmentRequest,
    RescheduleAppointmentRequest, StatusUpdateRequest,
};
use crate::services::booking::AppointmentBookingService;

/// Patients may only act on their own bookings; staff act on any.
fn authorize_patient(user: &User, patient_id: &Uuid) -> Result<(), AppError> {
    if user.is_staff() || user.id == patient_id.to_string() {
        Ok(())
    } else {
        Err(AppError::Auth(
            "Cannot manage another patient's appointment".to_string(),
        ))
    }
}

pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    authorize_patient(&user, &request.patient_id)?;
    let service = AppointmentBookingService::new(&state);
    let appointment = service.book_appointment(request, auth.token()).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service.get_appointment(&appointment_id, auth.token()).await?;
    authorize_patient(&user, &appointment.patient_id)?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    // Non-staff searches are always scoped to the caller.
    if !user.is_staff() {
        let own_id = user
            .id
            .parse::<Uuid>()
            .map_err(|_| AppError::Auth("Invalid user id".to_string()))?;
        query.patient_id = Some(own_id);
    }

    let service = AppointmentBookingService::new(&state);
    let appointments = service.search_appointments(&query, auth.token()).await?;
    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let current = service.get_appointment(&appointment_id, auth.token()).await?;
    authorize_patient(&user, &current.patient_id)?;

    let appointment = service
        .reschedule_appointment(&appointment_id, request, auth.token())
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let current = service.get_appointment(&appointment_id, auth.token()).await?;
    authorize_patient(&user, &current.patient_id)?;

    let appointment = service
        .cancel_appointment(&appointment_id, &request.reason, auth.token())
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let current = service.get_appointment(&appointment_id, auth.token()).await?;
    authorize_patient(&user, &current.patient_id)?;

    let appointment = service
        .confirm_appointment(&appointment_id, auth.token())
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth(
            "Status updates require a staff account".to_string(),
        ));
    }

    let service = AppointmentBookingService::new(&state);
    let appointment = service
        .update_status(&appointment_id, request.status, auth.token())
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn delete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !user.is_staff() {
        return Err(AppError::Auth(
            "Deleting appointments requires a staff account".to_string(),
        ));
    }

    let service = AppointmentBookingService::new(&state);
    service.delete_appointment(&appointment_id, auth.token()).await?;
    Ok(Json(json!({ "deleted": true })))
}

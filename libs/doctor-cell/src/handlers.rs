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

use crate::models::{CreateAvailabilityRequest, CreateLeaveRequest, SlotQuery, UpdateAvailabilityRequest};
use crate::services::{
    availability::AvailabilityService, doctor::DoctorService, leave::LeaveService,
    slots::SlotService,
};

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Auth(
            "Schedule management requires a staff account".to_string(),
        ))
    }
}

pub async fn get_doctor(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = DoctorService::new(&state);
    let doctor = service.get_doctor(&doctor_id, auth.token()).await?;
    Ok(Json(json!({ "doctor": doctor })))
}

pub async fn get_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);
    let windows = service.list_availability(&doctor_id, auth.token()).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "availability": windows
    })))
}

pub async fn create_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = AvailabilityService::new(&state);
    let availability = service
        .create_availability(&doctor_id, request, auth.token())
        .await?;
    Ok(Json(json!({ "availability": availability })))
}

pub async fn update_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((doctor_id, availability_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = AvailabilityService::new(&state);
    let availability = service
        .update_availability(&doctor_id, &availability_id, request, auth.token())
        .await?;
    Ok(Json(json!({ "availability": availability })))
}

pub async fn deactivate_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((doctor_id, availability_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = AvailabilityService::new(&state);
    let availability = service
        .deactivate_availability(&doctor_id, &availability_id, auth.token())
        .await?;
    Ok(Json(json!({ "availability": availability })))
}

pub async fn delete_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((doctor_id, availability_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = AvailabilityService::new(&state);
    service
        .delete_availability(
            &doctor_id,
            &availability_id,
            state.availability_delete_lookahead_days,
            auth.token(),
        )
        .await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn get_leaves(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = LeaveService::new(&state);
    let leaves = service.list_leaves(&doctor_id, auth.token()).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "leaves": leaves
    })))
}

pub async fn create_leave(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateLeaveRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = LeaveService::new(&state);
    let leave = service.create_leave(&doctor_id, request, auth.token()).await?;
    Ok(Json(json!({ "leave": leave })))
}

pub async fn cancel_leave(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path((doctor_id, leave_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = LeaveService::new(&state);
    let leave = service.cancel_leave(&doctor_id, &leave_id, auth.token()).await?;
    Ok(Json(json!({ "leave": leave })))
}

pub async fn get_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let service = SlotService::new(&state);
    let listing = service
        .generate_slots(&doctor_id, query.date, auth.token())
        .await?;
    Ok(Json(serde_json::to_value(listing).map_err(|e| AppError::Internal(e.to_string()))?))
}

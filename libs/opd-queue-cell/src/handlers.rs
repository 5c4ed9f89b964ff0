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

use crate::models::{CheckInRequest, QueueQuery};
use crate::services::queue::QueueService;

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Auth(
            "Queue management requires a staff account".to_string(),
        ))
    }
}

pub async fn check_in(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = QueueService::new(&state);
    let entry = service.check_in(request, auth.token()).await?;
    Ok(Json(json!({ "entry": entry })))
}

pub async fn get_queue(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let visit_date = query.date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let service = QueueService::new(&state);
    let entries = service.list_queue(&doctor_id, visit_date, auth.token()).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "visit_date": visit_date,
        "queue": entries
    })))
}

pub async fn get_queue_stats(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<QueueQuery>,
) -> Result<Json<Value>, AppError> {
    let visit_date = query.date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let service = QueueService::new(&state);
    let stats = service.queue_stats(&doctor_id, visit_date, auth.token()).await?;
    Ok(Json(serde_json::to_value(stats).map_err(|e| AppError::Internal(e.to_string()))?))
}

pub async fn start_consultation(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = QueueService::new(&state);
    let entry = service.start_consultation(&entry_id, auth.token()).await?;
    Ok(Json(json!({ "entry": entry })))
}

pub async fn complete_consultation(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = QueueService::new(&state);
    let entry = service.complete_consultation(&entry_id, auth.token()).await?;
    Ok(Json(json!({ "entry": entry })))
}

pub async fn cancel_entry(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let service = QueueService::new(&state);
    let entry = service.cancel_entry(&entry_id, auth.token()).await?;
    Ok(Json(json!({ "entry": entry })))
}

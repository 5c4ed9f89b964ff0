use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/{doctor_id}", get(handlers::get_doctor))
        .route("/{doctor_id}/slots", get(handlers::get_slots))
        .route(
            "/{doctor_id}/availability",
            get(handlers::get_availability).post(handlers::create_availability),
        )
        .route(
            "/{doctor_id}/availability/{availability_id}",
            put(handlers::update_availability).delete(handlers::delete_availability),
        )
        .route(
            "/{doctor_id}/availability/{availability_id}/deactivate",
            patch(handlers::deactivate_availability),
        )
        .route(
            "/{doctor_id}/leaves",
            get(handlers::get_leaves).post(handlers::create_leave),
        )
        .route(
            "/{doctor_id}/leaves/{leave_id}/cancel",
            patch(handlers::cancel_leave),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

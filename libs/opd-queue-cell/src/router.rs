use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn queue_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/check-in", post(handlers::check_in))
        .route("/{doctor_id}", get(handlers::get_queue))
        .route("/{doctor_id}/stats", get(handlers::get_queue_stats))
        .route("/entries/{entry_id}/start", post(handlers::start_consultation))
        .route(
            "/entries/{entry_id}/complete",
            post(handlers::complete_consultation),
        )
        .route("/entries/{entry_id}/cancel", post(handlers::cancel_entry))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

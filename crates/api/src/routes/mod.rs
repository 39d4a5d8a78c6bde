//! Route registration

pub mod billing;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/billing", post(billing::handle_webhook))
        .route("/reconcile/user", post(billing::reconcile_user))
        .route("/reconcile/all", post(billing::reconcile_all))
        .route("/status/user", post(billing::user_status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

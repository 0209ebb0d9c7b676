use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::handlers;
use crate::state::WebhookState;

/// Build the webhook axum Router with all endpoints.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/slack/interactions", post(handlers::interactions_handler))
        .route("/health", get(handlers::health_handler))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not_found"})),
    )
}

use axum::{extract::State, http::StatusCode, Json, response::IntoResponse};
use serde_json::json;

use crate::api::state::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Cooperative API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Fee payments for agricultural cooperative members",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "auth": "/auth/login",
            "member": "/member",
            "admin": "/admin"
        }
    }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1")
        .execute(&state.service_context.db_pool)
        .await
        .is_ok();

    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(json!({
        "status": if database { "healthy" } else { "degraded" },
        "database": database,
        "payment_gateway": state.service_context.payment_service.gateway_name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{AttemptStatus, PaymentAttempt, ProviderStatus},
    error::{AppError, Result},
    payments::{
        callback::{verify_signature, MomoCallback, SIGNATURE_HEADER},
        protocol::{ApiEnvelope, CheckStatusRequest, InitiatePaymentRequest, InitiatedPayment, PaymentStatusView},
    },
};

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

pub async fn initiate(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiEnvelope<InitiatedPayment>>> {
    let attempt = state.service_context.payment_service
        .initiate(&current_user.member, request)
        .await?;

    // A replayed idempotency key answers with the first attempt's outcome.
    let message = match attempt.status {
        AttemptStatus::Failed => {
            return Err(AppError::External(
                attempt.failure_reason.unwrap_or_else(|| "Payment failed".to_string()),
            ));
        }
        AttemptStatus::Successful => "Payment already completed.",
        AttemptStatus::Initiating | AttemptStatus::Pending => {
            "Payment initiated. Please confirm the payment on your phone."
        }
    };

    Ok(Json(ApiEnvelope::ok(
        InitiatedPayment { reference_id: attempt.reference_id },
        message,
    )))
}

pub async fn check_status(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(request): Json<CheckStatusRequest>,
) -> Result<Json<ApiEnvelope<PaymentStatusView>>> {
    request.validate()?;

    let view = state.service_context.payment_service
        .check_status(&current_user.member, &request.reference_id)
        .await?;

    let message = match &view.status {
        ProviderStatus::Successful => "Payment completed successfully.".to_string(),
        status if status.is_failure() => view
            .reason
            .clone()
            .unwrap_or_else(|| format!("Payment {}", status.as_str().to_lowercase())),
        _ => "Waiting for payment confirmation.".to_string(),
    };

    Ok(Json(ApiEnvelope::ok(view, message)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn history(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiEnvelope<Vec<PaymentAttempt>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

    let attempts = state.service_context.payment_service
        .list_for_member(current_user.member.id, limit)
        .await?;

    Ok(Json(ApiEnvelope::ok(attempts, "")))
}

/// Settlement notification pushed by the mobile-money provider. When a
/// callback secret is configured the body must carry a valid signature.
pub async fn momo_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>)> {
    if let Some(secret) = state.settings.momo.callback_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        if !verify_signature(&body, secret, signature) {
            tracing::warn!("rejected payment callback with invalid signature");
            return Err(AppError::Unauthorized);
        }
    }

    let callback: MomoCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid callback body: {}", e)))?;

    let reference_id = callback
        .reference()
        .ok_or_else(|| AppError::BadRequest("Callback carries no reference".to_string()))?;

    let applied = state.service_context.payment_service
        .apply_callback(reference_id, &callback.status, callback.reason_text().as_deref())
        .await?;

    Ok((StatusCode::OK, Json(json!({
        "received": true,
        "known": applied.is_some(),
    }))))
}

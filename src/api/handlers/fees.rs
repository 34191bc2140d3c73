use axum::{extract::State, Extension, Json};

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    error::Result,
    payments::protocol::{ApiEnvelope, OutstandingFees},
    service::FeeSummary,
};

pub async fn outstanding(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiEnvelope<OutstandingFees>>> {
    let fees = state.service_context.fee_service
        .outstanding(current_user.member.id)
        .await?;
    let summary = FeeSummary::from_applications(&fees);

    let message = match &summary {
        Some(summary) => format!("{} outstanding fee(s), {}", summary.count, summary.formatted_total()),
        None => "No outstanding fees".to_string(),
    };

    Ok(Json(ApiEnvelope::ok(OutstandingFees { fees, summary }, message)))
}

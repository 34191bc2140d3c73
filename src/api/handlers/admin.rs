use axum::{extract::State, Extension, Json};

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    error::Result,
    payments::protocol::ApiEnvelope,
    workers::{PaymentReconciler, ReconcileReport, ReconcilerSettings},
};

/// Runs one reconciliation pass now instead of waiting for the worker.
pub async fn reconcile_payments(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiEnvelope<ReconcileReport>>> {
    tracing::info!(admin_id = %current_user.member.id, "manual payment reconciliation requested");

    let reconciler = PaymentReconciler::new(
        state.service_context.payment_service.clone(),
        ReconcilerSettings::from(&state.settings.reconciler),
    );
    let report = reconciler.run_cycle().await?;

    let message = format!("Checked {} unsettled payment(s)", report.checked);
    Ok(Json(ApiEnvelope::ok(report, message)))
}

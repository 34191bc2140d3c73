use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ReconcilerConfig;
use crate::domain::{AttemptStatus, PaymentAttempt};
use crate::error::{AppError, Result};
use crate::service::payment_service::PaymentService;

const EXPIRY_REASON: &str = "Payment was not confirmed in time";

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub interval: Duration,
    /// Unsettled attempts older than this are failed.
    pub max_pending_age: ChronoDuration,
    pub batch_size: i64,
}

impl From<&ReconcilerConfig> for ReconcilerSettings {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            max_pending_age: ChronoDuration::seconds(config.max_pending_age_secs),
            batch_size: config.batch_size,
        }
    }
}

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Settles payments nobody is polling for: the member closed the dialog,
/// the callback never arrived, or the server restarted mid-payment.
pub struct PaymentReconciler {
    payments: Arc<PaymentService>,
    settings: ReconcilerSettings,
}

impl PaymentReconciler {
    pub fn new(payments: Arc<PaymentService>, settings: ReconcilerSettings) -> Self {
        Self { payments, settings }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            max_pending_age_secs = self.settings.max_pending_age.num_seconds(),
            "payment reconciler started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("payment reconciler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "payment reconciliation cycle failed");
                    }
                }
            }
        }
    }

    /// One pass over the unsettled attempts. A failure on one attempt is
    /// logged and counted; the pass carries on.
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let attempts = self.payments.list_unsettled(self.settings.batch_size).await?;
        let mut report = ReconcileReport::default();

        for attempt in &attempts {
            report.checked += 1;
            match self.reconcile(attempt).await {
                Ok(Outcome::Settled(AttemptStatus::Successful)) => report.succeeded += 1,
                Ok(Outcome::Settled(_)) => report.failed += 1,
                Ok(Outcome::Expired) => report.expired += 1,
                Ok(Outcome::Unchanged) => report.still_pending += 1,
                Err(e) => {
                    warn!(reference_id = %attempt.reference_id, error = %e, "failed to reconcile payment");
                    report.errors += 1;
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                succeeded = report.succeeded,
                failed = report.failed,
                expired = report.expired,
                errors = report.errors,
                "payment reconciliation cycle complete"
            );
        }

        Ok(report)
    }

    async fn reconcile(&self, attempt: &PaymentAttempt) -> Result<Outcome> {
        let expired = Utc::now() - attempt.created_at > self.settings.max_pending_age;

        let refreshed = self.payments.refresh(attempt).await;
        match refreshed {
            Ok(status) if status.is_terminal() => return Ok(Outcome::Settled(status)),
            Ok(_) => {}
            // The provider never saw the request; only age can settle it.
            Err(AppError::NotFound(_)) => {}
            Err(e) if !expired => return Err(e),
            Err(e) => warn!(reference_id = %attempt.reference_id, error = %e, "expiring payment the provider cannot report"),
        }

        if expired && self.payments.expire(attempt, EXPIRY_REASON).await? {
            return Ok(Outcome::Expired);
        }

        Ok(Outcome::Unchanged)
    }
}

enum Outcome {
    Settled(AttemptStatus),
    Expired,
    Unchanged,
}

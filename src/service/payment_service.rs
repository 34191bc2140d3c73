use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::*,
    error::{AppError, Result},
    payments::{
        protocol::{InitiatePaymentRequest, PaymentStatusView},
        CollectionRequest, PaymentGateway,
    },
    repository::{FeeRepository, PaymentAttemptRepository},
    service::fee_service::{display_amount, format_rwf, round_rwf},
};

pub struct PaymentService {
    attempts: Arc<dyn PaymentAttemptRepository>,
    fees: Arc<dyn FeeRepository>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        attempts: Arc<dyn PaymentAttemptRepository>,
        fees: Arc<dyn FeeRepository>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            attempts,
            fees,
            gateway,
            currency: currency.into(),
        }
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Records a payment attempt and asks the provider to collect it.
    ///
    /// A request repeating an idempotency key returns the attempt created
    /// by the first request and never reaches the provider again.
    pub async fn initiate(&self, member: &Member, request: InitiatePaymentRequest) -> Result<PaymentAttempt> {
        request.validate()?;

        let phone_number = request.phone_number.trim().to_string();
        if phone_number.is_empty() {
            return Err(AppError::Validation("Phone number is required".to_string()));
        }
        if request.payment_type == PaymentType::Single && request.fee_application_ids.len() != 1 {
            return Err(AppError::Validation("A single payment covers exactly one fee".to_string()));
        }
        let unique: HashSet<&Uuid> = request.fee_application_ids.iter().collect();
        if unique.len() != request.fee_application_ids.len() {
            return Err(AppError::Validation("A fee can only be paid once per payment".to_string()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(AppError::Validation("Amount must be positive".to_string()));
        }

        let idempotency_key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(existing) = self.attempts.find_by_idempotency_key(&idempotency_key).await? {
            return self.replay(member, existing);
        }

        let total = self.outstanding_total(member, &request.fee_application_ids).await?;
        if round_rwf(total) != round_rwf(request.amount) {
            return Err(AppError::Validation(format!(
                "Amount does not match the outstanding total of {}",
                format_rwf(display_amount(total))
            )));
        }
        let amount = round_rwf(total);

        let (attempt, created) = self
            .attempts
            .create_or_get(NewPaymentAttempt {
                idempotency_key,
                member_id: member.id,
                reference_id: Uuid::new_v4().to_string(),
                phone_number: phone_number.clone(),
                amount,
                currency: self.currency.clone(),
                description: request.description.clone(),
                payment_type: request.payment_type,
                fee_application_ids: request.fee_application_ids.clone(),
            })
            .await?;

        if !created {
            // Lost a race against a concurrent request with the same key.
            return self.replay(member, attempt);
        }

        let collection = CollectionRequest {
            reference_id: attempt.reference_id.clone(),
            amount,
            currency: self.currency.clone(),
            payer_phone: phone_number,
            payer_message: request.description.clone(),
            payee_note: format!("{} fee(s) for member {}", attempt.fee_application_ids.len(), member.id),
        };

        match self.gateway.request_to_pay(&collection).await {
            Ok(()) => {
                self.attempts.mark_pending(attempt.id).await?;
                info!(
                    reference_id = %attempt.reference_id,
                    member_id = %member.id,
                    amount = %amount,
                    gateway = self.gateway.name(),
                    "payment initiated"
                );
                Ok(PaymentAttempt { status: AttemptStatus::Pending, ..attempt })
            }
            Err(e) => {
                warn!(reference_id = %attempt.reference_id, error = %e, "payment initiation failed");
                self.attempts
                    .settle(attempt.id, AttemptStatus::Failed, None, Some(&e.to_string()), Utc::now())
                    .await?;
                Err(e.into())
            }
        }
    }

    fn replay(&self, member: &Member, existing: PaymentAttempt) -> Result<PaymentAttempt> {
        if existing.member_id != member.id {
            return Err(AppError::Conflict("Idempotency key already used".to_string()));
        }
        info!(reference_id = %existing.reference_id, "duplicate payment request, returning first attempt");
        Ok(existing)
    }

    /// Sum of the requested fees, all of which must be outstanding fees of
    /// `member`.
    async fn outstanding_total(&self, member: &Member, ids: &[Uuid]) -> Result<Decimal> {
        let fees = self.fees.find_by_ids(ids).await?;

        let owned: Vec<&FeeApplication> = fees.iter().filter(|f| f.member_id == member.id).collect();
        if owned.len() != ids.len() {
            return Err(AppError::NotFound("Fee application not found".to_string()));
        }
        if let Some(paid) = owned.iter().find(|f| !f.status.is_outstanding()) {
            return Err(AppError::Conflict(format!("Fee {} is already paid", paid.id)));
        }

        Ok(owned.iter().map(|f| f.amount).sum())
    }

    /// Current status of one of `member`'s payments. Settled attempts are
    /// answered from storage; others are checked with the provider and
    /// settled on the way.
    pub async fn check_status(&self, member: &Member, reference_id: &str) -> Result<PaymentStatusView> {
        let attempt = self
            .attempts
            .find_by_reference(reference_id)
            .await?
            .filter(|a| a.member_id == member.id)
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

        if attempt.failed_unconfirmed() {
            return self.recheck_unconfirmed(attempt).await;
        }
        if attempt.status.is_terminal() {
            return Ok(stored_view(&attempt));
        }

        let transaction = self.gateway.transaction_status(reference_id).await?;
        let attempt_status = self
            .apply_provider_status(&attempt, &transaction.status, transaction.reason.as_deref())
            .await?;

        Ok(PaymentStatusView {
            reference_id: attempt.reference_id,
            status: transaction.status,
            attempt_status: Some(attempt_status),
            reason: transaction.reason,
        })
    }

    /// An attempt failed without a provider outcome is still asked about
    /// once more. Only a confirmed success changes it; anything else,
    /// provider errors included, answers from storage.
    async fn recheck_unconfirmed(&self, attempt: PaymentAttempt) -> Result<PaymentStatusView> {
        let transaction = match self.gateway.transaction_status(&attempt.reference_id).await {
            Ok(transaction) => transaction,
            Err(e) => {
                debug!(reference_id = %attempt.reference_id, error = %e, "no provider outcome for failed payment");
                return Ok(stored_view(&attempt));
            }
        };

        if transaction.status != ProviderStatus::Successful {
            return Ok(stored_view(&attempt));
        }

        let attempt_status = self.apply_provider_status(&attempt, &transaction.status, None).await?;
        Ok(PaymentStatusView {
            reference_id: attempt.reference_id,
            status: transaction.status,
            attempt_status: Some(attempt_status),
            reason: None,
        })
    }

    /// Folds a provider report into the stored attempt. Shared by the status
    /// query, the provider callback and the reconciler; applying the same
    /// terminal report twice changes nothing the second time. A success
    /// reported after the attempt expired still settles it.
    pub async fn apply_provider_status(
        &self,
        attempt: &PaymentAttempt,
        status: &ProviderStatus,
        reason: Option<&str>,
    ) -> Result<AttemptStatus> {
        if !attempt.accepts(status) {
            return Ok(attempt.status);
        }
        if attempt.failed_unconfirmed() {
            warn!(reference_id = %attempt.reference_id, "provider confirmed a payment already marked failed");
        }

        let Some(outcome) = status.settles_to() else {
            self.attempts.record_provider_status(attempt.id, status).await?;
            return Ok(attempt.status);
        };

        let failure_reason = match outcome {
            AttemptStatus::Failed => Some(
                reason
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Provider reported {}", status)),
            ),
            _ => None,
        };

        let settled = self
            .attempts
            .settle(attempt.id, outcome, Some(status), failure_reason.as_deref(), Utc::now())
            .await?;

        if settled {
            info!(
                reference_id = %attempt.reference_id,
                status = %status,
                fees = attempt.fee_application_ids.len(),
                "payment settled"
            );
            return Ok(outcome);
        }

        // Someone else settled it first; report what they recorded.
        let current = self
            .attempts
            .find_by_reference(&attempt.reference_id)
            .await?
            .map(|a| a.status)
            .unwrap_or(outcome);
        Ok(current)
    }

    /// Provider push notification. Unknown references are acknowledged and
    /// ignored.
    pub async fn apply_callback(
        &self,
        reference_id: &str,
        status: &ProviderStatus,
        reason: Option<&str>,
    ) -> Result<Option<AttemptStatus>> {
        let Some(attempt) = self.attempts.find_by_reference(reference_id).await? else {
            warn!(reference_id, status = %status, "callback for unknown payment");
            return Ok(None);
        };

        info!(reference_id, status = %status, "payment callback received");
        self.apply_provider_status(&attempt, status, reason).await.map(Some)
    }

    /// Fails an attempt the provider never settled.
    pub async fn expire(&self, attempt: &PaymentAttempt, reason: &str) -> Result<bool> {
        let expired = self
            .attempts
            .settle(attempt.id, AttemptStatus::Failed, None, Some(reason), Utc::now())
            .await?;
        if expired {
            warn!(reference_id = %attempt.reference_id, reason, "payment expired");
        }
        Ok(expired)
    }

    /// Provider view of an unsettled attempt, settled on the way.
    pub async fn refresh(&self, attempt: &PaymentAttempt) -> Result<AttemptStatus> {
        let transaction = self.gateway.transaction_status(&attempt.reference_id).await?;
        self.apply_provider_status(attempt, &transaction.status, transaction.reason.as_deref())
            .await
    }

    pub async fn list_for_member(&self, member_id: Uuid, limit: i64) -> Result<Vec<PaymentAttempt>> {
        self.attempts.list_by_member(member_id, limit).await
    }

    pub async fn list_unsettled(&self, limit: i64) -> Result<Vec<PaymentAttempt>> {
        self.attempts.list_unsettled(limit).await
    }
}

fn stored_view(attempt: &PaymentAttempt) -> PaymentStatusView {
    // Expired attempts may still carry the last non-terminal marker.
    let status = match &attempt.provider_status {
        Some(status) if status.is_terminal() => status.clone(),
        _ => match attempt.status {
            AttemptStatus::Successful => ProviderStatus::Successful,
            AttemptStatus::Failed => ProviderStatus::Failed,
            AttemptStatus::Initiating | AttemptStatus::Pending => ProviderStatus::Pending,
        },
    };

    PaymentStatusView {
        reference_id: attempt.reference_id.clone(),
        status,
        attempt_status: Some(attempt.status),
        reason: attempt.failure_reason.clone(),
    }
}

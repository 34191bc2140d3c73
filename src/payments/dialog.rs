//! Headless controller behind the "pay this fee" and "pay all fees"
//! dialogs. A front end renders [`PaymentFlowState`] and forwards user
//! actions; the controller owns the polling task and tears it down with
//! the dialog.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::PaymentApi;
use crate::domain::{FeeApplication, PaymentType};
use crate::error::{AppError, Result};
use crate::payments::flow::{apply, run_payment_flow, FlowEvent, PaymentFlowState};
use crate::payments::poller::PollPolicy;
use crate::payments::protocol::InitiatePaymentRequest;
use crate::service::fee_service::{round_rwf, FeeSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogVariant {
    Single,
    Bulk,
}

impl DialogVariant {
    /// The bulk dialog refuses to close while a payment is in flight; the
    /// single-fee dialog lets the member walk away.
    pub fn blocks_dismiss_while_busy(&self) -> bool {
        matches!(self, DialogVariant::Bulk)
    }

    fn payment_type(&self) -> PaymentType {
        match self {
            DialogVariant::Single => PaymentType::Single,
            DialogVariant::Bulk => PaymentType::Bulk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The dialog closed. `reload_fees` asks the caller to refresh the fee
    /// list because a payment went through.
    Closed { reload_fees: bool },
    Blocked,
}

pub struct PaymentDialog {
    variant: DialogVariant,
    api: Arc<dyn PaymentApi>,
    policy: PollPolicy,
    fee_application_ids: Vec<Uuid>,
    amount: Decimal,
    description: String,
    phone_number: String,
    state: Arc<watch::Sender<PaymentFlowState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<PaymentFlowState>>,
    open: bool,
}

impl PaymentDialog {
    fn new(
        variant: DialogVariant,
        api: Arc<dyn PaymentApi>,
        policy: PollPolicy,
        fee_application_ids: Vec<Uuid>,
        amount: Decimal,
        description: String,
    ) -> Self {
        let (state, _) = watch::channel(PaymentFlowState::Idle);
        Self {
            variant,
            api,
            policy,
            fee_application_ids,
            amount,
            description,
            phone_number: String::new(),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            task: None,
            open: false,
        }
    }

    pub fn single(
        api: Arc<dyn PaymentApi>,
        fee: &FeeApplication,
        description: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        Self::new(
            DialogVariant::Single,
            api,
            policy,
            vec![fee.id],
            round_rwf(fee.amount),
            description.into(),
        )
    }

    /// Dialog paying every outstanding fee at once. There is no dialog when
    /// nothing is outstanding.
    pub fn bulk(api: Arc<dyn PaymentApi>, summary: Option<&FeeSummary>, policy: PollPolicy) -> Option<Self> {
        let summary = summary.filter(|s| s.count > 0)?;
        Some(Self::new(
            DialogVariant::Bulk,
            api,
            policy,
            summary.fee_application_ids.clone(),
            Decimal::from(summary.display_total),
            format!("Payment for {} outstanding fees", summary.count),
        ))
    }

    pub fn variant(&self) -> DialogVariant {
        self.variant
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn set_phone_number(&mut self, phone_number: impl Into<String>) {
        self.phone_number = phone_number.into();
    }

    pub fn status(&self) -> PaymentFlowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentFlowState> {
        self.state.subscribe()
    }

    /// Shows the dialog with a clean slate. Work left over from a previous
    /// opening is cancelled.
    pub fn open(&mut self) {
        self.stop_flow();
        self.cancel = CancellationToken::new();
        self.phone_number.clear();
        self.state.send_replace(PaymentFlowState::Idle);
        self.open = true;
    }

    /// Starts a payment with the entered phone number. A blank number is
    /// refused before anything is sent.
    pub fn submit(&mut self) -> Result<()> {
        if !self.open {
            return Err(AppError::BadRequest("payment dialog is not open".to_string()));
        }

        let phone_number = self.phone_number.trim().to_string();
        if phone_number.is_empty() {
            return Err(AppError::Validation("Please enter your phone number".to_string()));
        }

        self.status()
            .on(FlowEvent::Submit)
            .map_err(|e| AppError::Conflict(e.to_string()))?;
        apply(&self.state, FlowEvent::Submit);

        let request = InitiatePaymentRequest {
            fee_application_ids: self.fee_application_ids.clone(),
            phone_number,
            amount: self.amount,
            description: self.description.clone(),
            payment_type: self.variant.payment_type(),
            idempotency_key: Some(Uuid::new_v4().to_string()),
        };

        info!(variant = ?self.variant, fees = request.fee_application_ids.len(), "submitting payment");

        self.task = Some(tokio::spawn(run_payment_flow(
            self.api.clone(),
            request,
            self.policy,
            self.cancel.clone(),
            self.state.clone(),
        )));

        Ok(())
    }

    /// Waits for the running submission to finish (or be cancelled) and
    /// returns the state it left behind.
    pub async fn settled(&mut self) -> PaymentFlowState {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "payment flow task ended abnormally");
            }
        }
        self.status()
    }

    pub fn request_close(&mut self) -> CloseOutcome {
        let state = self.status();
        if state.is_busy() && self.variant.blocks_dismiss_while_busy() {
            return CloseOutcome::Blocked;
        }

        self.stop_flow();
        self.open = false;
        CloseOutcome::Closed { reload_fees: matches!(state, PaymentFlowState::Successful { .. }) }
    }

    /// "Try again" after a failure. The phone number is kept.
    pub fn retry(&mut self) -> Result<()> {
        self.status()
            .on(FlowEvent::Retry)
            .map_err(|e| AppError::Conflict(e.to_string()))?;
        self.task = None;
        apply(&self.state, FlowEvent::Retry);
        Ok(())
    }

    fn stop_flow(&mut self) {
        self.cancel.cancel();
        self.task = None;
    }
}

impl Drop for PaymentDialog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

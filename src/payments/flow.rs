use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::PaymentApi;
use crate::domain::ProviderStatus;
use crate::error::{AppError, Result};
use crate::payments::poller::{
    poll_until_settled, CheckErrorPolicy, CheckReport, PollFailure, PollOutcome, PollPolicy, StatusSource,
};
use crate::payments::protocol::InitiatePaymentRequest;

const PENDING_MESSAGE: &str = "Payment request sent. Please confirm the payment on your phone.";
const SUCCESS_MESSAGE: &str = "Payment completed successfully.";
const TIMEOUT_MESSAGE: &str =
    "Payment confirmation timed out. Check your payment history before trying again.";

/// What a payment dialog shows. Lives only as long as the dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentFlowState {
    Idle,
    Initiating,
    Pending { reference_id: String, checks: u32 },
    Successful { reference_id: String, message: String },
    Failed { reference_id: Option<String>, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Submit,
    Initiated { reference_id: String },
    InitiationFailed { message: String },
    Checked(ProviderStatus),
    CheckFailed { message: String, fatal: bool },
    AttemptsExhausted,
    Retry,
    Reset,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot apply {event} while {state}")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: &'static str,
}

impl PaymentFlowState {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentFlowState::Idle => "idle",
            PaymentFlowState::Initiating => "initiating",
            PaymentFlowState::Pending { .. } => "pending",
            PaymentFlowState::Successful { .. } => "successful",
            PaymentFlowState::Failed { .. } => "failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PaymentFlowState::Idle => "",
            PaymentFlowState::Initiating => "Sending payment request...",
            PaymentFlowState::Pending { .. } => PENDING_MESSAGE,
            PaymentFlowState::Successful { message, .. } | PaymentFlowState::Failed { message, .. } => message,
        }
    }

    pub fn reference_id(&self) -> Option<&str> {
        match self {
            PaymentFlowState::Pending { reference_id, .. }
            | PaymentFlowState::Successful { reference_id, .. } => Some(reference_id),
            PaymentFlowState::Failed { reference_id, .. } => reference_id.as_deref(),
            PaymentFlowState::Idle | PaymentFlowState::Initiating => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentFlowState::Successful { .. } | PaymentFlowState::Failed { .. })
    }

    /// A request is in flight or awaiting the payer.
    pub fn is_busy(&self) -> bool {
        matches!(self, PaymentFlowState::Initiating | PaymentFlowState::Pending { .. })
    }

    /// Pure transition function of the payment flow.
    pub fn on(&self, event: FlowEvent) -> std::result::Result<Self, InvalidTransition> {
        use PaymentFlowState::*;

        let next = match (self, event) {
            (_, FlowEvent::Reset) => Idle,
            (Idle, FlowEvent::Submit) => Initiating,
            (Initiating, FlowEvent::Initiated { reference_id }) => Pending { reference_id, checks: 0 },
            (Initiating, FlowEvent::InitiationFailed { message }) => Failed { reference_id: None, message },
            (Pending { reference_id, checks }, FlowEvent::Checked(status)) => {
                let reference_id = reference_id.clone();
                if status == ProviderStatus::Successful {
                    Successful { reference_id, message: SUCCESS_MESSAGE.to_string() }
                } else if status.is_failure() {
                    Failed { reference_id: Some(reference_id), message: failure_message(&status) }
                } else {
                    Pending { reference_id, checks: checks + 1 }
                }
            }
            (Pending { reference_id, checks }, FlowEvent::CheckFailed { message, fatal }) => {
                if fatal {
                    Failed { reference_id: Some(reference_id.clone()), message }
                } else {
                    Pending { reference_id: reference_id.clone(), checks: checks + 1 }
                }
            }
            (Pending { reference_id, .. }, FlowEvent::AttemptsExhausted) => Failed {
                reference_id: Some(reference_id.clone()),
                message: TIMEOUT_MESSAGE.to_string(),
            },
            (Failed { .. }, FlowEvent::Retry) => Idle,
            (state, event) => {
                return Err(InvalidTransition { state: state.name(), event: event_name(&event) });
            }
        };

        Ok(next)
    }
}

fn event_name(event: &FlowEvent) -> &'static str {
    match event {
        FlowEvent::Submit => "submit",
        FlowEvent::Initiated { .. } => "initiated",
        FlowEvent::InitiationFailed { .. } => "initiation_failed",
        FlowEvent::Checked(_) => "checked",
        FlowEvent::CheckFailed { .. } => "check_failed",
        FlowEvent::AttemptsExhausted => "attempts_exhausted",
        FlowEvent::Retry => "retry",
        FlowEvent::Reset => "reset",
    }
}

fn failure_message(status: &ProviderStatus) -> String {
    match status {
        ProviderStatus::Rejected => "Payment was rejected.".to_string(),
        ProviderStatus::Timeout => "Payment was not approved in time.".to_string(),
        other => format!("Payment failed ({}).", other),
    }
}

/// Applies `event` to the published state. Invalid transitions are logged
/// and leave the state as it was.
pub(crate) fn apply(state: &watch::Sender<PaymentFlowState>, event: FlowEvent) {
    state.send_modify(|current| match current.on(event) {
        Ok(next) => {
            debug!(from = current.name(), to = next.name(), "payment flow transition");
            *current = next;
        }
        Err(e) => warn!(error = %e, "ignored payment flow event"),
    });
}

/// Status checks through the member API. A response with `success: false`
/// counts as a failed check.
struct ApiStatus<'a> {
    api: &'a dyn PaymentApi,
}

#[async_trait::async_trait]
impl StatusSource for ApiStatus<'_> {
    async fn check_status(&self, reference_id: &str) -> Result<ProviderStatus> {
        let envelope = self.api.check_status(reference_id).await?;
        match envelope.data {
            Some(view) if envelope.success => Ok(view.status),
            _ => Err(AppError::External(non_empty(envelope.message, "Unable to check payment status"))),
        }
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() { fallback.to_string() } else { message }
}

/// Drives one submission from `Initiating` to a terminal state, publishing
/// every transition on `state`. Returns early, leaving the state untouched,
/// once `cancel` fires.
pub async fn run_payment_flow(
    api: Arc<dyn PaymentApi>,
    request: InitiatePaymentRequest,
    policy: PollPolicy,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PaymentFlowState>>,
) -> PaymentFlowState {
    let initiated = tokio::select! {
        biased;
        _ = cancel.cancelled() => return state.borrow().clone(),
        result = api.initiate(&request) => result,
    };

    let reference_id = match initiated {
        Ok(envelope) => match envelope.data {
            Some(data) if envelope.success => data.reference_id,
            _ => {
                let message = non_empty(envelope.message, "Payment could not be initiated");
                warn!(message = %message, "payment initiation refused");
                apply(&state, FlowEvent::InitiationFailed { message });
                return state.borrow().clone();
            }
        },
        Err(e) => {
            warn!(error = %e, "payment initiation failed");
            apply(&state, FlowEvent::InitiationFailed { message: e.public_message() });
            return state.borrow().clone();
        }
    };

    info!(reference_id = %reference_id, "payment initiated, awaiting confirmation");
    apply(&state, FlowEvent::Initiated { reference_id: reference_id.clone() });

    let fatal = policy.on_check_error == CheckErrorPolicy::Fail;
    let source = ApiStatus { api: api.as_ref() };
    let outcome = poll_until_settled(&source, &reference_id, &policy, &cancel, |_, report| match report {
        CheckReport::Status(status) => apply(&state, FlowEvent::Checked(status.clone())),
        CheckReport::Error(e) => apply(&state, FlowEvent::CheckFailed { message: e.public_message(), fatal }),
    })
    .await;

    match outcome {
        PollOutcome::Failed { failure: PollFailure::AttemptsExhausted, .. } => {
            apply(&state, FlowEvent::AttemptsExhausted);
        }
        PollOutcome::Cancelled { checks } => {
            debug!(reference_id = %reference_id, checks, "payment flow cancelled");
        }
        PollOutcome::Successful { .. } | PollOutcome::Failed { .. } => {}
    }

    // The watch guard has to drop before `state`, so it cannot be the tail expression.
    let final_state = state.borrow().clone();
    final_state
}

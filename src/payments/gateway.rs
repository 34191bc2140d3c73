use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::ProviderStatus;
use crate::error::AppError;

/// A collection ("request to pay") sent to the payer's phone.
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    /// Our reference, chosen before the call so the attempt is traceable
    /// even if the provider never answers.
    pub reference_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payer_phone: String,
    pub payer_message: String,
    pub payee_note: String,
}

#[derive(Debug, Clone)]
pub struct ProviderTransaction {
    pub reference_id: String,
    pub status: ProviderStatus,
    pub reason: Option<String>,
    pub financial_transaction_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transaction {0} not known to provider")]
    NotFound(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid payer phone number: {0}")]
    InvalidPhone(String),
}

impl GatewayError {
    /// Whether the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network(_) => true,
            GatewayError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidPhone(msg) => AppError::Validation(msg),
            GatewayError::NotFound(reference) => {
                AppError::NotFound(format!("Payment {} not found at provider", reference))
            }
            other => AppError::External(other.to_string()),
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError>;

    async fn transaction_status(&self, reference_id: &str) -> Result<ProviderTransaction, GatewayError>;
}

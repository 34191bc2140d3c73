//! Request and response bodies of the member payment endpoints, shared by
//! the server handlers and the HTTP client.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{AttemptStatus, FeeApplication, PaymentType, ProviderStatus};
use crate::service::fee_service::FeeSummary;

/// Every payment endpoint answers with this envelope, failures included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 1, message = "select at least one fee to pay"))]
    pub fee_application_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 20, message = "phone number is required"))]
    pub phone_number: String,
    pub amount: Decimal,
    #[validate(length(max = 255))]
    pub description: String,
    pub payment_type: PaymentType,
    /// Client-generated key; resubmitting the same key returns the first
    /// attempt instead of charging again.
    #[serde(default)]
    #[validate(length(min = 8, max = 64))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatedPayment {
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckStatusRequest {
    #[validate(length(min = 1, max = 64))]
    pub reference_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub reference_id: String,
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_status: Option<AttemptStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `GET /member/fees/outstanding`. `summary` is absent when
/// nothing is owed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstandingFees {
    pub fees: Vec<FeeApplication>,
    #[serde(default)]
    pub summary: Option<FeeSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_without_data_parses() {
        let parsed: ApiEnvelope<InitiatedPayment> =
            serde_json::from_str(r#"{"success":false,"message":"Payer not found"}"#).unwrap();
        assert!(!parsed.success);
        assert!(parsed.data.is_none());
        assert_eq!(parsed.message, "Payer not found");
    }

    #[test]
    fn initiate_request_accepts_numeric_amount() {
        let body = r#"{
            "fee_application_ids": ["6f2a4f5e-7b2c-4d0e-9a51-0b7c2d1e3f40"],
            "phone_number": "0788123456",
            "amount": 15000,
            "description": "Season A fees",
            "payment_type": "single"
        }"#;
        let parsed: InitiatePaymentRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.amount, Decimal::from(15000));
        assert_eq!(parsed.payment_type, PaymentType::Single);
        assert!(parsed.idempotency_key.is_none());
        assert!(parsed.validate().is_ok());
    }
}

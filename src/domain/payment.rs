use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Single,
    Bulk,
}

/// Server-side lifecycle of one payment attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Initiating,
    Pending,
    Successful,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Successful | AttemptStatus::Failed)
    }
}

/// Transaction status as reported by the mobile-money provider.
///
/// Anything the provider reports that is not one of the terminal markers
/// is treated as still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Successful,
    Failed,
    Rejected,
    Timeout,
    Other(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => ProviderStatus::Pending,
            "SUCCESSFUL" | "SUCCESS" => ProviderStatus::Successful,
            "FAILED" => ProviderStatus::Failed,
            "REJECTED" => ProviderStatus::Rejected,
            "TIMEOUT" => ProviderStatus::Timeout,
            _ => ProviderStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderStatus::Pending => "PENDING",
            ProviderStatus::Successful => "SUCCESSFUL",
            ProviderStatus::Failed => "FAILED",
            ProviderStatus::Rejected => "REJECTED",
            ProviderStatus::Timeout => "TIMEOUT",
            ProviderStatus::Other(raw) => raw,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProviderStatus::Failed | ProviderStatus::Rejected | ProviderStatus::Timeout
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderStatus::Successful) || self.is_failure()
    }

    /// Attempt status this provider report settles to, if any.
    pub fn settles_to(&self) -> Option<AttemptStatus> {
        if matches!(self, ProviderStatus::Successful) {
            Some(AttemptStatus::Successful)
        } else if self.is_failure() {
            Some(AttemptStatus::Failed)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ProviderStatus::parse(&raw))
    }
}

/// Durable record of a payment initiation. Written before the provider is
/// contacted so an in-flight payment always leaves a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub idempotency_key: String,
    pub member_id: Uuid,
    pub reference_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub payment_type: PaymentType,
    pub fee_application_ids: Vec<Uuid>,
    pub status: AttemptStatus,
    pub provider_status: Option<ProviderStatus>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentAttempt {
    /// Failed without the provider ever reporting an outcome, e.g. expired
    /// by the reconciler. The provider may still confirm the collection.
    pub fn failed_unconfirmed(&self) -> bool {
        self.status == AttemptStatus::Failed
            && !self.provider_status.as_ref().is_some_and(ProviderStatus::is_terminal)
    }

    /// Whether a provider report of `status` may still change this attempt.
    pub fn accepts(&self, status: &ProviderStatus) -> bool {
        !self.status.is_terminal()
            || (self.failed_unconfirmed() && *status == ProviderStatus::Successful)
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentAttempt {
    pub idempotency_key: String,
    pub member_id: Uuid,
    pub reference_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub payment_type: PaymentType,
    pub fee_application_ids: Vec<Uuid>,
}

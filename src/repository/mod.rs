use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::Result;

pub mod member_repository;
pub mod fee_repository;
pub mod payment_attempt_repository;

pub use member_repository::SqliteMemberRepository;
pub use fee_repository::SqliteFeeRepository;
pub use payment_attempt_repository::SqlitePaymentAttemptRepository;

#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn create(&self, member: CreateMemberRequest) -> Result<Member>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Member>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Member>>;
}

#[async_trait]
pub trait FeeRepository: Send + Sync {
    async fn create_rule(&self, rule: FeeRule) -> Result<FeeRule>;
    async fn find_rule(&self, id: Uuid) -> Result<Option<FeeRule>>;
    async fn apply(&self, application: NewFeeApplication) -> Result<FeeApplication>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<FeeApplication>>;
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FeeApplication>>;
    async fn list_by_member(&self, member_id: Uuid) -> Result<Vec<FeeApplication>>;
    async fn list_outstanding_by_member(&self, member_id: Uuid) -> Result<Vec<FeeApplication>>;
}

#[async_trait]
pub trait PaymentAttemptRepository: Send + Sync {
    /// Inserts the attempt unless one with the same idempotency key exists.
    /// Returns the stored attempt and whether this call created it. A new
    /// attempt covering a fee that another unsettled attempt already covers
    /// is a `Conflict` and is not stored.
    async fn create_or_get(&self, attempt: NewPaymentAttempt) -> Result<(PaymentAttempt, bool)>;
    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<PaymentAttempt>>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentAttempt>>;
    async fn list_by_member(&self, member_id: Uuid, limit: i64) -> Result<Vec<PaymentAttempt>>;
    /// Attempts still waiting on the provider, oldest first.
    async fn list_unsettled(&self, limit: i64) -> Result<Vec<PaymentAttempt>>;
    async fn mark_pending(&self, id: Uuid) -> Result<()>;
    async fn record_provider_status(&self, id: Uuid, status: &ProviderStatus) -> Result<()>;
    /// Moves a non-terminal attempt to a terminal status. When the outcome is
    /// `Successful` every linked fee application is marked paid in the same
    /// transaction. Returns false if the attempt was already settled. The
    /// one exception is a `failed` attempt without a terminal provider
    /// status, which can still be settled as `Successful`.
    async fn settle(
        &self,
        id: Uuid,
        outcome: AttemptStatus,
        provider_status: Option<&ProviderStatus>,
        failure_reason: Option<&str>,
        settled_at: DateTime<Utc>,
    ) -> Result<bool>;
}

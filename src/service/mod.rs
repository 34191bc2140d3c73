pub mod fee_service;
pub mod payment_service;

use std::sync::Arc;
use sqlx::SqlitePool;
use crate::repository::*;
use crate::auth::AuthService;
use crate::payments::PaymentGateway;
use fee_service::FeeService;
use payment_service::PaymentService;

pub use fee_service::FeeSummary;

pub struct ServiceContext {
    pub member_repo: Arc<dyn MemberRepository>,
    pub fee_repo: Arc<dyn FeeRepository>,
    pub payment_attempt_repo: Arc<dyn PaymentAttemptRepository>,
    pub auth_service: Arc<AuthService>,
    pub fee_service: Arc<FeeService>,
    pub payment_service: Arc<PaymentService>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        member_repo: Arc<dyn MemberRepository>,
        fee_repo: Arc<dyn FeeRepository>,
        payment_attempt_repo: Arc<dyn PaymentAttemptRepository>,
        gateway: Arc<dyn PaymentGateway>,
        auth_service: Arc<AuthService>,
        currency: &str,
        db_pool: SqlitePool,
    ) -> Self {
        let fee_service = Arc::new(FeeService::new(fee_repo.clone()));
        let payment_service = Arc::new(PaymentService::new(
            payment_attempt_repo.clone(),
            fee_repo.clone(),
            gateway,
            currency,
        ));

        Self {
            member_repo,
            fee_repo,
            payment_attempt_repo,
            auth_service,
            fee_service,
            payment_service,
            db_pool,
        }
    }

    /// Wires the SQLite repositories around `db_pool`.
    pub fn sqlite(
        db_pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        currency: &str,
        session_duration_hours: i64,
    ) -> Self {
        Self::new(
            Arc::new(SqliteMemberRepository::new(db_pool.clone())),
            Arc::new(SqliteFeeRepository::new(db_pool.clone())),
            Arc::new(SqlitePaymentAttemptRepository::new(db_pool.clone())),
            gateway,
            Arc::new(AuthService::new(db_pool.clone(), session_duration_hours)),
            currency,
            db_pool,
        )
    }
}

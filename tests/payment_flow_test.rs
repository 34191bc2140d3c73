mod common;

use chrono::Duration;
use cooperative::{
    domain::{AttemptStatus, FeeStatus, MemberRole, PaymentType, ProviderStatus},
    error::AppError,
    payments::{protocol::InitiatePaymentRequest, SandboxGateway, SandboxStep},
    repository::FeeRepository,
    service::ServiceContext,
    workers::{PaymentReconciler, ReconcileReport, ReconcilerSettings},
};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use common::{age_attempt, create_fee, create_member, test_pool};

struct Harness {
    pool: SqlitePool,
    sandbox: Arc<SandboxGateway>,
    context: ServiceContext,
}

async fn harness(sandbox: SandboxGateway) -> anyhow::Result<Harness> {
    let pool = test_pool().await?;
    let sandbox = Arc::new(sandbox);
    let context = ServiceContext::sqlite(pool.clone(), sandbox.clone(), "RWF", 24);
    Ok(Harness { pool, sandbox, context })
}

fn pay(fee_ids: Vec<Uuid>, amount: i64, payment_type: PaymentType) -> InitiatePaymentRequest {
    InitiatePaymentRequest {
        fee_application_ids: fee_ids,
        phone_number: "0788123456".to_string(),
        amount: Decimal::from(amount),
        description: "Season A fees".to_string(),
        payment_type,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn initiate_records_pending_attempt_and_asks_provider() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;

    let attempt = h.context.payment_service
        .initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single))
        .await?;

    assert_eq!(attempt.status, AttemptStatus::Pending);
    assert_eq!(attempt.fee_application_ids, vec![fee.id]);
    assert_eq!(attempt.currency, "RWF");

    let requests = h.sandbox.collection_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reference_id, attempt.reference_id);
    assert_eq!(requests[0].amount, Decimal::from(5000));
    assert_eq!(requests[0].payer_phone, "0788123456");

    let unsettled = h.context.payment_service.list_unsettled(10).await?;
    assert_eq!(unsettled.len(), 1);
    assert_eq!(unsettled[0].status, AttemptStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn repeated_idempotency_key_reaches_provider_once() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let neighbour = create_member(&h.pool, "neighbour@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;

    let mut request = pay(vec![fee.id], 5000, PaymentType::Single);
    request.idempotency_key = Some("double-tap-0001".to_string());

    let first = h.context.payment_service.initiate(&member, request.clone()).await?;
    let second = h.context.payment_service.initiate(&member, request.clone()).await?;

    assert_eq!(first.reference_id, second.reference_id);
    assert_eq!(h.sandbox.collection_requests().len(), 1);

    let result = h.context.payment_service.initiate(&neighbour, request).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(h.sandbox.collection_requests().len(), 1);

    Ok(())
}

#[tokio::test]
async fn fee_with_payment_in_progress_cannot_be_paid_again() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    let payments = &h.context.payment_service;

    let mut first_request = pay(vec![fee.id], 5000, PaymentType::Single);
    first_request.idempotency_key = Some("first-key-0001".to_string());
    let first = payments.initiate(&member, first_request).await?;

    let mut retry_request = pay(vec![fee.id], 5000, PaymentType::Single);
    retry_request.idempotency_key = Some("retry-key-0002".to_string());
    let result = payments.initiate(&member, retry_request.clone()).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(h.sandbox.collection_requests().len(), 1);
    assert_eq!(payments.list_for_member(member.id, 10).await?.len(), 1);

    payments
        .apply_callback(&first.reference_id, &ProviderStatus::Failed, Some("Payer declined"))
        .await?;

    let retried = payments.initiate(&member, retry_request).await?;
    assert_eq!(retried.status, AttemptStatus::Pending);
    assert_ne!(retried.reference_id, first.reference_id);
    assert_eq!(h.sandbox.collection_requests().len(), 2);

    Ok(())
}

#[tokio::test]
async fn invalid_requests_never_reach_provider() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let neighbour = create_member(&h.pool, "neighbour@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    let other_fee = create_fee(&h.pool, member.id, "2000").await?;
    let foreign_fee = create_fee(&h.pool, neighbour.id, "5000").await?;
    let payments = &h.context.payment_service;

    let mismatch = payments.initiate(&member, pay(vec![fee.id], 4000, PaymentType::Single)).await;
    assert!(matches!(mismatch, Err(AppError::Validation(_))));

    let mut blank_phone = pay(vec![fee.id], 5000, PaymentType::Single);
    blank_phone.phone_number = "   ".to_string();
    let blank = payments.initiate(&member, blank_phone).await;
    assert!(matches!(blank, Err(AppError::Validation(_))));

    let two_for_single = payments
        .initiate(&member, pay(vec![fee.id, other_fee.id], 7000, PaymentType::Single))
        .await;
    assert!(matches!(two_for_single, Err(AppError::Validation(_))));

    let duplicated = payments.initiate(&member, pay(vec![fee.id, fee.id], 10000, PaymentType::Bulk)).await;
    assert!(matches!(duplicated, Err(AppError::Validation(_))));

    let foreign = payments.initiate(&member, pay(vec![foreign_fee.id], 5000, PaymentType::Single)).await;
    assert!(matches!(foreign, Err(AppError::NotFound(_))));

    let missing = payments.initiate(&member, pay(vec![Uuid::new_v4()], 5000, PaymentType::Single)).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));

    assert!(h.sandbox.collection_requests().is_empty());
    assert!(payments.list_for_member(member.id, 10).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn amounts_match_after_rounding_to_whole_francs() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "7500.50").await?;

    let attempt = h.context.payment_service
        .initiate(&member, pay(vec![fee.id], 7501, PaymentType::Single))
        .await?;

    assert_eq!(attempt.amount, Decimal::from(7501));
    assert_eq!(h.sandbox.collection_requests()[0].amount, Decimal::from(7501));

    Ok(())
}

#[tokio::test]
async fn rejected_initiation_fails_the_attempt() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    h.sandbox.reject_collections("Payer account is not active");

    let result = h.context.payment_service
        .initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single))
        .await;
    assert!(matches!(result, Err(AppError::External(_))));

    let history = h.context.payment_service.list_for_member(member.id, 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AttemptStatus::Failed);
    assert!(history[0].failure_reason.as_deref().unwrap_or_default().contains("not active"));

    // The fee stays payable.
    h.sandbox.accept_collections();
    let retried = h.context.payment_service
        .initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single))
        .await?;
    assert_eq!(retried.status, AttemptStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn successful_payment_marks_fee_paid_once() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    let payments = &h.context.payment_service;

    let attempt = payments.initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single)).await?;

    let first = payments.check_status(&member, &attempt.reference_id).await?;
    assert_eq!(first.status, ProviderStatus::Pending);
    assert_eq!(first.attempt_status, Some(AttemptStatus::Pending));

    let second = payments.check_status(&member, &attempt.reference_id).await?;
    assert_eq!(second.status, ProviderStatus::Successful);
    assert_eq!(second.attempt_status, Some(AttemptStatus::Successful));

    let paid = h.context.fee_repo.find_by_id(fee.id).await?.unwrap();
    assert_eq!(paid.status, FeeStatus::Paid);
    let paid_date = paid.paid_date;
    assert!(paid_date.is_some());

    // Settled attempts are answered from storage.
    let third = payments.check_status(&member, &attempt.reference_id).await?;
    assert_eq!(third.status, ProviderStatus::Successful);
    assert_eq!(h.sandbox.status_calls(), 2);

    // A late callback repeating the outcome changes nothing.
    let replayed = payments
        .apply_callback(&attempt.reference_id, &ProviderStatus::Successful, None)
        .await?;
    assert_eq!(replayed, Some(AttemptStatus::Successful));
    let fee = h.context.fee_repo.find_by_id(fee.id).await?.unwrap();
    assert_eq!(fee.paid_date, paid_date);

    assert!(h.context.fee_service.outstanding_summary(member.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn provider_failure_leaves_fee_outstanding() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::with_statuses([ProviderStatus::Rejected])).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    let payments = &h.context.payment_service;

    let attempt = payments.initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single)).await?;
    let view = payments.check_status(&member, &attempt.reference_id).await?;

    assert_eq!(view.status, ProviderStatus::Rejected);
    assert_eq!(view.attempt_status, Some(AttemptStatus::Failed));
    assert!(view.reason.is_some());

    let fee = h.context.fee_repo.find_by_id(fee.id).await?.unwrap();
    assert_eq!(fee.status, FeeStatus::Pending);
    assert!(fee.paid_date.is_none());

    Ok(())
}

#[tokio::test]
async fn status_of_another_members_payment_is_not_found() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let neighbour = create_member(&h.pool, "neighbour@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;

    let attempt = h.context.payment_service
        .initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single))
        .await?;

    let result = h.context.payment_service.check_status(&neighbour, &attempt.reference_id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let unknown = h.context.payment_service.check_status(&member, "no-such-reference").await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
    assert_eq!(h.sandbox.status_calls(), 0);

    Ok(())
}

#[tokio::test]
async fn bulk_payment_settles_every_fee() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::with_statuses([ProviderStatus::Successful])).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    create_fee(&h.pool, member.id, "5000").await?;
    create_fee(&h.pool, member.id, "10000").await?;

    let summary = h.context.fee_service.outstanding_summary(member.id).await?.unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.display_total, 15000);
    assert_eq!(summary.formatted_total(), "RWF 15,000");

    let attempt = h.context.payment_service
        .initiate(
            &member,
            pay(summary.fee_application_ids.clone(), summary.display_total, PaymentType::Bulk),
        )
        .await?;
    assert_eq!(attempt.fee_application_ids.len(), 2);

    let view = h.context.payment_service.check_status(&member, &attempt.reference_id).await?;
    assert_eq!(view.attempt_status, Some(AttemptStatus::Successful));

    for fee in h.context.fee_repo.list_by_member(member.id).await? {
        assert_eq!(fee.status, FeeStatus::Paid);
    }
    assert!(h.context.fee_service.outstanding(member.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn callback_settles_known_payments_only() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::default()).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fee = create_fee(&h.pool, member.id, "5000").await?;
    let payments = &h.context.payment_service;

    let unknown = payments.apply_callback("unknown-ref", &ProviderStatus::Successful, None).await?;
    assert_eq!(unknown, None);

    let attempt = payments.initiate(&member, pay(vec![fee.id], 5000, PaymentType::Single)).await?;

    let pending = payments.apply_callback(&attempt.reference_id, &ProviderStatus::Pending, None).await?;
    assert_eq!(pending, Some(AttemptStatus::Pending));

    let failed = payments
        .apply_callback(&attempt.reference_id, &ProviderStatus::Failed, Some("Insufficient balance"))
        .await?;
    assert_eq!(failed, Some(AttemptStatus::Failed));

    // The first terminal report wins.
    let late = payments.apply_callback(&attempt.reference_id, &ProviderStatus::Successful, None).await?;
    assert_eq!(late, Some(AttemptStatus::Failed));

    let view = payments.check_status(&member, &attempt.reference_id).await?;
    assert_eq!(view.status, ProviderStatus::Failed);
    assert_eq!(view.reason.as_deref(), Some("Insufficient balance"));
    assert_eq!(h.sandbox.status_calls(), 0);

    Ok(())
}

fn reconciler(h: &Harness) -> PaymentReconciler {
    PaymentReconciler::new(
        h.context.payment_service.clone(),
        ReconcilerSettings {
            interval: std::time::Duration::from_secs(60),
            max_pending_age: Duration::minutes(15),
            batch_size: 100,
        },
    )
}

#[tokio::test]
async fn reconciler_settles_and_expires_unsettled_payments() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::with_statuses([ProviderStatus::Pending])).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let settled_fee = create_fee(&h.pool, member.id, "5000").await?;
    let stale_fee = create_fee(&h.pool, member.id, "3000").await?;
    let waiting_fee = create_fee(&h.pool, member.id, "1000").await?;
    let payments = &h.context.payment_service;

    let settled = payments.initiate(&member, pay(vec![settled_fee.id], 5000, PaymentType::Single)).await?;
    let stale = payments.initiate(&member, pay(vec![stale_fee.id], 3000, PaymentType::Single)).await?;
    let waiting = payments.initiate(&member, pay(vec![waiting_fee.id], 1000, PaymentType::Single)).await?;

    h.sandbox.script(&settled.reference_id, vec![SandboxStep::Status(ProviderStatus::Successful)]);
    age_attempt(&h.pool, &stale.reference_id, Duration::hours(1)).await?;

    let report = reconciler(&h).run_cycle().await?;
    assert_eq!(
        report,
        ReconcileReport {
            checked: 3,
            succeeded: 1,
            failed: 0,
            expired: 1,
            still_pending: 1,
            errors: 0,
        }
    );

    let fees = &h.context.fee_repo;
    assert_eq!(fees.find_by_id(settled_fee.id).await?.unwrap().status, FeeStatus::Paid);
    assert_eq!(fees.find_by_id(stale_fee.id).await?.unwrap().status, FeeStatus::Pending);

    let stale_view = payments.check_status(&member, &stale.reference_id).await?;
    assert_eq!(stale_view.attempt_status, Some(AttemptStatus::Failed));
    assert_eq!(stale_view.status, ProviderStatus::Failed);

    let remaining = payments.list_unsettled(10).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].reference_id, waiting.reference_id);

    Ok(())
}

#[tokio::test]
async fn reconciler_counts_unreachable_provider_as_error() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::new(vec![SandboxStep::Unreachable])).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let fresh_fee = create_fee(&h.pool, member.id, "5000").await?;
    let old_fee = create_fee(&h.pool, member.id, "2000").await?;
    let payments = &h.context.payment_service;

    payments.initiate(&member, pay(vec![fresh_fee.id], 5000, PaymentType::Single)).await?;
    let old = payments.initiate(&member, pay(vec![old_fee.id], 2000, PaymentType::Single)).await?;
    age_attempt(&h.pool, &old.reference_id, Duration::hours(2)).await?;

    let report = reconciler(&h).run_cycle().await?;
    assert_eq!(report.checked, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.expired, 1);

    Ok(())
}

#[tokio::test]
async fn late_success_settles_an_expired_payment() -> anyhow::Result<()> {
    let h = harness(SandboxGateway::with_statuses([ProviderStatus::Pending])).await?;
    let member = create_member(&h.pool, "farmer@coop.test", MemberRole::Member).await?;
    let pushed_fee = create_fee(&h.pool, member.id, "5000").await?;
    let polled_fee = create_fee(&h.pool, member.id, "3000").await?;
    let payments = &h.context.payment_service;
    let fees = &h.context.fee_repo;

    let pushed = payments.initiate(&member, pay(vec![pushed_fee.id], 5000, PaymentType::Single)).await?;
    let polled = payments.initiate(&member, pay(vec![polled_fee.id], 3000, PaymentType::Single)).await?;
    age_attempt(&h.pool, &pushed.reference_id, Duration::hours(2)).await?;
    age_attempt(&h.pool, &polled.reference_id, Duration::hours(2)).await?;

    let report = reconciler(&h).run_cycle().await?;
    assert_eq!(report.expired, 2);
    assert_eq!(fees.find_by_id(pushed_fee.id).await?.unwrap().status, FeeStatus::Pending);

    // Provider callback arriving after expiry.
    let settled = payments.apply_callback(&pushed.reference_id, &ProviderStatus::Successful, None).await?;
    assert_eq!(settled, Some(AttemptStatus::Successful));
    let paid = fees.find_by_id(pushed_fee.id).await?.unwrap();
    assert_eq!(paid.status, FeeStatus::Paid);
    assert!(paid.paid_date.is_some());

    // Status check while the provider still says pending keeps the failure.
    let view = payments.check_status(&member, &polled.reference_id).await?;
    assert_eq!(view.attempt_status, Some(AttemptStatus::Failed));
    assert_eq!(fees.find_by_id(polled_fee.id).await?.unwrap().status, FeeStatus::Pending);

    h.sandbox.script(&polled.reference_id, vec![SandboxStep::Status(ProviderStatus::Successful)]);
    let view = payments.check_status(&member, &polled.reference_id).await?;
    assert_eq!(view.status, ProviderStatus::Successful);
    assert_eq!(view.attempt_status, Some(AttemptStatus::Successful));
    assert_eq!(fees.find_by_id(polled_fee.id).await?.unwrap().status, FeeStatus::Paid);

    // A confirmed outcome is final.
    let late = payments.apply_callback(&polled.reference_id, &ProviderStatus::Failed, None).await?;
    assert_eq!(late, Some(AttemptStatus::Successful));

    Ok(())
}

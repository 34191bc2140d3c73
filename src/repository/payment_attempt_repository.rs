use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    domain::{AttemptStatus, NewPaymentAttempt, PaymentAttempt, PaymentType, ProviderStatus},
    error::{AppError, Result},
    repository::PaymentAttemptRepository,
};

#[derive(FromRow)]
struct PaymentAttemptRow {
    id: String,
    idempotency_key: String,
    member_id: String,
    reference_id: String,
    phone_number: String,
    amount: String,
    currency: String,
    description: String,
    payment_type: String,
    status: String,
    provider_status: Option<String>,
    failure_reason: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    settled_at: Option<NaiveDateTime>,
}

const ATTEMPT_COLUMNS: &str = "id, idempotency_key, member_id, reference_id, phone_number, \
                               amount, currency, description, payment_type, status, \
                               provider_status, failure_reason, created_at, updated_at, settled_at";

pub struct SqlitePaymentAttemptRepository {
    pool: SqlitePool,
}

impl SqlitePaymentAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attempt(row: PaymentAttemptRow, fee_application_ids: Vec<Uuid>) -> Result<PaymentAttempt> {
        Ok(PaymentAttempt {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            idempotency_key: row.idempotency_key,
            member_id: Uuid::parse_str(&row.member_id).map_err(|e| AppError::Database(e.to_string()))?,
            reference_id: row.reference_id,
            phone_number: row.phone_number,
            amount: Decimal::from_str(&row.amount).map_err(|e| AppError::Database(e.to_string()))?,
            currency: row.currency,
            description: row.description,
            payment_type: Self::parse_payment_type(&row.payment_type)?,
            fee_application_ids,
            status: Self::parse_status(&row.status)?,
            provider_status: row.provider_status.as_deref().map(ProviderStatus::parse),
            failure_reason: row.failure_reason,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
            settled_at: row.settled_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        })
    }

    fn parse_status(s: &str) -> Result<AttemptStatus> {
        match s {
            "initiating" => Ok(AttemptStatus::Initiating),
            "pending" => Ok(AttemptStatus::Pending),
            "successful" => Ok(AttemptStatus::Successful),
            "failed" => Ok(AttemptStatus::Failed),
            _ => Err(AppError::Database(format!("Invalid attempt status: {}", s))),
        }
    }

    fn status_to_str(status: AttemptStatus) -> &'static str {
        match status {
            AttemptStatus::Initiating => "initiating",
            AttemptStatus::Pending => "pending",
            AttemptStatus::Successful => "successful",
            AttemptStatus::Failed => "failed",
        }
    }

    fn parse_payment_type(s: &str) -> Result<PaymentType> {
        match s {
            "single" => Ok(PaymentType::Single),
            "bulk" => Ok(PaymentType::Bulk),
            _ => Err(AppError::Database(format!("Invalid payment type: {}", s))),
        }
    }

    fn payment_type_to_str(payment_type: PaymentType) -> &'static str {
        match payment_type {
            PaymentType::Single => "single",
            PaymentType::Bulk => "bulk",
        }
    }

    async fn fee_ids_for(&self, attempt_id: &str) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT fee_application_id FROM payment_attempt_fees WHERE attempt_id = ?"
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        ids.iter()
            .map(|id| Uuid::parse_str(id).map_err(|e| AppError::Database(e.to_string())))
            .collect()
    }

    async fn hydrate(&self, row: PaymentAttemptRow) -> Result<PaymentAttempt> {
        let fee_ids = self.fee_ids_for(&row.id).await?;
        Self::row_to_attempt(row, fee_ids)
    }

    async fn hydrate_all(&self, rows: Vec<PaymentAttemptRow>) -> Result<Vec<PaymentAttempt>> {
        let mut attempts = Vec::with_capacity(rows.len());
        for row in rows {
            attempts.push(self.hydrate(row).await?);
        }
        Ok(attempts)
    }
}

#[async_trait]
impl PaymentAttemptRepository for SqlitePaymentAttemptRepository {
    async fn create_or_get(&self, attempt: NewPaymentAttempt) -> Result<(PaymentAttempt, bool)> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let now = Utc::now().naive_utc();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_attempts (
                id, idempotency_key, member_id, reference_id, phone_number,
                amount, currency, description, payment_type, status,
                provider_status, failure_reason, created_at, updated_at, settled_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'initiating', NULL, NULL, ?, ?, NULL)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#
        )
        .bind(&id_str)
        .bind(&attempt.idempotency_key)
        .bind(attempt.member_id.to_string())
        .bind(&attempt.reference_id)
        .bind(&attempt.phone_number)
        .bind(attempt.amount.to_string())
        .bind(&attempt.currency)
        .bind(&attempt.description)
        .bind(Self::payment_type_to_str(attempt.payment_type))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            for fee_id in &attempt.fee_application_ids {
                sqlx::query(
                    "INSERT INTO payment_attempt_fees (attempt_id, fee_application_id) VALUES (?, ?)"
                )
                .bind(&id_str)
                .bind(fee_id.to_string())
                .execute(&mut *tx)
                .await?;
            }

            // Checked after the insert, under its write lock, so two
            // concurrent attempts on the same fee cannot both pass.
            let busy = sqlx::query_scalar::<_, String>(
                r#"
                SELECT f.fee_application_id
                FROM payment_attempt_fees f
                JOIN payment_attempts a ON a.id = f.attempt_id
                WHERE a.id != ?
                  AND a.status IN ('initiating', 'pending')
                  AND f.fee_application_id IN (
                      SELECT fee_application_id FROM payment_attempt_fees WHERE attempt_id = ?
                  )
                LIMIT 1
                "#
            )
            .bind(&id_str)
            .bind(&id_str)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(fee_id) = busy {
                tx.rollback().await?;
                return Err(AppError::Conflict(format!(
                    "Fee {} already has a payment in progress",
                    fee_id
                )));
            }
        }

        tx.commit().await?;

        let stored = self
            .find_by_idempotency_key(&attempt.idempotency_key)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve payment attempt".to_string()))?;

        Ok((stored, inserted))
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&format!(
            "SELECT {} FROM payment_attempts WHERE reference_id = ?",
            ATTEMPT_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&format!(
            "SELECT {} FROM payment_attempts WHERE idempotency_key = ?",
            ATTEMPT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(self.hydrate(r).await?)),
            None => Ok(None),
        }
    }

    async fn list_by_member(&self, member_id: Uuid, limit: i64) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query_as::<_, PaymentAttemptRow>(&format!(
            "SELECT {} FROM payment_attempts WHERE member_id = ? ORDER BY created_at DESC LIMIT ?",
            ATTEMPT_COLUMNS
        ))
        .bind(member_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(rows).await
    }

    async fn list_unsettled(&self, limit: i64) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query_as::<_, PaymentAttemptRow>(&format!(
            "SELECT {} FROM payment_attempts \
             WHERE status IN ('initiating', 'pending') \
             ORDER BY created_at ASC LIMIT ?",
            ATTEMPT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(rows).await
    }

    async fn mark_pending(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE payment_attempts SET status = 'pending', updated_at = ? \
             WHERE id = ? AND status = 'initiating'"
        )
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_provider_status(&self, id: Uuid, status: &ProviderStatus) -> Result<()> {
        sqlx::query(
            "UPDATE payment_attempts SET provider_status = ?, updated_at = ? \
             WHERE id = ? AND status IN ('initiating', 'pending')"
        )
        .bind(status.as_str())
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn settle(
        &self,
        id: Uuid,
        outcome: AttemptStatus,
        provider_status: Option<&ProviderStatus>,
        failure_reason: Option<&str>,
        settled_at: DateTime<Utc>,
    ) -> Result<bool> {
        if !outcome.is_terminal() {
            return Err(AppError::Internal(format!(
                "cannot settle attempt {} to non-terminal status {:?}",
                id, outcome
            )));
        }

        let id_str = id.to_string();
        let settled_naive = settled_at.naive_utc();
        let mut tx = self.pool.begin().await?;

        // Guarded on the current status so concurrent settlements (webhook,
        // reconciler and a member's status check) apply at most once. A
        // failure the provider never confirmed can still turn successful.
        let updated = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = ?,
                provider_status = COALESCE(?, provider_status),
                failure_reason = ?,
                settled_at = ?,
                updated_at = ?
            WHERE id = ?
              AND (
                  status IN ('initiating', 'pending')
                  OR (
                      ? = 'successful'
                      AND status = 'failed'
                      AND (provider_status IS NULL
                           OR provider_status NOT IN ('SUCCESSFUL', 'FAILED', 'REJECTED', 'TIMEOUT'))
                  )
              )
            "#
        )
        .bind(Self::status_to_str(outcome))
        .bind(provider_status.map(|s| s.as_str().to_string()))
        .bind(failure_reason)
        .bind(settled_naive)
        .bind(settled_naive)
        .bind(&id_str)
        .bind(Self::status_to_str(outcome))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if outcome == AttemptStatus::Successful {
            sqlx::query(
                r#"
                UPDATE fee_applications
                SET status = 'paid', paid_date = ?, updated_at = ?
                WHERE status != 'paid'
                  AND id IN (SELECT fee_application_id FROM payment_attempt_fees WHERE attempt_id = ?)
                "#
            )
            .bind(settled_naive)
            .bind(settled_naive)
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

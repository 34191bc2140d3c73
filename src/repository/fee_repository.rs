use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    domain::{AmountPolicy, FeeApplication, FeeRule, FeeStatus, FeeType, NewFeeApplication},
    error::{AppError, Result},
    repository::FeeRepository,
};

#[derive(FromRow)]
struct FeeRuleRow {
    id: String,
    name: String,
    description: Option<String>,
    fee_type: String,
    amount_policy: String,
    amount: String,
    created_at: NaiveDateTime,
}

#[derive(FromRow)]
struct FeeApplicationRow {
    id: String,
    member_id: String,
    fee_rule_id: String,
    amount: String,
    due_date: NaiveDate,
    status: String,
    paid_date: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const APPLICATION_COLUMNS: &str = "id, member_id, fee_rule_id, amount, due_date, status, \
                                   paid_date, created_at, updated_at";

pub struct SqliteFeeRepository {
    pool: SqlitePool,
}

impl SqliteFeeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_uuid(s: &str) -> Result<Uuid> {
        Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
    }

    fn parse_amount(s: &str) -> Result<Decimal> {
        Decimal::from_str(s).map_err(|e| AppError::Database(format!("Invalid amount {}: {}", s, e)))
    }

    fn row_to_rule(row: FeeRuleRow) -> Result<FeeRule> {
        let amount = Self::parse_amount(&row.amount)?;
        let amount_policy = match row.amount_policy.as_str() {
            "Fixed" => AmountPolicy::Fixed(amount),
            "PerHectare" => AmountPolicy::PerHectare(amount),
            other => return Err(AppError::Database(format!("Invalid amount policy: {}", other))),
        };
        let fee_type = match row.fee_type.as_str() {
            "Recurring" => FeeType::Recurring,
            "OneOff" => FeeType::OneOff,
            other => return Err(AppError::Database(format!("Invalid fee type: {}", other))),
        };

        Ok(FeeRule {
            id: Self::parse_uuid(&row.id)?,
            name: row.name,
            description: row.description,
            fee_type,
            amount_policy,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    fn row_to_application(row: FeeApplicationRow) -> Result<FeeApplication> {
        Ok(FeeApplication {
            id: Self::parse_uuid(&row.id)?,
            member_id: Self::parse_uuid(&row.member_id)?,
            fee_rule_id: Self::parse_uuid(&row.fee_rule_id)?,
            amount: Self::parse_amount(&row.amount)?,
            due_date: row.due_date,
            status: Self::parse_fee_status(&row.status)?,
            paid_date: row.paid_date.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn parse_fee_status(s: &str) -> Result<FeeStatus> {
        match s {
            "pending" => Ok(FeeStatus::Pending),
            "overdue" => Ok(FeeStatus::Overdue),
            "paid" => Ok(FeeStatus::Paid),
            _ => Err(AppError::Database(format!("Invalid fee status: {}", s))),
        }
    }
}

#[async_trait]
impl FeeRepository for SqliteFeeRepository {
    async fn create_rule(&self, rule: FeeRule) -> Result<FeeRule> {
        let (policy_str, amount) = match rule.amount_policy {
            AmountPolicy::Fixed(amount) => ("Fixed", amount),
            AmountPolicy::PerHectare(rate) => ("PerHectare", rate),
        };
        let fee_type_str = match rule.fee_type {
            FeeType::Recurring => "Recurring",
            FeeType::OneOff => "OneOff",
        };

        sqlx::query(
            r#"
            INSERT INTO fee_rules (id, name, description, fee_type, amount_policy, amount, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(rule.id.to_string())
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(fee_type_str)
        .bind(policy_str)
        .bind(amount.to_string())
        .bind(rule.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_rule(rule.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created fee rule".to_string())
        })
    }

    async fn find_rule(&self, id: Uuid) -> Result<Option<FeeRule>> {
        let row = sqlx::query_as::<_, FeeRuleRow>(
            r#"
            SELECT id, name, description, fee_type, amount_policy, amount, created_at
            FROM fee_rules
            WHERE id = ?
            "#
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_rule).transpose()
    }

    async fn apply(&self, application: NewFeeApplication) -> Result<FeeApplication> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO fee_applications (
                id, member_id, fee_rule_id, amount, due_date, status,
                paid_date, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'pending', NULL, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(application.member_id.to_string())
        .bind(application.fee_rule_id.to_string())
        .bind(application.amount.to_string())
        .bind(application.due_date)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created fee application".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<FeeApplication>> {
        let row = sqlx::query_as::<_, FeeApplicationRow>(&format!(
            "SELECT {} FROM fee_applications WHERE id = ?",
            APPLICATION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_application).transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<FeeApplication>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM fee_applications WHERE id IN ({}) ORDER BY due_date ASC",
            APPLICATION_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, FeeApplicationRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_application)
            .collect()
    }

    async fn list_by_member(&self, member_id: Uuid) -> Result<Vec<FeeApplication>> {
        let rows = sqlx::query_as::<_, FeeApplicationRow>(&format!(
            "SELECT {} FROM fee_applications WHERE member_id = ? ORDER BY due_date ASC",
            APPLICATION_COLUMNS
        ))
        .bind(member_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_application).collect()
    }

    async fn list_outstanding_by_member(&self, member_id: Uuid) -> Result<Vec<FeeApplication>> {
        let rows = sqlx::query_as::<_, FeeApplicationRow>(&format!(
            "SELECT {} FROM fee_applications \
             WHERE member_id = ? AND status IN ('pending', 'overdue') \
             ORDER BY due_date ASC",
            APPLICATION_COLUMNS
        ))
        .bind(member_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_application).collect()
    }
}

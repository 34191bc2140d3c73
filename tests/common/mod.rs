#![allow(dead_code)]

use chrono::{Duration, Utc};
use cooperative::{
    domain::{AmountPolicy, CreateMemberRequest, FeeApplication, FeeRule, FeeType, Member, MemberRole, NewFeeApplication},
    repository::{FeeRepository, MemberRepository, SqliteFeeRepository, SqliteMemberRepository},
};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

pub const PASSWORD: &str = "password123";

/// In-memory database with the schema applied. One connection, so every
/// query sees the same database.
pub async fn test_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await?;

    Ok(pool)
}

pub async fn create_member(pool: &SqlitePool, email: &str, role: MemberRole) -> anyhow::Result<Member> {
    let repo = SqliteMemberRepository::new(pool.clone());
    let member = repo.create(CreateMemberRequest {
        email: email.to_string(),
        full_name: "Test Farmer".to_string(),
        phone_number: Some("0788123456".to_string()),
        role,
        password: PASSWORD.to_string(),
    }).await?;
    Ok(member)
}

pub async fn create_fee(pool: &SqlitePool, member_id: Uuid, amount: &str) -> anyhow::Result<FeeApplication> {
    let repo = SqliteFeeRepository::new(pool.clone());
    let amount = Decimal::from_str(amount)?;

    let rule = repo.create_rule(FeeRule {
        id: Uuid::new_v4(),
        name: "Season levy".to_string(),
        description: None,
        fee_type: FeeType::Recurring,
        amount_policy: AmountPolicy::Fixed(amount),
        created_at: Utc::now(),
    }).await?;

    let fee = repo.apply(NewFeeApplication {
        member_id,
        fee_rule_id: rule.id,
        amount,
        due_date: Utc::now().date_naive() + Duration::days(30),
    }).await?;

    Ok(fee)
}

/// Moves an attempt's creation time into the past.
pub async fn age_attempt(pool: &SqlitePool, reference_id: &str, age: Duration) -> anyhow::Result<()> {
    sqlx::query("UPDATE payment_attempts SET created_at = ? WHERE reference_id = ?")
        .bind((Utc::now() - age).naive_utc())
        .bind(reference_id)
        .execute(pool)
        .await?;
    Ok(())
}

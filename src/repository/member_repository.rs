use async_trait::async_trait;
use chrono::{DateTime, Utc, NaiveDateTime};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{CreateMemberRequest, Member, MemberRole, MemberStatus},
    error::{AppError, Result},
    repository::MemberRepository,
};

// Database row struct that matches SQLite schema
#[derive(FromRow)]
struct MemberRow {
    id: String,
    email: String,
    full_name: String,
    phone_number: Option<String>,
    role: String,
    status: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteMemberRepository {
    pool: SqlitePool,
}

impl SqliteMemberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_member(row: MemberRow) -> Result<Member> {
        Ok(Member {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            email: row.email,
            full_name: row.full_name,
            phone_number: row.phone_number,
            role: Self::parse_role(&row.role)?,
            status: Self::parse_member_status(&row.status)?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn parse_member_status(s: &str) -> Result<MemberStatus> {
        match s {
            "Active" => Ok(MemberStatus::Active),
            "Suspended" => Ok(MemberStatus::Suspended),
            _ => Err(AppError::Database(format!("Invalid member status: {}", s))),
        }
    }

    fn parse_role(s: &str) -> Result<MemberRole> {
        match s {
            "Admin" => Ok(MemberRole::Admin),
            "ZoneLeader" => Ok(MemberRole::ZoneLeader),
            "UnitLeader" => Ok(MemberRole::UnitLeader),
            "Member" => Ok(MemberRole::Member),
            _ => Err(AppError::Database(format!("Invalid member role: {}", s))),
        }
    }

    fn role_to_str(role: &MemberRole) -> &'static str {
        match role {
            MemberRole::Admin => "Admin",
            MemberRole::ZoneLeader => "ZoneLeader",
            MemberRole::UnitLeader => "UnitLeader",
            MemberRole::Member => "Member",
        }
    }
}

#[async_trait]
impl MemberRepository for SqliteMemberRepository {
    async fn create(&self, request: CreateMemberRequest) -> Result<Member> {
        let id = Uuid::new_v4();
        let now_naive = Utc::now().naive_utc();

        let password_hash = crate::auth::AuthService::hash_password(&request.password).await?;

        sqlx::query(
            r#"
            INSERT INTO members (
                id, email, full_name, phone_number, role, status,
                password_hash, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'Active', ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(&request.email)
        .bind(&request.full_name)
        .bind(&request.phone_number)
        .bind(Self::role_to_str(&request.role))
        .bind(&password_hash)
        .bind(now_naive)
        .bind(now_naive)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created member".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT id, email, full_name, phone_number, role, status,
                   created_at, updated_at
            FROM members
            WHERE id = ?
            "#
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_member).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Member>> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT id, email, full_name, phone_number, role, status,
                   created_at, updated_at
            FROM members
            WHERE email = ?
            "#
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(Self::row_to_member).transpose()
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fee type the cooperative charges. The payment flow only reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub fee_type: FeeType,
    pub amount_policy: AmountPolicy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeeType {
    Recurring,
    OneOff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "amount")]
pub enum AmountPolicy {
    Fixed(Decimal),
    PerHectare(Decimal),
}

impl AmountPolicy {
    /// Amount owed by a member farming `hectares`. Fixed fees ignore it.
    pub fn amount_for(&self, hectares: Decimal) -> Decimal {
        match self {
            AmountPolicy::Fixed(amount) => *amount,
            AmountPolicy::PerHectare(rate) => *rate * hectares,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Pending,
    Overdue,
    Paid,
}

impl FeeStatus {
    pub fn is_outstanding(&self) -> bool {
        matches!(self, FeeStatus::Pending | FeeStatus::Overdue)
    }
}

/// One fee owed by one member. `paid_date` is set exactly when the status
/// is `Paid`; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeApplication {
    pub id: Uuid,
    pub member_id: Uuid,
    pub fee_rule_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: FeeStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeApplication {
    /// Unpaid fees past their due date read as overdue even if the stored
    /// status has not been swept yet.
    pub fn effective_status(&self, today: NaiveDate) -> FeeStatus {
        match self.status {
            FeeStatus::Pending if self.due_date < today => FeeStatus::Overdue,
            status => status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFeeApplication {
    pub member_id: Uuid,
    pub fee_rule_id: Uuid,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn application(status: FeeStatus, due_date: NaiveDate) -> FeeApplication {
        FeeApplication {
            id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            fee_rule_id: Uuid::new_v4(),
            amount: Decimal::from(5000),
            due_date,
            status,
            paid_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pending_fee_past_due_reads_overdue() {
        let due = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        assert_eq!(application(FeeStatus::Pending, due).effective_status(today), FeeStatus::Overdue);
        assert_eq!(application(FeeStatus::Pending, today).effective_status(today), FeeStatus::Pending);
        assert_eq!(application(FeeStatus::Paid, due).effective_status(today), FeeStatus::Paid);
    }

    #[test]
    fn per_hectare_policy_scales_with_land() {
        let policy = AmountPolicy::PerHectare(Decimal::from(1200));
        let hectares = Decimal::from_str("2.5").unwrap();
        assert_eq!(policy.amount_for(hectares), Decimal::from(3000));
        assert_eq!(AmountPolicy::Fixed(Decimal::from(700)).amount_for(hectares), Decimal::from(700));
    }
}

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{FeeApplication, FeeStatus},
    error::Result,
    repository::FeeRepository,
};

/// Outstanding fees of one member, as offered for a bulk payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSummary {
    pub count: usize,
    pub overdue_count: usize,
    /// Exact sum of the fee amounts.
    pub total: Decimal,
    /// `total` rounded to whole RWF; this is what the member is charged.
    pub display_total: i64,
    pub fee_application_ids: Vec<Uuid>,
}

impl FeeSummary {
    /// Aggregates the outstanding (`pending` or `overdue`) applications.
    /// Returns `None` when nothing is owed, in which case no payment dialog
    /// is offered at all.
    pub fn from_applications(applications: &[FeeApplication]) -> Option<Self> {
        let today = Utc::now().date_naive();
        let outstanding: Vec<&FeeApplication> = applications
            .iter()
            .filter(|a| a.status.is_outstanding())
            .collect();

        if outstanding.is_empty() {
            return None;
        }

        let total: Decimal = outstanding.iter().map(|a| a.amount).sum();
        let overdue_count = outstanding
            .iter()
            .filter(|a| a.effective_status(today) == FeeStatus::Overdue)
            .count();

        Some(Self {
            count: outstanding.len(),
            overdue_count,
            total,
            display_total: display_amount(total),
            fee_application_ids: outstanding.iter().map(|a| a.id).collect(),
        })
    }

    pub fn formatted_total(&self) -> String {
        format_rwf(self.display_total)
    }
}

/// Rounds to whole RWF, halves away from zero.
pub fn round_rwf(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

pub fn display_amount(amount: Decimal) -> i64 {
    round_rwf(amount).to_i64().unwrap_or(i64::MAX)
}

/// `15000` -> `"RWF 15,000"`.
pub fn format_rwf(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("RWF {}{}", sign, grouped)
}

pub struct FeeService {
    fee_repo: Arc<dyn FeeRepository>,
}

impl FeeService {
    pub fn new(fee_repo: Arc<dyn FeeRepository>) -> Self {
        Self { fee_repo }
    }

    pub async fn outstanding(&self, member_id: Uuid) -> Result<Vec<FeeApplication>> {
        self.fee_repo.list_outstanding_by_member(member_id).await
    }

    pub async fn outstanding_summary(&self, member_id: Uuid) -> Result<Option<FeeSummary>> {
        let fees = self.outstanding(member_id).await?;
        Ok(FeeSummary::from_applications(&fees))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn fee(amount: &str, status: FeeStatus) -> FeeApplication {
        let now = Utc::now();
        FeeApplication {
            id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            fee_rule_id: Uuid::new_v4(),
            amount: Decimal::from_str(amount).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            status,
            paid_date: (status == FeeStatus::Paid).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn empty_or_fully_paid_sets_offer_nothing() {
        assert!(FeeSummary::from_applications(&[]).is_none());
        assert!(FeeSummary::from_applications(&[fee("500", FeeStatus::Paid)]).is_none());
    }

    #[test]
    fn total_skips_paid_fees_and_rounds_for_display() {
        let fees = vec![
            fee("1000.25", FeeStatus::Pending),
            fee("2500.25", FeeStatus::Overdue),
            fee("9999", FeeStatus::Paid),
        ];

        let summary = FeeSummary::from_applications(&fees).unwrap();

        assert_eq!(summary.count, 2);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.total, Decimal::from_str("3500.50").unwrap());
        assert_eq!(summary.display_total, 3501);
        assert_eq!(summary.fee_application_ids, vec![fees[0].id, fees[1].id]);
    }

    #[test]
    fn total_does_not_depend_on_order() {
        let mut fees = vec![
            fee("0.4", FeeStatus::Pending),
            fee("1200.3", FeeStatus::Pending),
            fee("333.3", FeeStatus::Overdue),
        ];
        let forward = FeeSummary::from_applications(&fees).unwrap();
        fees.reverse();
        let backward = FeeSummary::from_applications(&fees).unwrap();

        assert_eq!(forward.display_total, 1534);
        assert_eq!(forward.display_total, backward.display_total);
        assert_eq!(forward.total, backward.total);
    }

    #[test]
    fn amounts_render_as_whole_rwf() {
        assert_eq!(format_rwf(0), "RWF 0");
        assert_eq!(format_rwf(950), "RWF 950");
        assert_eq!(format_rwf(15000), "RWF 15,000");
        assert_eq!(format_rwf(1234567), "RWF 1,234,567");
        assert_eq!(display_amount(Decimal::from_str("2.5").unwrap()), 3);
    }
}

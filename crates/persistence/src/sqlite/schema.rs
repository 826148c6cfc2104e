//! Row types for sqlx mapping from SQLite tables
//!
//! Decimal columns are TEXT in the database; rows keep them as `String` and
//! expose typed accessors that parse with `rust_decimal`. Schema lives in
//! `migrations/20260801000001_init.sql`.

use chrono::{DateTime, NaiveDate, Utc};
use monera_core::{
    AccountType, ApprovalState, BizType, IdempotencyStatus, ReviewerRole, TransferStatus,
    WealthOrderStatus, WealthProductStatus, WithdrawalStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{PersistenceError, PersistenceResult};

/// Parse a TEXT decimal column, reporting the column name on failure.
pub(crate) fn parse_decimal(column: &str, value: &str) -> PersistenceResult<Decimal> {
    Decimal::from_str(value).map_err(|_| PersistenceError::InvalidDecimal {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn parse_enum<T: FromStr>(field: &str, value: &str) -> PersistenceResult<T> {
    T::from_str(value).map_err(|_| PersistenceError::InvalidEnumValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Row type for the `accounts` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: i64,
    pub user_id: String,
    pub account_type: String,
    pub asset: String,
    pub balance: String,
    pub frozen_balance: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRow {
    pub fn balance(&self) -> PersistenceResult<Decimal> {
        parse_decimal("accounts.balance", &self.balance)
    }

    pub fn frozen_balance(&self) -> PersistenceResult<Decimal> {
        parse_decimal("accounts.frozen_balance", &self.frozen_balance)
    }

    /// Available plus frozen - what the journal must add up to.
    pub fn total(&self) -> PersistenceResult<Decimal> {
        Ok(self.balance()? + self.frozen_balance()?)
    }

    pub fn account_type(&self) -> PersistenceResult<AccountType> {
        parse_enum("accounts.account_type", &self.account_type)
    }
}

/// Row type for the `account_journal` table
///
/// `amount` is the signed change to available balance, `frozen_amount` the
/// signed change to frozen balance; the snapshots are the values right
/// after the entry was applied.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct JournalRow {
    pub id: i64,
    pub serial_no: String,
    pub account_id: i64,
    pub biz_type: String,
    pub amount: String,
    pub frozen_amount: String,
    pub balance_snapshot: String,
    pub frozen_snapshot: String,
    pub ref_id: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JournalRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("account_journal.amount", &self.amount)
    }

    pub fn frozen_amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("account_journal.frozen_amount", &self.frozen_amount)
    }

    pub fn balance_snapshot(&self) -> PersistenceResult<Decimal> {
        parse_decimal("account_journal.balance_snapshot", &self.balance_snapshot)
    }

    pub fn frozen_snapshot(&self) -> PersistenceResult<Decimal> {
        parse_decimal("account_journal.frozen_snapshot", &self.frozen_snapshot)
    }

    /// Signed change to the account total (available + frozen).
    pub fn total_delta(&self) -> PersistenceResult<Decimal> {
        Ok(self.amount()? + self.frozen_amount()?)
    }

    pub fn biz_type(&self) -> PersistenceResult<BizType> {
        parse_enum("account_journal.biz_type", &self.biz_type)
    }
}

/// Row type for the `idempotency_records` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct IdempotencyRow {
    pub user_id: String,
    pub request_id: String,
    pub biz_type: String,
    pub status: String,
    pub result_data: Option<String>,
    pub ttl_expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRow {
    pub fn status(&self) -> PersistenceResult<IdempotencyStatus> {
        parse_enum("idempotency_records.status", &self.status)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_expire_at < now
    }
}

/// Row type for the `transfer_records` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TransferRow {
    pub id: i64,
    pub transfer_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: String,
    pub biz_type: String,
    pub ref_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TransferRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("transfer_records.amount", &self.amount)
    }

    pub fn status(&self) -> PersistenceResult<TransferStatus> {
        parse_enum("transfer_records.status", &self.status)
    }
}

/// Row type for the `wealth_products` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WealthProductRow {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub asset: String,
    pub apy: String,
    pub duration_days: i64,
    pub min_amount: String,
    pub max_amount: String,
    pub total_quota: String,
    pub sold_quota: String,
    pub early_redeem_allowed: bool,
    pub early_redeem_penalty: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl WealthProductRow {
    pub fn apy(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.apy", &self.apy)
    }

    pub fn min_amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.min_amount", &self.min_amount)
    }

    pub fn max_amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.max_amount", &self.max_amount)
    }

    pub fn total_quota(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.total_quota", &self.total_quota)
    }

    pub fn sold_quota(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.sold_quota", &self.sold_quota)
    }

    pub fn early_redeem_penalty(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_products.early_redeem_penalty", &self.early_redeem_penalty)
    }

    pub fn status(&self) -> PersistenceResult<WealthProductStatus> {
        parse_enum("wealth_products.status", &self.status)
    }
}

/// Row type for the `wealth_orders` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WealthOrderRow {
    pub id: i64,
    pub order_no: String,
    pub user_id: String,
    pub product_id: i64,
    pub amount: String,
    pub interest_accrued: String,
    pub interest_paid: String,
    pub principal_redeemed: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub last_interest_date: NaiveDate,
    pub auto_renew: bool,
    pub status: String,
    pub redemption_type: Option<String>,
    pub renewed_from_order_id: Option<i64>,
    pub renewed_to_order_id: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WealthOrderRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_orders.amount", &self.amount)
    }

    pub fn interest_accrued(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_orders.interest_accrued", &self.interest_accrued)
    }

    pub fn interest_paid(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_orders.interest_paid", &self.interest_paid)
    }

    pub fn principal_redeemed(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_orders.principal_redeemed", &self.principal_redeemed)
    }

    /// Accrued but not yet paid interest.
    pub fn interest_outstanding(&self) -> PersistenceResult<Decimal> {
        Ok(self.interest_accrued()? - self.interest_paid()?)
    }

    pub fn status(&self) -> PersistenceResult<WealthOrderStatus> {
        parse_enum("wealth_orders.status", &self.status)
    }
}

/// Row type for the `wealth_interest_records` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct InterestRecordRow {
    pub id: i64,
    pub order_id: i64,
    pub record_type: String,
    pub interest_date: NaiveDate,
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

impl InterestRecordRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("wealth_interest_records.amount", &self.amount)
    }
}

/// Row type for the `withdrawal_orders` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct WithdrawalRow {
    pub id: i64,
    pub order_no: String,
    pub user_id: String,
    pub account_id: i64,
    pub asset: String,
    pub amount: String,
    pub fee: String,
    pub chain: String,
    pub to_address: String,
    pub status: String,
    pub provider_order_id: Option<String>,
    pub tx_hash: Option<String>,
    pub actual_amount: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WithdrawalRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("withdrawal_orders.amount", &self.amount)
    }

    pub fn fee(&self) -> PersistenceResult<Decimal> {
        parse_decimal("withdrawal_orders.fee", &self.fee)
    }

    /// Amount plus fee - the quantity frozen at request time.
    pub fn frozen_total(&self) -> PersistenceResult<Decimal> {
        Ok(self.amount()? + self.fee()?)
    }

    pub fn status(&self) -> PersistenceResult<WithdrawalStatus> {
        parse_enum("withdrawal_orders.status", &self.status)
    }
}

/// Row type for the `withdrawal_freeze_logs` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct FreezeLogRow {
    pub id: i64,
    pub withdrawal_order_id: i64,
    pub account_id: i64,
    pub amount: String,
    pub frozen_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_kind: Option<String>,
}

impl FreezeLogRow {
    pub fn amount(&self) -> PersistenceResult<Decimal> {
        parse_decimal("withdrawal_freeze_logs.amount", &self.amount)
    }

    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// Row type for the `withdrawal_addresses` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct AddressRow {
    pub id: i64,
    pub user_id: String,
    pub chain: String,
    pub address: String,
    pub label: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Row type for the `reconciliation_logs` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ReconciliationLogRow {
    pub id: i64,
    pub run_id: String,
    pub account_id: Option<i64>,
    pub journal_sum: String,
    pub account_total: String,
    pub difference: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationLogRow {
    pub fn difference(&self) -> PersistenceResult<Decimal> {
        parse_decimal("reconciliation_logs.difference", &self.difference)
    }
}

/// Row type for the `alert_logs` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct AlertLogRow {
    pub id: i64,
    pub run_id: String,
    pub level: String,
    pub source: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Row type for the `manual_review_queue` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ManualReviewRow {
    pub id: i64,
    pub run_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Row type for the `system_flags` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SystemFlagRow {
    pub name: String,
    pub value: String,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Row type for the `approval_requests` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApprovalRequestRow {
    pub id: i64,
    pub request_no: String,
    pub subject_type: String,
    pub subject_id: String,
    pub payload: String,
    pub state: String,
    pub current_step: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequestRow {
    pub fn state(&self) -> PersistenceResult<ApprovalState> {
        parse_enum("approval_requests.state", &self.state)
    }
}

/// Row type for the `approval_decisions` table
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApprovalDecisionRow {
    pub id: i64,
    pub request_id: i64,
    pub step: i64,
    pub role: String,
    pub reviewer_id: String,
    pub approved: bool,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecisionRow {
    pub fn role(&self) -> PersistenceResult<ReviewerRole> {
        parse_enum("approval_decisions.role", &self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_decimal_reports_column() {
        let err = parse_decimal("accounts.balance", "not-a-number").unwrap_err();
        assert!(err.to_string().contains("accounts.balance"));
    }

    #[test]
    fn account_total_sums_available_and_frozen() {
        let row = AccountRow {
            id: 1,
            user_id: "u1".to_string(),
            account_type: "FUND".to_string(),
            asset: "USDT".to_string(),
            balance: "495".to_string(),
            frozen_balance: "505".to_string(),
            version: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.total().unwrap(), dec!(1000));
        assert_eq!(row.account_type().unwrap(), AccountType::Fund);
    }

    #[test]
    fn withdrawal_frozen_total() {
        let row = WithdrawalRow {
            id: 1,
            order_no: "WD-1".to_string(),
            user_id: "u1".to_string(),
            account_id: 1,
            asset: "USDT".to_string(),
            amount: "500".to_string(),
            fee: "5".to_string(),
            chain: "ETH".to_string(),
            to_address: "0xabc".to_string(),
            status: "PENDING".to_string(),
            provider_order_id: None,
            tx_hash: None,
            actual_amount: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        assert_eq!(row.frozen_total().unwrap(), dec!(505));
        assert_eq!(row.status().unwrap(), WithdrawalStatus::Pending);
    }
}

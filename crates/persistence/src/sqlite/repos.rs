//! Repository implementations for SQLite
//!
//! Unit structs with associated async functions, one per table. Every
//! function takes a `SqliteExecutor` so engines can run several repository
//! calls inside one `pool.begin()` transaction by passing `&mut *tx`.
//!
//! Guarded updates (`WHERE version = ?`, `WHERE status = ?`,
//! `WHERE released_at IS NULL`) return `bool` from `rows_affected`; the
//! caller decides whether a miss is a retryable conflict or a no-op.

use crate::error::{map_unique_violation, PersistenceError, PersistenceResult};
use crate::sqlite::schema::*;
use chrono::{DateTime, NaiveDate, Utc};
use monera_core::{AccountType, BizType, TransferStatus, WithdrawalStatus};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{SqliteExecutor, SqlitePool};

// ============================================================================
// Account Repository
// ============================================================================

/// Repository for the `accounts` table
pub struct AccountRepo;

impl AccountRepo {
    pub async fn get_by_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
    ) -> PersistenceResult<AccountRow> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Account", id))
    }

    pub async fn find_for_owner<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        account_type: AccountType,
        asset: &str,
    ) -> PersistenceResult<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE user_id = ? AND account_type = ? AND asset = ?",
        )
        .bind(user_id)
        .bind(account_type.to_string())
        .bind(asset)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn list_all<'e, E: SqliteExecutor<'e>>(db: E) -> PersistenceResult<Vec<AccountRow>> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts ORDER BY id")
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// Insert an account row if none exists for (user, type, asset).
    ///
    /// Relies on the unique key, so two racing creators converge on one row.
    pub async fn insert_if_absent<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        account_type: AccountType,
        asset: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO accounts (user_id, account_type, asset, balance, frozen_balance, version, created_at, updated_at) \
             VALUES (?, ?, ?, '0', '0', 0, ?, ?) \
             ON CONFLICT (user_id, account_type, asset) DO NOTHING",
        )
        .bind(user_id)
        .bind(account_type.to_string())
        .bind(asset)
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Optimistic-lock write of both balances.
    ///
    /// Returns false when the stored version no longer matches, in which
    /// case nothing was written and the caller must re-read and retry.
    pub async fn update_balances<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        balance: Decimal,
        frozen_balance: Decimal,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = ?, frozen_balance = ?, version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ?",
        )
        .bind(balance.to_string())
        .bind(frozen_balance.to_string())
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Journal Repository
// ============================================================================

/// A journal entry about to be appended
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub serial_no: String,
    pub account_id: i64,
    pub biz_type: BizType,
    /// Signed change to available balance
    pub amount: Decimal,
    /// Signed change to frozen balance
    pub frozen_amount: Decimal,
    /// Available balance immediately after the change
    pub balance_snapshot: Decimal,
    /// Frozen balance immediately after the change
    pub frozen_snapshot: Decimal,
    pub ref_id: Option<String>,
    pub remark: Option<String>,
}

/// Repository for the append-only `account_journal` table
pub struct JournalRepo;

impl JournalRepo {
    pub async fn append<'e, E: SqliteExecutor<'e>>(
        db: E,
        entry: &NewJournalEntry,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO account_journal (serial_no, account_id, biz_type, amount, frozen_amount, balance_snapshot, frozen_snapshot, ref_id, remark, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.serial_no)
        .bind(entry.account_id)
        .bind(entry.biz_type.to_string())
        .bind(entry.amount.to_string())
        .bind(entry.frozen_amount.to_string())
        .bind(entry.balance_snapshot.to_string())
        .bind(entry.frozen_snapshot.to_string())
        .bind(&entry.ref_id)
        .bind(&entry.remark)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("JournalEntry", &entry.serial_no, e))?;
        Ok(result.last_insert_rowid())
    }

    /// All entries for an account in append order.
    pub async fn list_for_account<'e, E: SqliteExecutor<'e>>(
        db: E,
        account_id: i64,
    ) -> PersistenceResult<Vec<JournalRow>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT * FROM account_journal WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Entries that reference a business record (e.g. both transfer legs).
    pub async fn list_by_ref<'e, E: SqliteExecutor<'e>>(
        db: E,
        ref_id: &str,
    ) -> PersistenceResult<Vec<JournalRow>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT * FROM account_journal WHERE ref_id = ? ORDER BY id",
        )
        .bind(ref_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Idempotency Repository
// ============================================================================

/// Repository for the `idempotency_records` table
pub struct IdempotencyRepo;

impl IdempotencyRepo {
    /// Insert a PROCESSING row; the composite primary key makes the insert
    /// the mutual-exclusion point across retries of one logical request.
    pub async fn insert_processing<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        ttl_expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO idempotency_records (user_id, request_id, biz_type, status, result_data, ttl_expire_at, created_at, updated_at) \
             VALUES (?, ?, ?, 'PROCESSING', NULL, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(request_id)
        .bind(biz_type)
        .bind(ttl_expire_at)
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("IdempotencyRecord", request_id, e))?;
        Ok(())
    }

    pub async fn get<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
    ) -> PersistenceResult<Option<IdempotencyRow>> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            "SELECT * FROM idempotency_records WHERE user_id = ? AND request_id = ? AND biz_type = ?",
        )
        .bind(user_id)
        .bind(request_id)
        .bind(biz_type)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn mark_completed<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        result_data: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = 'COMPLETED', result_data = ?, updated_at = ? \
             WHERE user_id = ? AND request_id = ? AND biz_type = ? AND status = 'PROCESSING'",
        )
        .bind(result_data)
        .bind(now)
        .bind(user_id)
        .bind(request_id)
        .bind(biz_type)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = 'FAILED', updated_at = ? \
             WHERE user_id = ? AND request_id = ? AND biz_type = ? AND status = 'PROCESSING'",
        )
        .bind(now)
        .bind(user_id)
        .bind(request_id)
        .bind(biz_type)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reclaim a FAILED record so the client may retry the request.
    pub async fn restart_failed<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        ttl_expire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = 'PROCESSING', result_data = NULL, ttl_expire_at = ?, updated_at = ? \
             WHERE user_id = ? AND request_id = ? AND biz_type = ? AND status = 'FAILED'",
        )
        .bind(ttl_expire_at)
        .bind(now)
        .bind(user_id)
        .bind(request_id)
        .bind(biz_type)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Abandon PROCESSING rows whose TTL passed. Only the sweeper calls
    /// this; request paths never reclaim in place.
    pub async fn sweep_expired<'e, E: SqliteExecutor<'e>>(
        db: E,
        now: DateTime<Utc>,
    ) -> PersistenceResult<u64> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET status = 'FAILED', updated_at = ? \
             WHERE status = 'PROCESSING' AND ttl_expire_at < ?",
        )
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// Transfer Repository
// ============================================================================

/// Repository for the `transfer_records` table
pub struct TransferRepo;

impl TransferRepo {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        transfer_id: &str,
        from_account_id: i64,
        to_account_id: i64,
        amount: Decimal,
        biz_type: BizType,
        ref_id: Option<&str>,
        status: TransferStatus,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO transfer_records (transfer_id, from_account_id, to_account_id, amount, biz_type, ref_id, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(transfer_id)
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount.to_string())
        .bind(biz_type.to_string())
        .bind(ref_id)
        .bind(status.to_string())
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("TransferRecord", transfer_id, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_transfer_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        transfer_id: &str,
    ) -> PersistenceResult<TransferRow> {
        sqlx::query_as::<_, TransferRow>("SELECT * FROM transfer_records WHERE transfer_id = ?")
            .bind(transfer_id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("TransferRecord", transfer_id))
    }

    pub async fn set_status<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        status: TransferStatus,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE transfer_records SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Wealth Product Repository
// ============================================================================

/// A wealth product about to be created
#[derive(Debug, Clone)]
pub struct NewWealthProduct {
    pub code: String,
    pub name: String,
    pub asset: String,
    pub apy: Decimal,
    pub duration_days: i64,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub total_quota: Decimal,
    pub early_redeem_allowed: bool,
    pub early_redeem_penalty: Decimal,
    pub status: monera_core::WealthProductStatus,
}

/// Repository for the `wealth_products` table
pub struct WealthProductRepo;

impl WealthProductRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        product: &NewWealthProduct,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO wealth_products (code, name, asset, apy, duration_days, min_amount, max_amount, total_quota, sold_quota, early_redeem_allowed, early_redeem_penalty, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, '0', ?, ?, ?, ?)",
        )
        .bind(&product.code)
        .bind(&product.name)
        .bind(&product.asset)
        .bind(product.apy.to_string())
        .bind(product.duration_days)
        .bind(product.min_amount.to_string())
        .bind(product.max_amount.to_string())
        .bind(product.total_quota.to_string())
        .bind(product.early_redeem_allowed)
        .bind(product.early_redeem_penalty.to_string())
        .bind(product.status.to_string())
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("WealthProduct", &product.code, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
    ) -> PersistenceResult<WealthProductRow> {
        sqlx::query_as::<_, WealthProductRow>("SELECT * FROM wealth_products WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WealthProduct", id))
    }

    pub async fn get_by_code<'e, E: SqliteExecutor<'e>>(
        db: E,
        code: &str,
    ) -> PersistenceResult<WealthProductRow> {
        sqlx::query_as::<_, WealthProductRow>("SELECT * FROM wealth_products WHERE code = ?")
            .bind(code)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WealthProduct", code))
    }

    pub async fn list_all<'e, E: SqliteExecutor<'e>>(
        db: E,
    ) -> PersistenceResult<Vec<WealthProductRow>> {
        let rows = sqlx::query_as::<_, WealthProductRow>("SELECT * FROM wealth_products ORDER BY id")
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    /// Compare-and-swap on sold_quota.
    ///
    /// Two concurrent subscriptions both read the same quota; only one CAS
    /// lands, the loser re-reads and re-checks against total_quota.
    pub async fn cas_sold_quota<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        expected: Decimal,
        new: Decimal,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE wealth_products SET sold_quota = ? WHERE id = ? AND sold_quota = ?",
        )
        .bind(new.to_string())
        .bind(id)
        .bind(expected.to_string())
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_status<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        status: monera_core::WealthProductStatus,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE wealth_products SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Wealth Order Repository
// ============================================================================

/// A wealth order about to be created
#[derive(Debug, Clone)]
pub struct NewWealthOrder {
    pub order_no: String,
    pub user_id: String,
    pub product_id: i64,
    pub amount: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub auto_renew: bool,
    pub renewed_from_order_id: Option<i64>,
}

/// Repository for the `wealth_orders` table
pub struct WealthOrderRepo;

impl WealthOrderRepo {
    /// Insert an ACTIVE order with `last_interest_date = start_date`.
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        order: &NewWealthOrder,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO wealth_orders (order_no, user_id, product_id, amount, interest_accrued, interest_paid, principal_redeemed, start_date, end_date, last_interest_date, auto_renew, status, renewed_from_order_id, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, '0', '0', '0', ?, ?, ?, ?, 'ACTIVE', ?, 0, ?, ?)",
        )
        .bind(&order.order_no)
        .bind(&order.user_id)
        .bind(order.product_id)
        .bind(order.amount.to_string())
        .bind(order.start_date)
        .bind(order.end_date)
        .bind(order.start_date)
        .bind(order.auto_renew)
        .bind(order.renewed_from_order_id)
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("WealthOrder", &order.order_no, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
    ) -> PersistenceResult<WealthOrderRow> {
        sqlx::query_as::<_, WealthOrderRow>("SELECT * FROM wealth_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WealthOrder", id))
    }

    pub async fn get_by_order_no<'e, E: SqliteExecutor<'e>>(
        db: E,
        order_no: &str,
    ) -> PersistenceResult<WealthOrderRow> {
        sqlx::query_as::<_, WealthOrderRow>("SELECT * FROM wealth_orders WHERE order_no = ?")
            .bind(order_no)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WealthOrder", order_no))
    }

    pub async fn list_for_user<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
    ) -> PersistenceResult<Vec<WealthOrderRow>> {
        let rows = sqlx::query_as::<_, WealthOrderRow>(
            "SELECT * FROM wealth_orders WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// ACTIVE orders that still owe accrual strictly before `as_of`.
    pub async fn list_accruable<'e, E: SqliteExecutor<'e>>(
        db: E,
        as_of: NaiveDate,
    ) -> PersistenceResult<Vec<WealthOrderRow>> {
        let rows = sqlx::query_as::<_, WealthOrderRow>(
            "SELECT * FROM wealth_orders WHERE status = 'ACTIVE' AND last_interest_date < ? ORDER BY id",
        )
        .bind(as_of)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// ACTIVE orders whose term has ended on or before `as_of`.
    pub async fn list_matured<'e, E: SqliteExecutor<'e>>(
        db: E,
        as_of: NaiveDate,
    ) -> PersistenceResult<Vec<WealthOrderRow>> {
        let rows = sqlx::query_as::<_, WealthOrderRow>(
            "SELECT * FROM wealth_orders WHERE status = 'ACTIVE' AND end_date <= ? ORDER BY id",
        )
        .bind(as_of)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Advance accrual by one day under the order's optimistic version.
    pub async fn apply_accrual<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        interest_accrued: Decimal,
        last_interest_date: NaiveDate,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE wealth_orders SET interest_accrued = ?, last_interest_date = ?, version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ? AND status = 'ACTIVE'",
        )
        .bind(interest_accrued.to_string())
        .bind(last_interest_date)
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_matured<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE wealth_orders SET status = 'MATURED', version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ? AND status = 'ACTIVE'",
        )
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close an order as redeemed, recording what was paid out.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_redeemed<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        interest_accrued: Decimal,
        interest_paid: Decimal,
        principal_redeemed: Decimal,
        redemption_type: monera_core::RedemptionType,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE wealth_orders SET status = 'REDEEMED', interest_accrued = ?, interest_paid = ?, principal_redeemed = ?, redemption_type = ?, version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ? AND status IN ('ACTIVE', 'MATURED')",
        )
        .bind(interest_accrued.to_string())
        .bind(interest_paid.to_string())
        .bind(principal_redeemed.to_string())
        .bind(redemption_type.to_string())
        .bind(now)
        .bind(id)
        .bind(expected_version)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Link a closed order to its auto-renewal successor.
    pub async fn set_renewed_to<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        renewed_to_order_id: i64,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE wealth_orders SET renewed_to_order_id = ? WHERE id = ? AND renewed_to_order_id IS NULL",
        )
        .bind(renewed_to_order_id)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Wealth Interest Record Repository
// ============================================================================

/// Repository for the `wealth_interest_records` table
pub struct InterestRecordRepo;

impl InterestRecordRepo {
    /// Append one accrual/payout record.
    ///
    /// The (order, type, date) unique key is the second line of defense
    /// against double accrual; callers map `AlreadyExists` to a skip.
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        order_id: i64,
        record_type: &str,
        interest_date: NaiveDate,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO wealth_interest_records (order_id, record_type, interest_date, amount, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(record_type)
        .bind(interest_date)
        .bind(amount.to_string())
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| {
            map_unique_violation("InterestRecord", format!("{order_id}/{interest_date}"), e)
        })?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_for_order<'e, E: SqliteExecutor<'e>>(
        db: E,
        order_id: i64,
    ) -> PersistenceResult<Vec<InterestRecordRow>> {
        let rows = sqlx::query_as::<_, InterestRecordRow>(
            "SELECT * FROM wealth_interest_records WHERE order_id = ? ORDER BY interest_date",
        )
        .bind(order_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Withdrawal Repository
// ============================================================================

/// A withdrawal order about to be created
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub order_no: String,
    pub user_id: String,
    pub account_id: i64,
    pub asset: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub chain: String,
    pub to_address: String,
}

/// Repository for the `withdrawal_orders` table
pub struct WithdrawalRepo;

impl WithdrawalRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        order: &NewWithdrawal,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO withdrawal_orders (order_no, user_id, account_id, asset, amount, fee, chain, to_address, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'PENDING', ?)",
        )
        .bind(&order.order_no)
        .bind(&order.user_id)
        .bind(order.account_id)
        .bind(&order.asset)
        .bind(order.amount.to_string())
        .bind(order.fee.to_string())
        .bind(&order.chain)
        .bind(&order.to_address)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("WithdrawalOrder", &order.order_no, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
    ) -> PersistenceResult<WithdrawalRow> {
        sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawal_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WithdrawalOrder", id))
    }

    pub async fn get_by_order_no<'e, E: SqliteExecutor<'e>>(
        db: E,
        order_no: &str,
    ) -> PersistenceResult<WithdrawalRow> {
        sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawal_orders WHERE order_no = ?")
            .bind(order_no)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("WithdrawalOrder", order_no))
    }

    pub async fn find_by_provider_order_id<'e, E: SqliteExecutor<'e>>(
        db: E,
        provider_order_id: &str,
    ) -> PersistenceResult<Option<WithdrawalRow>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawal_orders WHERE provider_order_id = ?",
        )
        .bind(provider_order_id)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn list_by_status<'e, E: SqliteExecutor<'e>>(
        db: E,
        status: WithdrawalStatus,
    ) -> PersistenceResult<Vec<WithdrawalRow>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawal_orders WHERE status = ? ORDER BY id",
        )
        .bind(status.to_string())
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// PENDING -> SENT once the provider accepted the order.
    pub async fn mark_sent<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        provider_order_id: &str,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE withdrawal_orders SET status = 'SENT', provider_order_id = ? \
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(provider_order_id)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition to CONFIRMED.
    ///
    /// Guarded on the non-terminal statuses so whichever terminal callback
    /// lands first wins and the second is a no-op.
    pub async fn mark_confirmed<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        tx_hash: &str,
        actual_amount: Decimal,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE withdrawal_orders SET status = 'CONFIRMED', tx_hash = ?, actual_amount = ?, completed_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'SENT')",
        )
        .bind(tx_hash)
        .bind(actual_amount.to_string())
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition to FAILED, same guard as `mark_confirmed`.
    pub async fn mark_failed<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        failure_reason: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE withdrawal_orders SET status = 'FAILED', failure_reason = ?, completed_at = ? \
             WHERE id = ? AND status IN ('PENDING', 'SENT')",
        )
        .bind(failure_reason)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Withdrawal Freeze Log Repository
// ============================================================================

/// Repository for the `withdrawal_freeze_logs` table
pub struct FreezeLogRepo;

impl FreezeLogRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        withdrawal_order_id: i64,
        account_id: i64,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO withdrawal_freeze_logs (withdrawal_order_id, account_id, amount, frozen_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(withdrawal_order_id)
        .bind(account_id)
        .bind(amount.to_string())
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("WithdrawalFreezeLog", withdrawal_order_id, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_order<'e, E: SqliteExecutor<'e>>(
        db: E,
        withdrawal_order_id: i64,
    ) -> PersistenceResult<FreezeLogRow> {
        sqlx::query_as::<_, FreezeLogRow>(
            "SELECT * FROM withdrawal_freeze_logs WHERE withdrawal_order_id = ?",
        )
        .bind(withdrawal_order_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| PersistenceError::not_found("WithdrawalFreezeLog", withdrawal_order_id))
    }

    /// Record the single release of a freeze.
    ///
    /// `released_at IS NULL` makes a second release attempt a no-op.
    pub async fn mark_released<'e, E: SqliteExecutor<'e>>(
        db: E,
        withdrawal_order_id: i64,
        release_kind: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE withdrawal_freeze_logs SET released_at = ?, release_kind = ? \
             WHERE withdrawal_order_id = ? AND released_at IS NULL",
        )
        .bind(now)
        .bind(release_kind)
        .bind(withdrawal_order_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Withdrawal Address Repository
// ============================================================================

/// Repository for the `withdrawal_addresses` whitelist
pub struct AddressRepo;

impl AddressRepo {
    pub async fn insert<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        chain: &str,
        address: &str,
        label: Option<&str>,
        verified: bool,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO withdrawal_addresses (user_id, chain, address, label, verified, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(chain)
        .bind(address)
        .bind(label)
        .bind(verified)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("WithdrawalAddress", address, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn find<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
        chain: &str,
        address: &str,
    ) -> PersistenceResult<Option<AddressRow>> {
        let row = sqlx::query_as::<_, AddressRow>(
            "SELECT * FROM withdrawal_addresses WHERE user_id = ? AND chain = ? AND address = ?",
        )
        .bind(user_id)
        .bind(chain)
        .bind(address)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn list_for_user<'e, E: SqliteExecutor<'e>>(
        db: E,
        user_id: &str,
    ) -> PersistenceResult<Vec<AddressRow>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            "SELECT * FROM withdrawal_addresses WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn set_verified<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        verified: bool,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE withdrawal_addresses SET verified = ? WHERE id = ?")
            .bind(verified)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Reconciliation Repository
// ============================================================================

/// Repository for reconciliation output tables
pub struct ReconciliationRepo;

impl ReconciliationRepo {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_log<'e, E: SqliteExecutor<'e>>(
        db: E,
        run_id: &str,
        account_id: Option<i64>,
        journal_sum: Decimal,
        account_total: Decimal,
        difference: Decimal,
        status: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO reconciliation_logs (run_id, account_id, journal_sum, account_total, difference, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(account_id)
        .bind(journal_sum.to_string())
        .bind(account_total.to_string())
        .bind(difference.to_string())
        .bind(status)
        .bind(now)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_alert<'e, E: SqliteExecutor<'e>>(
        db: E,
        run_id: &str,
        level: &str,
        source: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO alert_logs (run_id, level, source, message, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(level)
        .bind(source)
        .bind(message)
        .bind(now)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_review<'e, E: SqliteExecutor<'e>>(
        db: E,
        run_id: &str,
        subject_type: &str,
        subject_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO manual_review_queue (run_id, subject_type, subject_id, reason, status, created_at) \
             VALUES (?, ?, ?, ?, 'OPEN', ?)",
        )
        .bind(run_id)
        .bind(subject_type)
        .bind(subject_id)
        .bind(reason)
        .bind(now)
        .execute(db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_logs<'e, E: SqliteExecutor<'e>>(
        db: E,
        run_id: &str,
    ) -> PersistenceResult<Vec<ReconciliationLogRow>> {
        let rows = sqlx::query_as::<_, ReconciliationLogRow>(
            "SELECT * FROM reconciliation_logs WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn list_alerts<'e, E: SqliteExecutor<'e>>(
        db: E,
        run_id: &str,
    ) -> PersistenceResult<Vec<AlertLogRow>> {
        let rows = sqlx::query_as::<_, AlertLogRow>(
            "SELECT * FROM alert_logs WHERE run_id = ? ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn list_open_reviews<'e, E: SqliteExecutor<'e>>(
        db: E,
    ) -> PersistenceResult<Vec<ManualReviewRow>> {
        let rows = sqlx::query_as::<_, ManualReviewRow>(
            "SELECT * FROM manual_review_queue WHERE status = 'OPEN' ORDER BY id",
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn set_review_status<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        status: &str,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE manual_review_queue SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// System Flag Repository
// ============================================================================

/// Repository for the `system_flags` table
pub struct SystemFlagRepo;

impl SystemFlagRepo {
    pub async fn get<'e, E: SqliteExecutor<'e>>(
        db: E,
        name: &str,
    ) -> PersistenceResult<Option<SystemFlagRow>> {
        let row = sqlx::query_as::<_, SystemFlagRow>("SELECT * FROM system_flags WHERE name = ?")
            .bind(name)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn upsert<'e, E: SqliteExecutor<'e>>(
        db: E,
        name: &str,
        value: &str,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO system_flags (name, value, updated_by, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_by = excluded.updated_by, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(value)
        .bind(updated_by)
        .bind(now)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn delete<'e, E: SqliteExecutor<'e>>(db: E, name: &str) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM system_flags WHERE name = ?")
            .bind(name)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Approval Repository
// ============================================================================

/// Repository for approval requests and their append-only decisions
pub struct ApprovalRepo;

impl ApprovalRepo {
    pub async fn insert_request<'e, E: SqliteExecutor<'e>>(
        db: E,
        request_no: &str,
        subject_type: &str,
        subject_id: &str,
        payload: &str,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO approval_requests (request_no, subject_type, subject_id, payload, state, current_step, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'PENDING', 1, ?, ?)",
        )
        .bind(request_no)
        .bind(subject_type)
        .bind(subject_id)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("ApprovalRequest", request_no, e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_request<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
    ) -> PersistenceResult<ApprovalRequestRow> {
        sqlx::query_as::<_, ApprovalRequestRow>("SELECT * FROM approval_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| PersistenceError::not_found("ApprovalRequest", id))
    }

    pub async fn get_by_request_no<'e, E: SqliteExecutor<'e>>(
        db: E,
        request_no: &str,
    ) -> PersistenceResult<ApprovalRequestRow> {
        sqlx::query_as::<_, ApprovalRequestRow>(
            "SELECT * FROM approval_requests WHERE request_no = ?",
        )
        .bind(request_no)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| PersistenceError::not_found("ApprovalRequest", request_no))
    }

    pub async fn list_pending<'e, E: SqliteExecutor<'e>>(
        db: E,
    ) -> PersistenceResult<Vec<ApprovalRequestRow>> {
        let rows = sqlx::query_as::<_, ApprovalRequestRow>(
            "SELECT * FROM approval_requests WHERE state = 'PENDING' ORDER BY id",
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Move the request to a new state/step, guarded on the current step so
    /// concurrent reviewers cannot both advance it.
    pub async fn advance<'e, E: SqliteExecutor<'e>>(
        db: E,
        id: i64,
        state: monera_core::ApprovalState,
        current_step: i64,
        expected_step: i64,
        now: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE approval_requests SET state = ?, current_step = ?, updated_at = ? \
             WHERE id = ? AND current_step = ? AND state = 'PENDING'",
        )
        .bind(state.to_string())
        .bind(current_step)
        .bind(now)
        .bind(id)
        .bind(expected_step)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_decision<'e, E: SqliteExecutor<'e>>(
        db: E,
        request_id: i64,
        step: i64,
        role: monera_core::ReviewerRole,
        reviewer_id: &str,
        approved: bool,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> PersistenceResult<i64> {
        let result = sqlx::query(
            "INSERT INTO approval_decisions (request_id, step, role, reviewer_id, approved, comment, decided_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request_id)
        .bind(step)
        .bind(role.to_string())
        .bind(reviewer_id)
        .bind(approved)
        .bind(comment)
        .bind(now)
        .execute(db)
        .await
        .map_err(|e| map_unique_violation("ApprovalDecision", format!("{request_id}/{step}"), e))?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_decisions<'e, E: SqliteExecutor<'e>>(
        db: E,
        request_id: i64,
    ) -> PersistenceResult<Vec<ApprovalDecisionRow>> {
        let rows = sqlx::query_as::<_, ApprovalDecisionRow>(
            "SELECT * FROM approval_decisions WHERE request_id = ? ORDER BY step",
        )
        .bind(request_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Pool helpers
// ============================================================================

/// Open a pool against an existing database.
pub async fn create_pool(database_url: &str) -> PersistenceResult<SqlitePool> {
    let pool = SqlitePool::connect(database_url).await?;
    Ok(pool)
}

/// Run migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &SqlitePool) -> PersistenceResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Create the database file if missing and bring the schema up to date.
pub async fn init_database(database_url: &str) -> PersistenceResult<SqlitePool> {
    let pool = SqlitePool::connect_with(
        database_url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true),
    )
    .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

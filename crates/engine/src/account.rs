//! Account store - balances under optimistic versioning
//!
//! Every balance mutation goes through [`AccountStore::apply`], which
//! performs the guarded `WHERE version = ?` write and appends exactly one
//! journal entry with the post-change snapshots in the same transaction.
//! Engines compose several `apply` calls inside one transaction and retry
//! the whole transaction on a version conflict.

use chrono::{DateTime, Utc};
use monera_core::{AccountType, BizType};
use monera_persistence::{
    AccountRepo, AccountRow, JournalRepo, NewJournalEntry, PersistenceError,
};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// One balance mutation: signed deltas for available and frozen, plus the
/// journal tag and reference describing why.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub account_id: i64,
    pub delta_available: Decimal,
    pub delta_frozen: Decimal,
    pub biz_type: BizType,
    pub ref_id: Option<String>,
    pub remark: Option<String>,
    /// System mirror accounts may go negative; user accounts never do.
    pub allow_negative: bool,
}

impl BalanceChange {
    fn new(account_id: i64, biz_type: BizType) -> Self {
        Self {
            account_id,
            delta_available: Decimal::ZERO,
            delta_frozen: Decimal::ZERO,
            biz_type,
            ref_id: None,
            remark: None,
            allow_negative: false,
        }
    }

    /// Increase available balance.
    pub fn credit(account_id: i64, amount: Decimal, biz_type: BizType) -> Self {
        Self {
            delta_available: amount,
            ..Self::new(account_id, biz_type)
        }
    }

    /// Decrease available balance.
    pub fn debit(account_id: i64, amount: Decimal, biz_type: BizType) -> Self {
        Self {
            delta_available: -amount,
            ..Self::new(account_id, biz_type)
        }
    }

    /// Move available balance into the frozen bucket.
    pub fn freeze(account_id: i64, amount: Decimal, biz_type: BizType) -> Self {
        Self {
            delta_available: -amount,
            delta_frozen: amount,
            ..Self::new(account_id, biz_type)
        }
    }

    /// Spend a freeze: frozen funds leave the account for good.
    pub fn spend_frozen(account_id: i64, amount: Decimal, biz_type: BizType) -> Self {
        Self {
            delta_frozen: -amount,
            ..Self::new(account_id, biz_type)
        }
    }

    /// Return a freeze to available balance.
    pub fn return_frozen(account_id: i64, amount: Decimal, biz_type: BizType) -> Self {
        Self {
            delta_available: amount,
            delta_frozen: -amount,
            ..Self::new(account_id, biz_type)
        }
    }

    pub fn with_ref(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }
}

/// Journal fold for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedJournal {
    pub available: Decimal,
    pub frozen: Decimal,
    /// False if any intermediate snapshot disagrees with the running fold.
    pub snapshots_consistent: bool,
}

/// Store for account rows and their journal.
#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
    config: EngineConfig,
}

impl AccountStore {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch the account for (user, type, asset), creating the zero-balance
    /// row on first use.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        account_type: AccountType,
        asset: &str,
    ) -> EngineResult<AccountRow> {
        if let Some(account) =
            AccountRepo::find_for_owner(&self.pool, user_id, account_type, asset).await?
        {
            return Ok(account);
        }

        AccountRepo::insert_if_absent(&self.pool, user_id, account_type, asset, Utc::now())
            .await?;
        let account = AccountRepo::find_for_owner(&self.pool, user_id, account_type, asset)
            .await?
            .ok_or_else(|| PersistenceError::not_found("Account", user_id))?;
        Ok(account)
    }

    pub async fn get(&self, account_id: i64) -> EngineResult<AccountRow> {
        Ok(AccountRepo::get_by_id(&self.pool, account_id).await?)
    }

    /// Apply one balance change inside the caller's transaction.
    ///
    /// Reads the account, validates the resulting balances, performs the
    /// version-guarded write and appends the journal entry. A lost version
    /// race surfaces as `VersionConflict` so the caller can roll back and
    /// retry the whole transaction.
    pub(crate) async fn apply(
        conn: &mut SqliteConnection,
        change: &BalanceChange,
        now: DateTime<Utc>,
    ) -> EngineResult<AccountRow> {
        let account = AccountRepo::get_by_id(&mut *conn, change.account_id).await?;
        let balance = account.balance()?;
        let frozen = account.frozen_balance()?;

        let new_balance = balance + change.delta_available;
        let new_frozen = frozen + change.delta_frozen;

        if new_balance < Decimal::ZERO && !change.allow_negative {
            return Err(EngineError::insufficient_balance(
                -change.delta_available,
                balance,
            ));
        }
        if new_frozen < Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "frozen balance of account {} would go negative",
                change.account_id
            )));
        }

        let updated = AccountRepo::update_balances(
            &mut *conn,
            account.id,
            new_balance,
            new_frozen,
            account.version,
            now,
        )
        .await?;
        if !updated {
            return Err(EngineError::VersionConflict);
        }

        let entry = NewJournalEntry {
            serial_no: Uuid::new_v4().to_string(),
            account_id: account.id,
            biz_type: change.biz_type,
            amount: change.delta_available,
            frozen_amount: change.delta_frozen,
            balance_snapshot: new_balance,
            frozen_snapshot: new_frozen,
            ref_id: change.ref_id.clone(),
            remark: change.remark.clone(),
        };
        JournalRepo::append(&mut *conn, &entry, now).await?;

        debug!(
            account_id = account.id,
            biz_type = %change.biz_type,
            amount = %change.delta_available,
            frozen_amount = %change.delta_frozen,
            "balance change applied"
        );

        AccountRepo::get_by_id(&mut *conn, account.id)
            .await
            .map_err(EngineError::from)
    }

    /// Apply one change in its own transaction, retrying version conflicts.
    pub async fn adjust(&self, change: BalanceChange) -> EngineResult<AccountRow> {
        let change = &change;
        with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let account = Self::apply(&mut tx, change, Utc::now()).await?;
            tx.commit().await?;
            Ok(account)
        })
        .await
    }

    /// Fold the journal from zero and check every snapshot along the way.
    pub async fn replay(&self, account_id: i64) -> EngineResult<ReplayedJournal> {
        let entries = JournalRepo::list_for_account(&self.pool, account_id).await?;

        let mut available = Decimal::ZERO;
        let mut frozen = Decimal::ZERO;
        let mut consistent = true;

        for entry in &entries {
            available += entry.amount()?;
            frozen += entry.frozen_amount()?;
            if available != entry.balance_snapshot()? || frozen != entry.frozen_snapshot()? {
                consistent = false;
            }
        }

        Ok(ReplayedJournal {
            available,
            frozen,
            snapshots_consistent: consistent,
        })
    }
}

/// Run an operation, retrying bounded times on optimistic-lock conflicts
/// with exponential backoff. Exhausted retries surface `TransientConflict`.
pub(crate) async fn with_retries<T, F, Fut>(config: &EngineConfig, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(err) if err.is_version_conflict() => {
                attempt += 1;
                if attempt >= config.max_retry_attempts {
                    return Err(EngineError::TransientConflict);
                }
                let backoff = config.retry_backoff_ms << (attempt - 1);
                debug!(attempt, backoff_ms = backoff, "retrying after version conflict");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monera_persistence::Database;
    use rust_decimal_macros::dec;

    async fn store() -> (Database, AccountStore) {
        let db = Database::in_memory().await.unwrap();
        let store = AccountStore::new(db.pool().clone(), EngineConfig::default());
        (db, store)
    }

    #[tokio::test]
    async fn get_or_create_is_lazy_and_stable() {
        let (_db, store) = store().await;

        let a = store
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        let b = store
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);

        let wealth = store
            .get_or_create("alice", AccountType::Wealth, "USDT")
            .await
            .unwrap();
        assert_ne!(a.id, wealth.id);
    }

    #[tokio::test]
    async fn adjust_appends_journal_and_bumps_version() {
        let (_db, store) = store().await;
        let account = store
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();

        let account = store
            .adjust(BalanceChange::credit(account.id, dec!(1000), BizType::Deposit))
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(1000));
        assert_eq!(account.version, 1);

        let replayed = store.replay(account.id).await.unwrap();
        assert_eq!(replayed.available, dec!(1000));
        assert!(replayed.snapshots_consistent);
    }

    #[tokio::test]
    async fn debit_fails_closed_on_insufficient_balance() {
        let (_db, store) = store().await;
        let account = store
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        store
            .adjust(BalanceChange::credit(account.id, dec!(100), BizType::Deposit))
            .await
            .unwrap();

        let err = store
            .adjust(BalanceChange::debit(account.id, dec!(150), BizType::Transfer))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        // Nothing written: balance intact, single journal entry.
        let account = store.get(account.id).await.unwrap();
        assert_eq!(account.balance().unwrap(), dec!(100));
        let replayed = store.replay(account.id).await.unwrap();
        assert_eq!(replayed.available, dec!(100));
    }

    #[tokio::test]
    async fn freeze_moves_between_buckets() {
        let (_db, store) = store().await;
        let account = store
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        store
            .adjust(BalanceChange::credit(account.id, dec!(1000), BizType::Deposit))
            .await
            .unwrap();

        let account = store
            .adjust(BalanceChange::freeze(
                account.id,
                dec!(505),
                BizType::WithdrawFreeze,
            ))
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(495));
        assert_eq!(account.frozen_balance().unwrap(), dec!(505));

        let replayed = store.replay(account.id).await.unwrap();
        assert_eq!(replayed.available, dec!(495));
        assert_eq!(replayed.frozen, dec!(505));
        assert!(replayed.snapshots_consistent);
    }

    #[tokio::test]
    async fn retry_helper_gives_up_with_transient_conflict() {
        let config = EngineConfig {
            max_retry_attempts: 3,
            retry_backoff_ms: 1,
            ..EngineConfig::default()
        };
        let mut calls = 0u32;
        let result: EngineResult<()> = with_retries(&config, || {
            calls += 1;
            async { Err(EngineError::VersionConflict) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::TransientConflict)));
        assert_eq!(calls, 3);
    }
}

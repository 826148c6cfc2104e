//! Transfer engine - atomic double-entry moves between two accounts
//!
//! Both legs and the transfer record land in one transaction; writes are
//! ordered by ascending account id so two opposite-direction transfers
//! cannot wait on each other.

use chrono::{DateTime, Utc};
use monera_core::{AccountType, Amount, BizType, TransferStatus};
use monera_persistence::{TransferRepo, TransferRow};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::account::{with_retries, AccountStore, BalanceChange};
use crate::config::{EngineConfig, DEPOSIT_USER};
use crate::error::{EngineError, EngineResult};
use crate::freeze::FreezeGuard;

/// Everything needed to run both legs inside an open transaction.
#[derive(Debug, Clone)]
pub(crate) struct TransferSpec {
    pub transfer_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub biz_type: BizType,
    pub ref_id: Option<String>,
    pub allow_negative_from: bool,
}

/// Atomic two-account transfers.
#[derive(Clone)]
pub struct TransferEngine {
    pool: SqlitePool,
    config: EngineConfig,
    accounts: AccountStore,
    freeze: FreezeGuard,
}

impl TransferEngine {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        let accounts = AccountStore::new(pool.clone(), config.clone());
        let freeze = FreezeGuard::new(pool.clone());
        Self {
            pool,
            config,
            accounts,
            freeze,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// Debit `from`, credit `to`, journal both legs under one transfer id.
    ///
    /// On insufficient balance or an exhausted retry loop nothing of the
    /// transfer remains except a FAILED transfer record.
    #[instrument(skip(self), fields(%amount, %biz_type))]
    pub async fn transfer(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: Decimal,
        biz_type: BizType,
        ref_id: Option<&str>,
    ) -> EngineResult<TransferRow> {
        let amount = Amount::positive(amount)?.value();
        if from_account_id == to_account_id {
            return Err(EngineError::validation(
                "transfer requires two distinct accounts",
            ));
        }
        self.freeze.ensure_unfrozen().await?;

        let from_account = self.accounts.get(from_account_id).await?;
        self.accounts.get(to_account_id).await?;

        let spec = TransferSpec {
            transfer_id: Uuid::new_v4().to_string(),
            from_account_id,
            to_account_id,
            amount,
            biz_type,
            ref_id: ref_id.map(str::to_string),
            allow_negative_from: EngineConfig::is_system_user(&from_account.user_id),
        };

        let spec_ref = &spec;
        let result = with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            Self::execute(&mut tx, spec_ref, Utc::now()).await?;
            tx.commit().await?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                info!(transfer_id = %spec.transfer_id, "transfer completed");
                Ok(TransferRepo::get_by_transfer_id(&self.pool, &spec.transfer_id).await?)
            }
            Err(
                err @ (EngineError::InsufficientBalance { .. } | EngineError::TransientConflict),
            ) => {
                TransferRepo::insert(
                    &self.pool,
                    &spec.transfer_id,
                    from_account_id,
                    to_account_id,
                    amount,
                    biz_type,
                    ref_id,
                    TransferStatus::Failed,
                    Utc::now(),
                )
                .await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Credit an externally observed deposit to the user's FUND account,
    /// with the system deposit account as the double-entry counterparty.
    ///
    /// Callers dedupe repeated observations of the same `tx_hash` through
    /// the idempotency guard.
    pub async fn record_deposit(
        &self,
        user_id: &str,
        asset: &str,
        amount: Decimal,
        tx_hash: &str,
    ) -> EngineResult<TransferRow> {
        let user_fund = self
            .accounts
            .get_or_create(user_id, AccountType::Fund, asset)
            .await?;
        let deposit_account = self
            .accounts
            .get_or_create(DEPOSIT_USER, AccountType::Fund, asset)
            .await?;

        self.transfer(
            deposit_account.id,
            user_fund.id,
            amount,
            BizType::Deposit,
            Some(tx_hash),
        )
        .await
    }

    /// Run both legs and the COMPLETED record inside `conn`.
    ///
    /// Changes are applied in ascending account-id order regardless of
    /// direction.
    pub(crate) async fn execute(
        conn: &mut SqliteConnection,
        spec: &TransferSpec,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let (out_tag, in_tag) = spec.biz_type.leg_tags();

        let mut debit = BalanceChange::debit(spec.from_account_id, spec.amount, out_tag)
            .with_ref(spec.transfer_id.clone());
        if spec.allow_negative_from {
            debit = debit.allowing_negative();
        }
        let credit = BalanceChange::credit(spec.to_account_id, spec.amount, in_tag)
            .with_ref(spec.transfer_id.clone());

        let mut legs = [debit, credit];
        legs.sort_by_key(|change| change.account_id);
        for change in &legs {
            AccountStore::apply(conn, change, now).await?;
        }

        TransferRepo::insert(
            &mut *conn,
            &spec.transfer_id,
            spec.from_account_id,
            spec.to_account_id,
            spec.amount,
            spec.biz_type,
            spec.ref_id.as_deref(),
            TransferStatus::Completed,
            now,
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monera_core::TransferStatus;
    use monera_persistence::{Database, JournalRepo};
    use rust_decimal_macros::dec;

    async fn engine() -> (Database, TransferEngine) {
        let db = Database::in_memory().await.unwrap();
        let engine = TransferEngine::new(db.pool().clone(), EngineConfig::default());
        (db, engine)
    }

    async fn funded_account(engine: &TransferEngine, user: &str, amount: Decimal) -> i64 {
        let account = engine
            .accounts()
            .get_or_create(user, AccountType::Fund, "USDT")
            .await
            .unwrap();
        engine
            .accounts()
            .adjust(BalanceChange::credit(account.id, amount, BizType::Deposit))
            .await
            .unwrap();
        account.id
    }

    #[tokio::test]
    async fn transfer_moves_balance_and_journals_both_legs() {
        let (db, engine) = engine().await;
        let a = funded_account(&engine, "alice", dec!(1000)).await;
        let b = funded_account(&engine, "bob", dec!(0)).await;

        let record = engine
            .transfer(a, b, dec!(300), BizType::Transfer, None)
            .await
            .unwrap();
        assert_eq!(record.status().unwrap(), TransferStatus::Completed);

        let from = engine.accounts().get(a).await.unwrap();
        let to = engine.accounts().get(b).await.unwrap();
        assert_eq!(from.balance().unwrap(), dec!(700));
        assert_eq!(to.balance().unwrap(), dec!(300));

        // Both legs reference the transfer id and sum to zero.
        let legs = JournalRepo::list_by_ref(db.pool(), &record.transfer_id)
            .await
            .unwrap();
        assert_eq!(legs.len(), 2);
        let sum: Decimal = legs.iter().map(|leg| leg.amount().unwrap()).sum();
        assert_eq!(sum, Decimal::ZERO);
        assert_eq!(legs[0].biz_type().unwrap(), BizType::TransferOut);
        assert_eq!(legs[1].biz_type().unwrap(), BizType::TransferIn);
    }

    #[tokio::test]
    async fn insufficient_balance_rolls_back_and_records_failure() {
        let (db, engine) = engine().await;
        let a = funded_account(&engine, "alice", dec!(1000)).await;
        let b = funded_account(&engine, "bob", dec!(0)).await;

        let err = engine
            .transfer(a, b, dec!(1500), BizType::Transfer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        // Balances unchanged.
        let from = engine.accounts().get(a).await.unwrap();
        let to = engine.accounts().get(b).await.unwrap();
        assert_eq!(from.balance().unwrap(), dec!(1000));
        assert_eq!(to.balance().unwrap(), dec!(0));

        // No stray journal legs; the deposit entries are all there is.
        let a_entries = JournalRepo::list_for_account(db.pool(), a).await.unwrap();
        assert_eq!(a_entries.len(), 1);
    }

    #[tokio::test]
    async fn zero_or_negative_amounts_are_rejected() {
        let (_db, engine) = engine().await;
        let a = funded_account(&engine, "alice", dec!(100)).await;
        let b = funded_account(&engine, "bob", dec!(0)).await;

        assert!(engine
            .transfer(a, b, dec!(0), BizType::Transfer, None)
            .await
            .is_err());
        assert!(engine
            .transfer(a, b, dec!(-5), BizType::Transfer, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn deposit_credits_user_from_system_account() {
        let (_db, engine) = engine().await;

        let record = engine
            .record_deposit("alice", "USDT", dec!(250), "0xhash")
            .await
            .unwrap();
        assert_eq!(record.status().unwrap(), TransferStatus::Completed);

        let user = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(user.balance().unwrap(), dec!(250));

        // The system mirror went negative by the same amount.
        let system = engine
            .accounts()
            .get_or_create(DEPOSIT_USER, AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(system.balance().unwrap(), dec!(-250));
    }

    #[tokio::test]
    async fn business_freeze_blocks_transfers() {
        let (db, engine) = engine().await;
        let a = funded_account(&engine, "alice", dec!(100)).await;
        let b = funded_account(&engine, "bob", dec!(0)).await;

        FreezeGuard::new(db.pool().clone()).set("ops").await.unwrap();

        let err = engine
            .transfer(a, b, dec!(10), BizType::Transfer, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BusinessFrozen));
    }
}

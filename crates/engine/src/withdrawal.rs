//! Withdrawal engine - freeze, external send, exactly-once settlement
//!
//! A request freezes `amount + fee` out of the FUND balance and writes a
//! freeze log in the same transaction. The custody provider is called
//! outside any database transaction; whichever terminal callback arrives
//! first wins the guarded status transition, and the freeze is released
//! exactly once - consumed on confirm, returned on failure. A duplicate
//! terminal callback is logged and leaves the order untouched.

use async_trait::async_trait;
use chrono::Utc;
use monera_core::{AccountType, Amount, BizType, FreezeReleaseKind, WithdrawalStatus};
use monera_persistence::{AddressRepo, FreezeLogRepo, NewWithdrawal, WithdrawalRepo, WithdrawalRow};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::account::{with_retries, AccountStore, BalanceChange};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::freeze::FreezeGuard;

/// Provider-side view of a submitted withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderWithdrawalStatus {
    /// Still in flight; leave the order as it is.
    Processing,
    Confirmed {
        tx_hash: String,
        actual_amount: Decimal,
    },
    Failed {
        reason: String,
    },
}

/// External custody/blockchain collaborator.
///
/// Submissions and status queries happen outside any database transaction;
/// an error or timeout here never moves an order, it only delays it until
/// the recovery sweep asks again.
#[async_trait]
pub trait CustodyProvider: Send + Sync {
    /// Hand an order to the provider; returns the provider's order id.
    async fn submit_withdrawal(&self, order: &WithdrawalRow) -> EngineResult<String>;

    /// Authoritative status of a previously submitted order.
    async fn query_status(&self, provider_order_id: &str)
        -> EngineResult<ProviderWithdrawalStatus>;

    /// Total balance the provider holds for an asset, for reconciliation.
    async fn reported_balance(&self, asset: &str) -> EngineResult<Decimal>;
}

/// Outcome of a submit or recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
}

/// Withdrawal order lifecycle over the freeze state machine.
#[derive(Clone)]
pub struct WithdrawalEngine {
    pool: SqlitePool,
    config: EngineConfig,
    accounts: AccountStore,
    freeze: FreezeGuard,
}

impl WithdrawalEngine {
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

    /// Whitelist a destination address for a user.
    pub async fn add_address(
        &self,
        user_id: &str,
        chain: &str,
        address: &str,
        label: Option<&str>,
        verified: bool,
    ) -> EngineResult<i64> {
        Ok(AddressRepo::insert(&self.pool, user_id, chain, address, label, verified, Utc::now())
            .await?)
    }

    /// Create a PENDING withdrawal with `amount + fee` frozen.
    ///
    /// The freeze, the order and the freeze log are one transaction;
    /// rejection (bad address, insufficient balance, business freeze)
    /// writes nothing.
    #[instrument(skip(self), fields(%amount))]
    pub async fn request(
        &self,
        user_id: &str,
        asset: &str,
        amount: Decimal,
        chain: &str,
        to_address: &str,
        fee: Option<Decimal>,
    ) -> EngineResult<WithdrawalRow> {
        let amount = Amount::positive(amount)?.value();
        let fee = Amount::new(fee.unwrap_or(self.config.default_withdrawal_fee))?.value();
        self.freeze.ensure_unfrozen().await?;

        let whitelisted = AddressRepo::find(&self.pool, user_id, chain, to_address)
            .await?
            .map(|row| row.verified)
            .unwrap_or(false);
        if !whitelisted {
            return Err(EngineError::AddressNotWhitelisted {
                chain: chain.to_string(),
                address: to_address.to_string(),
            });
        }

        let account = self
            .accounts
            .get_or_create(user_id, AccountType::Fund, asset)
            .await?;

        let order = NewWithdrawal {
            order_no: format!("WD-{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            account_id: account.id,
            asset: asset.to_string(),
            amount,
            fee,
            chain: chain.to_string(),
            to_address: to_address.to_string(),
        };
        let total = amount + fee;

        let order_ref = &order;
        let account_id = account.id;
        with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            let order_id = WithdrawalRepo::insert(&mut *tx, order_ref, now).await?;
            AccountStore::apply(
                &mut tx,
                &BalanceChange::freeze(account_id, total, BizType::WithdrawFreeze)
                    .with_ref(order_ref.order_no.clone()),
                now,
            )
            .await?;
            FreezeLogRepo::insert(&mut *tx, order_id, account_id, total, now).await?;

            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(order_no = %order.order_no, "withdrawal requested and frozen");
        Ok(WithdrawalRepo::get_by_order_no(&self.pool, &order.order_no).await?)
    }

    /// Hand every PENDING order to the custody provider.
    ///
    /// The provider call holds no transaction; a provider error leaves the
    /// order PENDING for the next sweep rather than guessing an outcome.
    pub async fn submit_pending(&self, provider: &dyn CustodyProvider) -> EngineResult<SweepSummary> {
        let pending = WithdrawalRepo::list_by_status(&self.pool, WithdrawalStatus::Pending).await?;
        let mut summary = SweepSummary::default();

        for order in pending {
            match provider.submit_withdrawal(&order).await {
                Ok(provider_order_id) => {
                    if WithdrawalRepo::mark_sent(&self.pool, order.id, &provider_order_id).await? {
                        summary.submitted += 1;
                    } else {
                        warn!(order_no = %order.order_no, "order left PENDING state during submit");
                    }
                }
                Err(err) => {
                    warn!(order_no = %order.order_no, %err, "provider rejected submission attempt");
                    summary.still_pending += 1;
                }
            }
        }

        info!(
            submitted = summary.submitted,
            still_pending = summary.still_pending,
            "withdrawal submission sweep finished"
        );
        Ok(summary)
    }

    /// Terminal confirmation: the frozen funds leave the system for good.
    ///
    /// If the order is already terminal the callback is a no-op and the
    /// stored order is returned unchanged.
    #[instrument(skip(self), fields(%actual_amount))]
    pub async fn confirm(
        &self,
        order_id: i64,
        tx_hash: &str,
        actual_amount: Decimal,
    ) -> EngineResult<WithdrawalRow> {
        let applied = with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            let order = WithdrawalRepo::get_by_id(&mut *tx, order_id).await?;
            if !WithdrawalRepo::mark_confirmed(&mut *tx, order_id, tx_hash, actual_amount, now)
                .await?
            {
                return Ok(false);
            }

            let total = order.frozen_total()?;
            AccountStore::apply(
                &mut tx,
                &BalanceChange::spend_frozen(order.account_id, total, BizType::Withdraw)
                    .with_ref(order.order_no.clone()),
                now,
            )
            .await?;
            if !FreezeLogRepo::mark_released(
                &mut *tx,
                order_id,
                &FreezeReleaseKind::Withdrawn.to_string(),
                now,
            )
            .await?
            {
                return Err(EngineError::validation(format!(
                    "freeze for withdrawal {order_id} was already released"
                )));
            }

            tx.commit().await?;
            Ok(true)
        })
        .await?;

        let order = WithdrawalRepo::get_by_id(&self.pool, order_id).await?;
        if applied {
            info!(order_no = %order.order_no, tx_hash, "withdrawal confirmed, freeze consumed");
        } else {
            warn!(
                order_no = %order.order_no,
                status = %order.status,
                "duplicate terminal callback ignored (confirm)"
            );
        }
        Ok(order)
    }

    /// Terminal failure: the frozen funds return to available balance.
    ///
    /// Same exactly-once discipline as [`confirm`](Self::confirm).
    #[instrument(skip(self))]
    pub async fn fail(&self, order_id: i64, reason: &str) -> EngineResult<WithdrawalRow> {
        let applied = with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            let order = WithdrawalRepo::get_by_id(&mut *tx, order_id).await?;
            if !WithdrawalRepo::mark_failed(&mut *tx, order_id, reason, now).await? {
                return Ok(false);
            }

            let total = order.frozen_total()?;
            AccountStore::apply(
                &mut tx,
                &BalanceChange::return_frozen(order.account_id, total, BizType::WithdrawRelease)
                    .with_ref(order.order_no.clone()),
                now,
            )
            .await?;
            if !FreezeLogRepo::mark_released(
                &mut *tx,
                order_id,
                &FreezeReleaseKind::Returned.to_string(),
                now,
            )
            .await?
            {
                return Err(EngineError::validation(format!(
                    "freeze for withdrawal {order_id} was already released"
                )));
            }

            tx.commit().await?;
            Ok(true)
        })
        .await?;

        let order = WithdrawalRepo::get_by_id(&self.pool, order_id).await?;
        if applied {
            info!(order_no = %order.order_no, reason, "withdrawal failed, freeze returned");
        } else {
            warn!(
                order_no = %order.order_no,
                status = %order.status,
                "duplicate terminal callback ignored (fail)"
            );
        }
        Ok(order)
    }

    /// Recovery sweep: ask the provider about every SENT order and settle
    /// the ones that reached a terminal state on the provider side.
    pub async fn recover(&self, provider: &dyn CustodyProvider) -> EngineResult<SweepSummary> {
        let sent = WithdrawalRepo::list_by_status(&self.pool, WithdrawalStatus::Sent).await?;
        let mut summary = SweepSummary::default();

        for order in sent {
            let Some(provider_order_id) = order.provider_order_id.clone() else {
                warn!(order_no = %order.order_no, "SENT order has no provider order id");
                continue;
            };
            match provider.query_status(&provider_order_id).await {
                Ok(ProviderWithdrawalStatus::Confirmed {
                    tx_hash,
                    actual_amount,
                }) => {
                    self.confirm(order.id, &tx_hash, actual_amount).await?;
                    summary.confirmed += 1;
                }
                Ok(ProviderWithdrawalStatus::Failed { reason }) => {
                    self.fail(order.id, &reason).await?;
                    summary.failed += 1;
                }
                Ok(ProviderWithdrawalStatus::Processing) => {
                    summary.still_pending += 1;
                }
                Err(err) => {
                    warn!(order_no = %order.order_no, %err, "provider status query failed");
                    summary.still_pending += 1;
                }
            }
        }

        info!(
            confirmed = summary.confirmed,
            failed = summary.failed,
            still_pending = summary.still_pending,
            "withdrawal recovery sweep finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monera_persistence::Database;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Scripted provider: accepts every submission, answers status queries
    /// from a queue.
    struct ScriptedCustody {
        statuses: Mutex<Vec<ProviderWithdrawalStatus>>,
    }

    impl ScriptedCustody {
        fn answering(statuses: Vec<ProviderWithdrawalStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
            }
        }
    }

    #[async_trait]
    impl CustodyProvider for ScriptedCustody {
        async fn submit_withdrawal(&self, order: &WithdrawalRow) -> EngineResult<String> {
            Ok(format!("prov-{}", order.order_no))
        }

        async fn query_status(
            &self,
            _provider_order_id: &str,
        ) -> EngineResult<ProviderWithdrawalStatus> {
            let mut statuses = self.statuses.lock().unwrap();
            Ok(statuses
                .pop()
                .unwrap_or(ProviderWithdrawalStatus::Processing))
        }

        async fn reported_balance(&self, _asset: &str) -> EngineResult<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

    async fn engine() -> (Database, WithdrawalEngine) {
        let db = Database::in_memory().await.unwrap();
        let engine = WithdrawalEngine::new(db.pool().clone(), EngineConfig::default());
        (db, engine)
    }

    async fn funded_whitelisted(engine: &WithdrawalEngine, user: &str, amount: Decimal) {
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
        engine
            .add_address(user, "ETH", "0xabc", Some("cold wallet"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn request_freezes_amount_plus_fee() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;

        let order = engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();
        assert_eq!(order.status().unwrap(), WithdrawalStatus::Pending);
        assert_eq!(order.frozen_total().unwrap(), dec!(505));

        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(495));
        assert_eq!(account.frozen_balance().unwrap(), dec!(505));

        let log = FreezeLogRepo::get_by_order(&engine.pool, order.id).await.unwrap();
        assert_eq!(log.amount().unwrap(), dec!(505));
        assert!(!log.is_released());
    }

    #[tokio::test]
    async fn request_rejects_unverified_address() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;
        engine
            .add_address("alice", "ETH", "0xunverified", None, false)
            .await
            .unwrap();

        let err = engine
            .request("alice", "USDT", dec!(100), "ETH", "0xunverified", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AddressNotWhitelisted { .. }));

        // Nothing frozen.
        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn request_fails_closed_when_balance_short() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(100)).await;

        let err = engine
            .request("alice", "USDT", dec!(100), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        // The rejected request left no order behind.
        let pending = WithdrawalRepo::list_by_status(&engine.pool, WithdrawalStatus::Pending)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn confirm_consumes_freeze_permanently() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;
        let order = engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();

        let provider = ScriptedCustody::answering(vec![]);
        engine.submit_pending(&provider).await.unwrap();

        let order = engine.confirm(order.id, "0xdeadbeef", dec!(498)).await.unwrap();
        assert_eq!(order.status().unwrap(), WithdrawalStatus::Confirmed);
        assert_eq!(order.tx_hash.as_deref(), Some("0xdeadbeef"));

        // Frozen funds are gone, available balance untouched.
        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(495));
        assert_eq!(account.frozen_balance().unwrap(), dec!(0));

        let log = FreezeLogRepo::get_by_order(&engine.pool, order.id).await.unwrap();
        assert!(log.is_released());
        assert_eq!(log.release_kind.as_deref(), Some("WITHDRAWN"));
    }

    #[tokio::test]
    async fn fail_returns_freeze_to_balance() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;
        let order = engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();

        let order = engine.fail(order.id, "provider rejected").await.unwrap();
        assert_eq!(order.status().unwrap(), WithdrawalStatus::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("provider rejected"));

        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(1000));
        assert_eq!(account.frozen_balance().unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn second_terminal_callback_is_a_noop() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;
        let order = engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();

        engine.confirm(order.id, "0xdeadbeef", dec!(498)).await.unwrap();

        // A late failure callback must not move any funds.
        let order = engine.fail(order.id, "late timeout").await.unwrap();
        assert_eq!(order.status().unwrap(), WithdrawalStatus::Confirmed);
        assert!(order.failure_reason.is_none());

        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(495));
        assert_eq!(account.frozen_balance().unwrap(), dec!(0));

        // And a duplicate confirm is equally inert.
        let order = engine.confirm(order.id, "0xother", dec!(498)).await.unwrap();
        assert_eq!(order.tx_hash.as_deref(), Some("0xdeadbeef"));
    }

    #[tokio::test]
    async fn recovery_sweep_settles_sent_orders() {
        let (_db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(2000)).await;
        engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();
        engine
            .request("alice", "USDT", dec!(300), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();

        let provider = ScriptedCustody::answering(vec![
            ProviderWithdrawalStatus::Failed {
                reason: "gas too low".to_string(),
            },
            ProviderWithdrawalStatus::Confirmed {
                tx_hash: "0xfinal".to_string(),
                actual_amount: dec!(498),
            },
        ]);

        let submitted = engine.submit_pending(&provider).await.unwrap();
        assert_eq!(submitted.submitted, 2);

        let recovered = engine.recover(&provider).await.unwrap();
        assert_eq!(recovered.confirmed, 1);
        assert_eq!(recovered.failed, 1);

        // One freeze consumed (505), one returned (305).
        let account = engine
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(1495));
        assert_eq!(account.frozen_balance().unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn business_freeze_blocks_new_requests_only() {
        let (db, engine) = engine().await;
        funded_whitelisted(&engine, "alice", dec!(1000)).await;
        let order = engine
            .request("alice", "USDT", dec!(500), "ETH", "0xabc", Some(dec!(5)))
            .await
            .unwrap();

        FreezeGuard::new(db.pool().clone()).set("ops").await.unwrap();

        let err = engine
            .request("alice", "USDT", dec!(100), "ETH", "0xabc", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BusinessFrozen));

        // In-flight orders still settle while frozen.
        let order = engine.fail(order.id, "halted").await.unwrap();
        assert_eq!(order.status().unwrap(), WithdrawalStatus::Failed);
    }
}

//! Reconciliation monitor - proving balances against the journal
//!
//! A sweep is read-only towards accounts: every account's journal is folded
//! from zero and compared to `balance + frozen_balance`, and the aggregate
//! of user holdings is compared against what the custody provider reports.
//! Discrepancies beyond the configured epsilon produce a CRITICAL alert and
//! a manual-review item; balances are never corrected automatically.

use monera_persistence::{AccountRepo, ReconciliationRepo};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::account::AccountStore;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::withdrawal::CustodyProvider;

const LEVEL_CRITICAL: &str = "CRITICAL";
const SOURCE_JOURNAL: &str = "JOURNAL_REPLAY";
const SOURCE_CUSTODY: &str = "CUSTODY_BALANCE";
const STATUS_OK: &str = "OK";
const STATUS_MISMATCH: &str = "MISMATCH";

/// Result of one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub run_id: String,
    pub accounts_checked: usize,
    pub account_mismatches: usize,
    pub custody_assets_checked: usize,
    pub custody_mismatches: usize,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.account_mismatches == 0 && self.custody_mismatches == 0
    }
}

/// Periodic, read-only verification sweep.
#[derive(Clone)]
pub struct ReconciliationMonitor {
    pool: SqlitePool,
    config: EngineConfig,
    accounts: AccountStore,
}

impl ReconciliationMonitor {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        let accounts = AccountStore::new(pool.clone(), config.clone());
        Self {
            pool,
            config,
            accounts,
        }
    }

    /// Run one sweep. Pass the custody provider to additionally compare
    /// aggregate user holdings per asset against its reported balances;
    /// without one only the journal replay runs.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        custody: Option<&dyn CustodyProvider>,
    ) -> EngineResult<ReconciliationReport> {
        let run_id = format!("RECON-{}", Uuid::new_v4());
        let mut report = ReconciliationReport {
            run_id: run_id.clone(),
            ..ReconciliationReport::default()
        };

        // Aggregate of user-owned value per asset, for the custody compare.
        let mut user_totals: BTreeMap<String, Decimal> = BTreeMap::new();

        let accounts = AccountRepo::list_all(&self.pool).await?;
        for account in &accounts {
            let now = chrono::Utc::now();
            let replayed = self.accounts.replay(account.id).await?;
            let journal_sum = replayed.available + replayed.frozen;
            let account_total = account.total()?;
            let difference = account_total - journal_sum;

            let mismatch =
                difference.abs() > self.config.reconciliation_epsilon || !replayed.snapshots_consistent;
            let status = if mismatch { STATUS_MISMATCH } else { STATUS_OK };

            ReconciliationRepo::insert_log(
                &self.pool,
                &run_id,
                Some(account.id),
                journal_sum,
                account_total,
                difference,
                status,
                now,
            )
            .await?;

            if mismatch {
                report.account_mismatches += 1;
                let message = format!(
                    "account {} ({}/{}/{}): journal sum {journal_sum}, stored total {account_total}, difference {difference}",
                    account.id, account.user_id, account.account_type, account.asset
                );
                error!(account_id = account.id, %difference, "reconciliation mismatch");
                ReconciliationRepo::insert_alert(
                    &self.pool,
                    &run_id,
                    LEVEL_CRITICAL,
                    SOURCE_JOURNAL,
                    &message,
                    now,
                )
                .await?;
                ReconciliationRepo::insert_review(
                    &self.pool,
                    &run_id,
                    "ACCOUNT",
                    &account.id.to_string(),
                    &message,
                    now,
                )
                .await?;
            }

            report.accounts_checked += 1;
            if !EngineConfig::is_system_user(&account.user_id) {
                *user_totals.entry(account.asset.clone()).or_default() += account_total;
            }
        }

        if let Some(provider) = custody {
            for (asset, internal_total) in &user_totals {
                let now = chrono::Utc::now();
                let reported = provider.reported_balance(asset).await?;
                let difference = reported - internal_total;
                report.custody_assets_checked += 1;

                if difference.abs() > self.config.reconciliation_epsilon {
                    report.custody_mismatches += 1;
                    let message = format!(
                        "asset {asset}: internal user holdings {internal_total}, custody reports {reported}, difference {difference}"
                    );
                    error!(asset, %difference, "custody balance mismatch");
                    ReconciliationRepo::insert_alert(
                        &self.pool,
                        &run_id,
                        LEVEL_CRITICAL,
                        SOURCE_CUSTODY,
                        &message,
                        now,
                    )
                    .await?;
                    ReconciliationRepo::insert_review(&self.pool, &run_id, "CUSTODY", asset, &message, now)
                        .await?;
                }
            }
        }

        info!(
            run_id = %report.run_id,
            accounts = report.accounts_checked,
            account_mismatches = report.account_mismatches,
            custody_mismatches = report.custody_mismatches,
            "reconciliation sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEPOSIT_USER;
    use crate::transfer::TransferEngine;
    use crate::withdrawal::ProviderWithdrawalStatus;
    use async_trait::async_trait;
    use monera_core::AccountType;
    use monera_persistence::{Database, WithdrawalRow};
    use rust_decimal_macros::dec;

    struct FixedCustody {
        balance: Decimal,
    }

    #[async_trait]
    impl CustodyProvider for FixedCustody {
        async fn submit_withdrawal(&self, _order: &WithdrawalRow) -> EngineResult<String> {
            unreachable!("reconciliation never submits")
        }

        async fn query_status(
            &self,
            _provider_order_id: &str,
        ) -> EngineResult<ProviderWithdrawalStatus> {
            unreachable!("reconciliation never queries orders")
        }

        async fn reported_balance(&self, _asset: &str) -> EngineResult<Decimal> {
            Ok(self.balance)
        }
    }

    async fn setup() -> (Database, TransferEngine, ReconciliationMonitor) {
        let db = Database::in_memory().await.unwrap();
        let transfers = TransferEngine::new(db.pool().clone(), EngineConfig::default());
        let monitor = ReconciliationMonitor::new(db.pool().clone(), EngineConfig::default());
        (db, transfers, monitor)
    }

    #[tokio::test]
    async fn clean_books_produce_no_alerts() {
        let (db, transfers, monitor) = setup().await;
        transfers
            .record_deposit("alice", "USDT", dec!(1000), "0xdep")
            .await
            .unwrap();

        let report = monitor.run(None).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.accounts_checked, 2);

        let alerts = ReconciliationRepo::list_alerts(db.pool(), &report.run_id)
            .await
            .unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn corrupted_balance_raises_one_alert_and_one_review() {
        let (db, transfers, monitor) = setup().await;
        transfers
            .record_deposit("alice", "USDT", dec!(1000), "0xdep")
            .await
            .unwrap();
        let account = transfers
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();

        // Corrupt the stored balance behind the journal's back.
        sqlx::query("UPDATE accounts SET balance = '1001' WHERE id = ?")
            .bind(account.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = monitor.run(None).await.unwrap();
        assert_eq!(report.account_mismatches, 1);

        let alerts = ReconciliationRepo::list_alerts(db.pool(), &report.run_id)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, "CRITICAL");

        let reviews = ReconciliationRepo::list_open_reviews(db.pool()).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].subject_id, account.id.to_string());

        // The sweep never corrects the account.
        let account = transfers.accounts().get(account.id).await.unwrap();
        assert_eq!(account.balance().unwrap(), dec!(1001));
    }

    #[tokio::test]
    async fn custody_compare_excludes_system_accounts() {
        let (_db, transfers, monitor) = setup().await;
        transfers
            .record_deposit("alice", "USDT", dec!(1000), "0xdep")
            .await
            .unwrap();

        // User holdings are 1000; the negative system deposit mirror is
        // excluded from the aggregate.
        let matching = FixedCustody {
            balance: dec!(1000),
        };
        let report = monitor.run(Some(&matching)).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.custody_assets_checked, 1);

        let short = FixedCustody { balance: dec!(900) };
        let report = monitor.run(Some(&short)).await.unwrap();
        assert_eq!(report.custody_mismatches, 1);
    }

    #[tokio::test]
    async fn epsilon_tolerates_small_drift() {
        let (db, transfers, monitor_default) = setup().await;
        transfers
            .record_deposit("alice", "USDT", dec!(1000), "0xdep")
            .await
            .unwrap();
        let account = transfers
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        sqlx::query("UPDATE accounts SET balance = '1000.005' WHERE id = ?")
            .bind(account.id)
            .execute(db.pool())
            .await
            .unwrap();

        // Zero epsilon flags the drift.
        let report = monitor_default.run(None).await.unwrap();
        assert_eq!(report.account_mismatches, 1);

        // A configured tolerance accepts it.
        let tolerant = ReconciliationMonitor::new(
            db.pool().clone(),
            EngineConfig {
                reconciliation_epsilon: dec!(0.01),
                ..EngineConfig::default()
            },
        );
        let report = tolerant.run(None).await.unwrap();
        assert_eq!(report.account_mismatches, 0);
    }

    #[tokio::test]
    async fn system_deposit_mirror_reconciles_against_its_journal() {
        let (_db, transfers, monitor) = setup().await;
        transfers
            .record_deposit("alice", "USDT", dec!(250), "0xdep")
            .await
            .unwrap();

        // The deposit mirror is negative but still journal-consistent.
        let system = transfers
            .accounts()
            .get_or_create(DEPOSIT_USER, AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(system.balance().unwrap(), dec!(-250));

        let report = monitor.run(None).await.unwrap();
        assert!(report.is_clean());
    }
}

//! End-to-end invariants over the whole engine stack: journal replay
//! reproduces every balance, transfer legs cancel out, and the books stay
//! clean through a mixed workload.

use monera_core::{AccountType, BizType, WealthProductStatus};
use monera_engine::{
    EngineConfig, ReconciliationMonitor, TransferEngine, WealthEngine, WithdrawalEngine,
};
use monera_persistence::{AccountRepo, Database, JournalRepo, NewWealthProduct, TransferRepo};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(s: &str) -> chrono::NaiveDate {
    s.parse().unwrap()
}

fn open_product(code: &str) -> NewWealthProduct {
    NewWealthProduct {
        code: code.to_string(),
        name: "USDT term deposit".to_string(),
        asset: "USDT".to_string(),
        apy: dec!(8.00),
        duration_days: 30,
        min_amount: dec!(100),
        max_amount: dec!(100000),
        total_quota: dec!(1000000),
        early_redeem_allowed: true,
        early_redeem_penalty: dec!(0.3),
        status: WealthProductStatus::Open,
    }
}

/// Replaying every account's journal from zero must land exactly on the
/// stored balances, even after a workload mixing every engine.
#[tokio::test]
async fn journal_replay_reproduces_balances_after_mixed_workload() {
    let db = Database::in_memory().await.unwrap();
    let config = EngineConfig::default();
    let transfers = TransferEngine::new(db.pool().clone(), config.clone());
    let wealth = WealthEngine::new(db.pool().clone(), config.clone());
    let withdrawals = WithdrawalEngine::new(db.pool().clone(), config.clone());

    // Deposits for two users.
    transfers
        .record_deposit("alice", "USDT", dec!(10000), "0xd1")
        .await
        .unwrap();
    transfers
        .record_deposit("bob", "USDT", dec!(5000), "0xd2")
        .await
        .unwrap();

    // An internal transfer.
    let alice_fund = transfers
        .accounts()
        .get_or_create("alice", AccountType::Fund, "USDT")
        .await
        .unwrap();
    let bob_fund = transfers
        .accounts()
        .get_or_create("bob", AccountType::Fund, "USDT")
        .await
        .unwrap();
    transfers
        .transfer(alice_fund.id, bob_fund.id, dec!(1200), BizType::Transfer, None)
        .await
        .unwrap();

    // A wealth subscription with two days of accrual and early redemption.
    let product = wealth.create_product(open_product("P1")).await.unwrap();
    let order = wealth
        .subscribe("alice", product.id, dec!(2000), false, date("2026-02-01"))
        .await
        .unwrap();
    wealth.accrue_daily(date("2026-02-03")).await.unwrap();
    wealth.redeem(order.id, date("2026-02-03")).await.unwrap();

    // A withdrawal that fails and one that confirms.
    withdrawals
        .add_address("bob", "ETH", "0xcold", None, true)
        .await
        .unwrap();
    let failed = withdrawals
        .request("bob", "USDT", dec!(500), "ETH", "0xcold", Some(dec!(5)))
        .await
        .unwrap();
    withdrawals.fail(failed.id, "rejected").await.unwrap();
    let confirmed = withdrawals
        .request("bob", "USDT", dec!(300), "ETH", "0xcold", Some(dec!(5)))
        .await
        .unwrap();
    withdrawals.confirm(confirmed.id, "0xtx", dec!(298)).await.unwrap();

    // Every account, system mirrors included, replays exactly.
    let accounts = AccountRepo::list_all(db.pool()).await.unwrap();
    assert!(accounts.len() >= 5);
    for account in &accounts {
        let replayed = transfers.accounts().replay(account.id).await.unwrap();
        assert_eq!(
            replayed.available,
            account.balance().unwrap(),
            "available balance of account {} diverged from its journal",
            account.id
        );
        assert_eq!(
            replayed.frozen,
            account.frozen_balance().unwrap(),
            "frozen balance of account {} diverged from its journal",
            account.id
        );
        assert!(replayed.snapshots_consistent);
    }

    // And the reconciliation sweep agrees.
    let monitor = ReconciliationMonitor::new(db.pool().clone(), config);
    let report = monitor.run(None).await.unwrap();
    assert!(report.is_clean());
}

/// For every completed transfer the two journal legs sum to zero.
#[tokio::test]
async fn completed_transfer_legs_always_cancel() {
    let db = Database::in_memory().await.unwrap();
    let transfers = TransferEngine::new(db.pool().clone(), EngineConfig::default());

    transfers
        .record_deposit("alice", "USDT", dec!(1000), "0xd1")
        .await
        .unwrap();
    let a = transfers
        .accounts()
        .get_or_create("alice", AccountType::Fund, "USDT")
        .await
        .unwrap();
    let b = transfers
        .accounts()
        .get_or_create("bob", AccountType::Fund, "USDT")
        .await
        .unwrap();

    let mut transfer_ids = Vec::new();
    for amount in [dec!(10), dec!(250.5), dec!(0.00000001)] {
        let record = transfers
            .transfer(a.id, b.id, amount, BizType::Transfer, None)
            .await
            .unwrap();
        transfer_ids.push(record.transfer_id);
    }

    for transfer_id in &transfer_ids {
        let record = TransferRepo::get_by_transfer_id(db.pool(), transfer_id)
            .await
            .unwrap();
        assert_eq!(record.status, "COMPLETED");

        let legs = JournalRepo::list_by_ref(db.pool(), transfer_id).await.unwrap();
        assert_eq!(legs.len(), 2);
        let sum: Decimal = legs.iter().map(|leg| leg.amount().unwrap()).sum();
        assert_eq!(sum, Decimal::ZERO);
    }
}

/// Insufficient balance leaves both accounts untouched (spec scenario:
/// balance 1000, transfer 1500).
#[tokio::test]
async fn failed_transfer_changes_nothing() {
    let db = Database::in_memory().await.unwrap();
    let transfers = TransferEngine::new(db.pool().clone(), EngineConfig::default());

    transfers
        .record_deposit("alice", "USDT", dec!(1000), "0xd1")
        .await
        .unwrap();
    let a = transfers
        .accounts()
        .get_or_create("alice", AccountType::Fund, "USDT")
        .await
        .unwrap();
    let b = transfers
        .accounts()
        .get_or_create("bob", AccountType::Fund, "USDT")
        .await
        .unwrap();

    let err = transfers
        .transfer(a.id, b.id, dec!(1500), BizType::Transfer, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        monera_engine::EngineError::InsufficientBalance { .. }
    ));

    let a = transfers.accounts().get(a.id).await.unwrap();
    let b = transfers.accounts().get(b.id).await.unwrap();
    assert_eq!(a.balance().unwrap(), dec!(1000));
    assert_eq!(b.balance().unwrap(), dec!(0));

    // The attempt is recorded as FAILED, with no journal legs.
    let replayed = transfers.accounts().replay(a.id).await.unwrap();
    assert_eq!(replayed.available, dec!(1000));
}

/// The ledger survives a process restart: everything replays from disk.
#[tokio::test]
async fn journal_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}/monera.db", dir.path().display());

    let account_id = {
        let db = Database::connect(&url).await.unwrap();
        let transfers = TransferEngine::new(db.pool().clone(), EngineConfig::default());
        transfers
            .record_deposit("alice", "USDT", dec!(750), "0xd1")
            .await
            .unwrap();
        transfers
            .accounts()
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap()
            .id
    };

    let db = Database::connect(&url).await.unwrap();
    let transfers = TransferEngine::new(db.pool().clone(), EngineConfig::default());
    let account = transfers.accounts().get(account_id).await.unwrap();
    assert_eq!(account.balance().unwrap(), dec!(750));

    let replayed = transfers.accounts().replay(account_id).await.unwrap();
    assert_eq!(replayed.available, dec!(750));
    assert!(replayed.snapshots_consistent);
}

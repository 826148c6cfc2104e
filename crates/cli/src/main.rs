//! Monera operator CLI - runs the scheduled jobs and gated operations the
//! engine exposes.
//!
//! Usage:
//! ```bash
//! monera accrue --date 2026-08-07
//! monera maturities
//! monera reconcile
//! monera freeze set --operator ops-1
//! monera idempotency sweep
//! monera product create --code USDT-90 --asset USDT --duration 90 ...
//! monera product launch-request --code USDT-90
//! monera product decide --request-no APR-... --role finance --reviewer fin-1
//! monera account show --user alice --asset USDT
//! ```

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

use monera_core::{AccountType, ReviewerRole, WealthProductStatus};
use monera_engine::{
    apy_for, ApprovalWorkflow, EngineConfig, FreezeGuard, IdempotencyGuard, ReconciliationMonitor,
    WealthEngine,
};
use monera_persistence::{AccountRepo, Database, NewWealthProduct, SystemFlagRepo};

/// Monera ledger operations
#[derive(Parser)]
#[command(name = "monera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database file path
    #[arg(long, default_value = "data/monera.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily interest accrual sweep
    Accrue {
        /// Accrue up to this date (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Settle matured wealth orders (redeem or auto-renew)
    Maturities {
        /// Treat this date as today (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Run a reconciliation sweep over every account
    Reconcile,

    /// Operate the global business freeze flag
    Freeze {
        #[command(subcommand)]
        action: FreezeAction,
    },

    /// Idempotency record maintenance
    Idempotency {
        #[command(subcommand)]
        action: IdempotencyAction,
    },

    /// Wealth product management
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },

    /// Account inspection
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Subcommand)]
enum FreezeAction {
    /// Halt new transfers, withdrawals and subscriptions
    Set {
        /// Operator recorded as having set the flag
        #[arg(long)]
        operator: String,
    },
    /// Resume normal operation
    Clear {
        #[arg(long)]
        operator: String,
    },
    /// Show the current flag state
    Show,
}

#[derive(Subcommand)]
enum IdempotencyAction {
    /// Mark expired PROCESSING records FAILED so clients can retry
    Sweep,
}

#[derive(Subcommand)]
enum ProductAction {
    /// Create a product in PENDING state
    Create {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        asset: String,
        /// Term length in days
        #[arg(long)]
        duration: i64,
        /// Annualized rate in percent; defaults to the asset/term tier
        #[arg(long)]
        apy: Option<Decimal>,
        #[arg(long, default_value = "100")]
        min_amount: Decimal,
        #[arg(long, default_value = "1000000")]
        max_amount: Decimal,
        #[arg(long)]
        total_quota: Decimal,
        #[arg(long)]
        early_redeem: bool,
        /// Fraction of unpaid interest forfeited on early redemption
        #[arg(long, default_value = "0")]
        early_redeem_penalty: Decimal,
    },
    /// File a launch approval request for a PENDING product
    LaunchRequest {
        #[arg(long)]
        code: String,
    },
    /// Record one reviewer decision on an approval request
    Decide {
        #[arg(long)]
        request_no: String,
        #[arg(long)]
        role: RoleArg,
        #[arg(long)]
        reviewer: String,
        /// Reject instead of approving
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        comment: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Show one account with its journal-replayed balance
    Show {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "fund")]
        r#type: AccountTypeArg,
        #[arg(long)]
        asset: String,
    },
    /// List every account
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum AccountTypeArg {
    Fund,
    Wealth,
}

impl AccountTypeArg {
    fn to_core_type(self) -> AccountType {
        match self {
            AccountTypeArg::Fund => AccountType::Fund,
            AccountTypeArg::Wealth => AccountType::Wealth,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Finance,
    Risk,
    Admin,
}

impl RoleArg {
    fn to_core_type(self) -> ReviewerRole {
        match self {
            RoleArg::Finance => ReviewerRole::Finance,
            RoleArg::Risk => ReviewerRole::Risk,
            RoleArg::Admin => ReviewerRole::Admin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Some(parent) = cli.db.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let url = format!("sqlite:{}", cli.db.display());
    let db = Database::connect(&url).await?;
    let config = EngineConfig::default();

    match cli.command {
        Commands::Accrue { date } => {
            let as_of = date.unwrap_or_else(|| Utc::now().date_naive());
            let wealth = WealthEngine::new(db.pool().clone(), config);
            let summary = wealth.accrue_daily(as_of).await?;
            println!(
                "accrued {} day(s) of interest across {} order(s), {} failed",
                summary.days_accrued, summary.orders_processed, summary.orders_failed
            );
        }

        Commands::Maturities { date } => {
            let as_of = date.unwrap_or_else(|| Utc::now().date_naive());
            let wealth = WealthEngine::new(db.pool().clone(), config);
            let summary = wealth.process_maturities(as_of).await?;
            println!(
                "settled maturities: {} renewed, {} redeemed, {} failed",
                summary.renewed, summary.redeemed, summary.orders_failed
            );
        }

        Commands::Reconcile => {
            let monitor = ReconciliationMonitor::new(db.pool().clone(), config);
            let report = monitor.run(None).await?;
            println!(
                "run {}: {} account(s) checked, {} mismatch(es)",
                report.run_id, report.accounts_checked, report.account_mismatches
            );
            if !report.is_clean() {
                println!("mismatches found - see alert_logs and manual_review_queue");
                std::process::exit(1);
            }
        }

        Commands::Freeze { action } => {
            let guard = FreezeGuard::new(db.pool().clone());
            match action {
                FreezeAction::Set { operator } => {
                    guard.set(&operator).await?;
                    println!("business freeze flag set by {operator}");
                }
                FreezeAction::Clear { operator } => {
                    guard.clear(&operator).await?;
                    println!("business freeze flag cleared by {operator}");
                }
                FreezeAction::Show => {
                    let frozen = guard.is_frozen().await?;
                    match SystemFlagRepo::get(db.pool(), monera_engine::BUSINESS_FREEZE_FLAG)
                        .await?
                    {
                        Some(flag) => println!(
                            "frozen: {frozen} (last changed by {} at {})",
                            flag.updated_by, flag.updated_at
                        ),
                        None => println!("frozen: {frozen} (never set)"),
                    }
                }
            }
        }

        Commands::Idempotency { action } => match action {
            IdempotencyAction::Sweep => {
                let guard = IdempotencyGuard::new(db.pool().clone(), config);
                let swept = guard.sweep_expired().await?;
                println!("reclaimed {swept} expired idempotency record(s)");
            }
        },

        Commands::Product { action } => match action {
            ProductAction::Create {
                code,
                name,
                asset,
                duration,
                apy,
                min_amount,
                max_amount,
                total_quota,
                early_redeem,
                early_redeem_penalty,
            } => {
                let apy = apy.unwrap_or_else(|| apy_for(&asset, duration.max(0) as u32));
                let wealth = WealthEngine::new(db.pool().clone(), config);
                let product = wealth
                    .create_product(NewWealthProduct {
                        code,
                        name,
                        asset,
                        apy,
                        duration_days: duration,
                        min_amount,
                        max_amount,
                        total_quota,
                        early_redeem_allowed: early_redeem,
                        early_redeem_penalty,
                        status: WealthProductStatus::Pending,
                    })
                    .await?;
                println!(
                    "created product {} ({}% APY, {} days) in PENDING state",
                    product.code, product.apy, product.duration_days
                );
            }

            ProductAction::LaunchRequest { code } => {
                let product = monera_persistence::WealthProductRepo::get_by_code(db.pool(), &code)
                    .await?;
                let workflow = ApprovalWorkflow::new(db.pool().clone(), config);
                let request = workflow.submit_product_launch(product.id).await?;
                println!("filed launch request {} for product {code}", request.request_no);
            }

            ProductAction::Decide {
                request_no,
                role,
                reviewer,
                reject,
                comment,
            } => {
                let workflow = ApprovalWorkflow::new(db.pool().clone(), config);
                let request = workflow
                    .decide(
                        &request_no,
                        role.to_core_type(),
                        &reviewer,
                        !reject,
                        comment.as_deref(),
                    )
                    .await?;
                println!("request {} is now {}", request.request_no, request.state);
            }
        },

        Commands::Account { action } => match action {
            AccountAction::Show { user, r#type, asset } => {
                let account =
                    AccountRepo::find_for_owner(db.pool(), &user, r#type.to_core_type(), &asset)
                        .await?;
                match account {
                    Some(account) => {
                        let store = monera_engine::AccountStore::new(db.pool().clone(), config);
                        let replayed = store.replay(account.id).await?;
                        println!(
                            "account {} ({user}/{}/{asset}): balance {} frozen {} version {}",
                            account.id, account.account_type, account.balance, account.frozen_balance,
                            account.version
                        );
                        println!(
                            "journal replay: available {} frozen {} consistent {}",
                            replayed.available, replayed.frozen, replayed.snapshots_consistent
                        );
                    }
                    None => println!("no {}-{asset} account for {user}", r#type.to_core_type()),
                }
            }

            AccountAction::List => {
                let accounts = AccountRepo::list_all(db.pool()).await?;
                for account in accounts {
                    println!(
                        "{}\t{}\t{}\t{}\tbalance {}\tfrozen {}",
                        account.id,
                        account.user_id,
                        account.account_type,
                        account.asset,
                        account.balance,
                        account.frozen_balance
                    );
                }
            }
        },
    }

    Ok(())
}

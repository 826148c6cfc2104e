//! Engine configuration with configurable policy parameters
//!
//! Retry bounds, the reconciliation epsilon, interest day-count and scale,
//! and the APY tiers live here so operations can tune them without
//! recompilation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reserved owner id for the system deposit account, the double-entry
/// counterparty for observed external deposits.
pub const DEPOSIT_USER: &str = "SYSTEM_DEPOSIT";

/// Reserved owner id for the interest reserve that funds interest payouts.
pub const INTEREST_RESERVE_USER: &str = "SYSTEM_INTEREST";

/// Owner-id prefix marking system accounts, which mirror external value and
/// are the only accounts allowed to hold a negative balance.
pub const SYSTEM_USER_PREFIX: &str = "SYSTEM";

/// Configuration for the ledger engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per operation before a version conflict is surfaced
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Base backoff between retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Largest tolerated journal-vs-balance difference before alerting
    #[serde(default)]
    pub reconciliation_epsilon: Decimal,

    /// Lifetime of a PROCESSING idempotency record
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: i64,

    /// Day-count basis for simple daily interest
    #[serde(default = "default_interest_basis_days")]
    pub interest_basis_days: u32,

    /// Decimal places interest amounts are rounded to
    #[serde(default = "default_interest_scale")]
    pub interest_scale: u32,

    /// Flat fee estimate frozen together with the withdrawal amount
    #[serde(default = "default_withdrawal_fee")]
    pub default_withdrawal_fee: Decimal,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    20
}

fn default_idempotency_ttl_secs() -> i64 {
    600
}

fn default_interest_basis_days() -> u32 {
    365
}

fn default_interest_scale() -> u32 {
    8
}

fn default_withdrawal_fee() -> Decimal {
    Decimal::new(5, 0)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            reconciliation_epsilon: Decimal::ZERO,
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            interest_basis_days: default_interest_basis_days(),
            interest_scale: default_interest_scale(),
            default_withdrawal_fee: default_withdrawal_fee(),
        }
    }
}

impl EngineConfig {
    /// Whether an account owner is a system account.
    pub fn is_system_user(user_id: &str) -> bool {
        user_id.starts_with(SYSTEM_USER_PREFIX)
    }
}

/// Annualized rate offered for an asset and term, in percent.
///
/// Base rates per asset with a multiplier for longer commitments.
pub fn apy_for(asset: &str, duration_days: u32) -> Decimal {
    let base = match asset {
        "BTC" => Decimal::new(45, 1),
        "ETH" => Decimal::new(52, 1),
        "USDT" => Decimal::new(85, 1),
        "USDC" => Decimal::new(82, 1),
        "SOL" => Decimal::new(68, 1),
        _ => Decimal::new(50, 1),
    };

    let multiplier = if duration_days >= 360 {
        Decimal::new(15, 1)
    } else if duration_days >= 180 {
        Decimal::new(125, 2)
    } else if duration_days >= 90 {
        Decimal::new(11, 1)
    } else {
        Decimal::ONE
    };

    base * multiplier
}

//! Monera core - shared domain types for the ledger engine
//!
//! # Key Types
//! - `Amount`: non-negative decimal used for every operation input
//! - `AccountType`: FUND (general wallet) or WEALTH (product holdings)
//! - `BizType`: journal tag for every balance-affecting event
//! - Status enums for transfers, withdrawals, wealth orders and approvals

pub mod amount;
pub mod error;
pub mod status;
pub mod types;

pub use amount::Amount;
pub use error::CoreError;
pub use status::{
    ApprovalState, FreezeReleaseKind, IdempotencyStatus, InterestRecordType, RedemptionType,
    ReviewerRole, TransferStatus, WealthOrderStatus, WealthProductStatus, WithdrawalStatus,
};
pub use types::{AccountType, BizType};

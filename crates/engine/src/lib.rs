//! # Monera Engine
//!
//! The ledger and account-balance engine behind the Monera banking backend:
//! double-entry transfers, fixed-term wealth products with daily interest
//! accrual, exactly-once withdrawals to external addresses, and a
//! reconciliation sweep that proves stored balances against the journal.
//!
//! ## Components
//! - [`IdempotencyGuard`] - deduplicates retried client requests
//! - [`AccountStore`] - balances under optimistic versioning, journal append
//! - [`TransferEngine`] - atomic two-account moves
//! - [`WealthEngine`] - subscription, daily accrual, redemption, auto-renew
//! - [`WithdrawalEngine`] - freeze / send / confirm-or-fail state machine
//! - [`ReconciliationMonitor`] - read-only journal and custody verification
//! - [`ApprovalWorkflow`] - Finance -> Risk -> Admin sign-off
//!
//! All mutating entry points honor the operator-settable business freeze
//! flag ([`FreezeGuard`]) and retry optimistic-lock conflicts with bounded
//! exponential backoff before surfacing [`EngineError::TransientConflict`].

pub mod account;
pub mod approval;
pub mod config;
pub mod error;
pub mod freeze;
pub mod idempotency;
pub mod reconciliation;
pub mod transfer;
pub mod wealth;
pub mod withdrawal;

pub use account::{AccountStore, BalanceChange, ReplayedJournal};
pub use approval::{
    ApprovalWorkflow, ManualAdjustment, SUBJECT_MANUAL_ADJUSTMENT, SUBJECT_PRODUCT_LAUNCH,
};
pub use config::{apy_for, EngineConfig, DEPOSIT_USER, INTEREST_RESERVE_USER};
pub use error::{EngineError, EngineResult};
pub use freeze::{FreezeGuard, BUSINESS_FREEZE_FLAG};
pub use idempotency::{BeginOutcome, IdempotencyGuard};
pub use reconciliation::{ReconciliationMonitor, ReconciliationReport};
pub use transfer::TransferEngine;
pub use wealth::{AccrualSummary, MaturitySummary, WealthEngine};
pub use withdrawal::{
    CustodyProvider, ProviderWithdrawalStatus, SweepSummary, WithdrawalEngine,
};

//! SQLite persistence module
//!
//! Repository pattern for SQLite database access.

pub mod repos;
pub mod schema;

pub use repos::{
    create_pool, init_database, run_migrations, AccountRepo, AddressRepo, ApprovalRepo,
    FreezeLogRepo, IdempotencyRepo, InterestRecordRepo, JournalRepo, NewJournalEntry,
    NewWealthOrder, NewWealthProduct, NewWithdrawal, ReconciliationRepo, SystemFlagRepo,
    TransferRepo, WealthOrderRepo, WealthProductRepo, WithdrawalRepo,
};
pub use schema::{
    AccountRow, AddressRow, AlertLogRow, ApprovalDecisionRow, ApprovalRequestRow, FreezeLogRow,
    IdempotencyRow, InterestRecordRow, JournalRow, ManualReviewRow, ReconciliationLogRow,
    SystemFlagRow, TransferRow, WealthOrderRow, WealthProductRow, WithdrawalRow,
};

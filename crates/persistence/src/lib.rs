//! # Monera Persistence
//!
//! SQLite persistence for the ledger engine: account balances, the
//! append-only journal, idempotency records, wealth/withdrawal orders and
//! the reconciliation output tables.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use monera_persistence::{AccountRepo, Database};
//!
//! let db = Database::connect("sqlite:monera.db").await?;
//! let accounts = AccountRepo::list_all(db.pool()).await?;
//! ```

pub mod error;
pub mod sqlite;

pub use error::{PersistenceError, PersistenceResult};
pub use sqlite::{
    create_pool, init_database, run_migrations, AccountRepo, AccountRow, AddressRepo, AddressRow,
    AlertLogRow, ApprovalDecisionRow, ApprovalRepo, ApprovalRequestRow, FreezeLogRepo,
    FreezeLogRow, IdempotencyRepo, IdempotencyRow, InterestRecordRepo, InterestRecordRow,
    JournalRepo, JournalRow, ManualReviewRow, NewJournalEntry, NewWealthOrder, NewWealthProduct,
    NewWithdrawal, ReconciliationLogRow, ReconciliationRepo, SystemFlagRepo, SystemFlagRow,
    TransferRepo, TransferRow, WealthOrderRepo, WealthOrderRow, WealthProductRepo,
    WealthProductRow, WithdrawalRepo, WithdrawalRow,
};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Database facade around the connection pool.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) and migrate a database.
    pub async fn connect(database_url: &str) -> PersistenceResult<Self> {
        let pool = init_database(database_url).await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory database, used by tests and dry runs.
    ///
    /// Every pooled `:memory:` connection is its own database, so the pool
    /// is pinned to a single connection that never expires.
    pub async fn in_memory() -> PersistenceResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

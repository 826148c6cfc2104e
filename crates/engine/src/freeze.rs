//! Global business freeze flag
//!
//! A single operator-settable flag, read transactionally by every mutating
//! operation. Stored in `system_flags` so every node sees the same value;
//! the engine only honors the flag, the decision to set it is operational.

use chrono::Utc;
use monera_persistence::SystemFlagRepo;
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Name of the freeze flag in `system_flags`.
pub const BUSINESS_FREEZE_FLAG: &str = "BUSINESS_FREEZE";

const FROZEN_VALUE: &str = "1";

/// Reads and writes the business freeze flag.
#[derive(Clone)]
pub struct FreezeGuard {
    pool: SqlitePool,
}

impl FreezeGuard {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the flag is currently set.
    pub async fn is_frozen(&self) -> EngineResult<bool> {
        let flag = SystemFlagRepo::get(&self.pool, BUSINESS_FREEZE_FLAG).await?;
        Ok(flag.map(|f| f.value == FROZEN_VALUE).unwrap_or(false))
    }

    /// Reject new mutating operations while the flag is set.
    pub async fn ensure_unfrozen(&self) -> EngineResult<()> {
        if self.is_frozen().await? {
            warn!("operation rejected: business freeze flag is set");
            return Err(EngineError::BusinessFrozen);
        }
        Ok(())
    }

    /// Operator action: halt new transfers, withdrawals and subscriptions.
    pub async fn set(&self, operator: &str) -> EngineResult<()> {
        SystemFlagRepo::upsert(&self.pool, BUSINESS_FREEZE_FLAG, FROZEN_VALUE, operator, Utc::now())
            .await?;
        warn!(operator, "business freeze flag set");
        Ok(())
    }

    /// Operator action: resume normal operation.
    pub async fn clear(&self, operator: &str) -> EngineResult<()> {
        SystemFlagRepo::upsert(&self.pool, BUSINESS_FREEZE_FLAG, "0", operator, Utc::now())
            .await?;
        Ok(())
    }
}

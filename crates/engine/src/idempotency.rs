//! Idempotency guard
//!
//! Deduplicates client-submitted mutating requests by
//! (user, request id, business type). The unique primary key on
//! `idempotency_records` is the single mutual-exclusion point across
//! retries of one logical request; it does not serialize unrelated
//! requests.

use chrono::{Duration, Utc};
use monera_core::IdempotencyStatus;
use monera_persistence::IdempotencyRepo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// What `begin` found for an idempotency key.
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// No record existed; a PROCESSING row is now held by this caller.
    Fresh,
    /// Another caller holds the PROCESSING row; retry later.
    InProgress,
    /// The request already ran; the cached result is returned verbatim.
    Completed(Value),
}

/// Guard over the `idempotency_records` table.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: SqlitePool,
    config: EngineConfig,
}

impl IdempotencyGuard {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Claim the key or report what happened to it before.
    ///
    /// An insert conflict is the only expected race and resolves to the
    /// concurrent winner's state, never to an error. Expired PROCESSING
    /// rows stay `InProgress` here; only [`sweep_expired`](Self::sweep_expired)
    /// reclaims them, so two callers cannot race the same reclaim.
    pub async fn begin(
        &self,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
    ) -> EngineResult<BeginOutcome> {
        let now = Utc::now();
        let ttl = now + Duration::seconds(self.config.idempotency_ttl_secs);

        // Two passes: a lost insert or restart race falls through to a
        // re-read of the winner's row.
        for _ in 0..2 {
            match IdempotencyRepo::get(&self.pool, user_id, request_id, biz_type).await? {
                None => {
                    match IdempotencyRepo::insert_processing(
                        &self.pool, user_id, request_id, biz_type, ttl, now,
                    )
                    .await
                    {
                        Ok(()) => return Ok(BeginOutcome::Fresh),
                        Err(err) if err.is_already_exists() => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(row) => match row.status()? {
                    IdempotencyStatus::Processing => return Ok(BeginOutcome::InProgress),
                    IdempotencyStatus::Completed => {
                        let cached = match row.result_data.as_deref() {
                            Some(data) => serde_json::from_str(data)?,
                            None => Value::Null,
                        };
                        return Ok(BeginOutcome::Completed(cached));
                    }
                    IdempotencyStatus::Failed => {
                        let reclaimed = IdempotencyRepo::restart_failed(
                            &self.pool, user_id, request_id, biz_type, ttl, now,
                        )
                        .await?;
                        if reclaimed {
                            return Ok(BeginOutcome::Fresh);
                        }
                        continue;
                    }
                },
            }
        }

        Ok(BeginOutcome::InProgress)
    }

    /// Cache the result of a finished request.
    pub async fn complete(
        &self,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        result: &Value,
    ) -> EngineResult<()> {
        let stored = IdempotencyRepo::mark_completed(
            &self.pool,
            user_id,
            request_id,
            biz_type,
            &serde_json::to_string(result)?,
            Utc::now(),
        )
        .await?;
        if !stored {
            warn!(user_id, request_id, biz_type, "complete() found no PROCESSING record");
        }
        Ok(())
    }

    /// Release the key after a failed request so the client may retry.
    pub async fn fail(&self, user_id: &str, request_id: &str, biz_type: &str) -> EngineResult<()> {
        let stored =
            IdempotencyRepo::mark_failed(&self.pool, user_id, request_id, biz_type, Utc::now())
                .await?;
        if !stored {
            warn!(user_id, request_id, biz_type, "fail() found no PROCESSING record");
        }
        Ok(())
    }

    /// Run an operation under the key: cached results short-circuit,
    /// in-progress duplicates are rejected, and the PROCESSING row is
    /// settled either way.
    pub async fn execute<T, F, Fut>(
        &self,
        user_id: &str,
        request_id: &str,
        biz_type: &str,
        op: F,
    ) -> EngineResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        match self.begin(user_id, request_id, biz_type).await? {
            BeginOutcome::Completed(cached) => Ok(serde_json::from_value(cached)?),
            BeginOutcome::InProgress => Err(EngineError::RequestInProgress),
            BeginOutcome::Fresh => match op().await {
                Ok(result) => {
                    self.complete(user_id, request_id, biz_type, &serde_json::to_value(&result)?)
                        .await?;
                    Ok(result)
                }
                Err(err) => {
                    self.fail(user_id, request_id, biz_type).await?;
                    Err(err)
                }
            },
        }
    }

    /// Mark abandoned PROCESSING rows FAILED once their TTL passed.
    pub async fn sweep_expired(&self) -> EngineResult<u64> {
        let swept = IdempotencyRepo::sweep_expired(&self.pool, Utc::now()).await?;
        if swept > 0 {
            warn!(swept, "reclaimed expired idempotency records");
        }
        Ok(swept)
    }
}

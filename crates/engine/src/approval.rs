//! Approval workflow - staged Finance -> Risk -> Admin sign-off
//!
//! Product launches and manual account adjustments only take effect after
//! all three roles approved, in order. Every reviewer decision is an
//! immutable append; any rejection is terminal. The final approval applies
//! the subject action in the same transaction that closes the request.

use chrono::Utc;
use monera_core::{AccountType, ApprovalState, BizType, ReviewerRole, WealthProductStatus};
use monera_persistence::{
    ApprovalDecisionRow, ApprovalRepo, ApprovalRequestRow, PersistenceError, WealthProductRepo,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::account::{AccountStore, BalanceChange};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Subject type for opening a PENDING wealth product.
pub const SUBJECT_PRODUCT_LAUNCH: &str = "WEALTH_PRODUCT_LAUNCH";

/// Subject type for an operator balance adjustment.
pub const SUBJECT_MANUAL_ADJUSTMENT: &str = "MANUAL_ADJUSTMENT";

/// Payload of a manual adjustment request.
///
/// `delta` is signed; debits fail closed against the account balance like
/// any other operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAdjustment {
    pub user_id: String,
    pub account_type: AccountType,
    pub asset: String,
    pub delta: Decimal,
    pub reason: String,
}

/// Staged multi-role sign-off over gated operations.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    pool: SqlitePool,
    accounts: AccountStore,
}

impl ApprovalWorkflow {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        let accounts = AccountStore::new(pool.clone(), config);
        Self { pool, accounts }
    }

    /// File a launch request for a PENDING product.
    pub async fn submit_product_launch(&self, product_id: i64) -> EngineResult<ApprovalRequestRow> {
        let product = WealthProductRepo::get_by_id(&self.pool, product_id).await?;
        if product.status()? != WealthProductStatus::Pending {
            return Err(EngineError::invalid_transition(
                "WealthProduct",
                product.status()?,
                WealthProductStatus::Open,
            ));
        }

        let payload = serde_json::json!({ "product_id": product_id, "code": product.code });
        self.submit(SUBJECT_PRODUCT_LAUNCH, &product_id.to_string(), &payload.to_string())
            .await
    }

    /// File a manual balance adjustment for review.
    pub async fn submit_manual_adjustment(
        &self,
        adjustment: &ManualAdjustment,
    ) -> EngineResult<ApprovalRequestRow> {
        if adjustment.delta.is_zero() {
            return Err(EngineError::validation("adjustment delta cannot be zero"));
        }
        // Resolve (and lazily create) the target account up front so the
        // request always points at a real subject.
        let account = self
            .accounts
            .get_or_create(&adjustment.user_id, adjustment.account_type, &adjustment.asset)
            .await?;

        self.submit(
            SUBJECT_MANUAL_ADJUSTMENT,
            &account.id.to_string(),
            &serde_json::to_string(adjustment)?,
        )
        .await
    }

    async fn submit(
        &self,
        subject_type: &str,
        subject_id: &str,
        payload: &str,
    ) -> EngineResult<ApprovalRequestRow> {
        let request_no = format!("APR-{}", Uuid::new_v4());
        let id = ApprovalRepo::insert_request(
            &self.pool,
            &request_no,
            subject_type,
            subject_id,
            payload,
            Utc::now(),
        )
        .await?;
        info!(request_no = %request_no, subject_type, subject_id, "approval request filed");
        Ok(ApprovalRepo::get_request(&self.pool, id).await?)
    }

    pub async fn get(&self, request_no: &str) -> EngineResult<ApprovalRequestRow> {
        Ok(ApprovalRepo::get_by_request_no(&self.pool, request_no).await?)
    }

    pub async fn list_pending(&self) -> EngineResult<Vec<ApprovalRequestRow>> {
        Ok(ApprovalRepo::list_pending(&self.pool).await?)
    }

    pub async fn decisions(&self, request_no: &str) -> EngineResult<Vec<ApprovalDecisionRow>> {
        let request = self.get(request_no).await?;
        Ok(ApprovalRepo::list_decisions(&self.pool, request.id).await?)
    }

    /// Record one reviewer decision.
    ///
    /// The role must match the request's current step (Finance, then Risk,
    /// then Admin); out-of-order or repeated decisions are rejected. A
    /// rejection closes the request; the Admin approval closes it and
    /// applies the subject action atomically.
    #[instrument(skip(self, comment))]
    pub async fn decide(
        &self,
        request_no: &str,
        role: ReviewerRole,
        reviewer_id: &str,
        approve: bool,
        comment: Option<&str>,
    ) -> EngineResult<ApprovalRequestRow> {
        let request = self.get(request_no).await?;
        let state = request.state()?;
        if state.is_terminal() {
            return Err(EngineError::invalid_transition(
                "ApprovalRequest",
                state,
                format!("{role} decision"),
            ));
        }
        if i64::from(role.step()) != request.current_step {
            return Err(EngineError::invalid_transition(
                "ApprovalRequest",
                format!("step {}", request.current_step),
                format!("{role} decision"),
            ));
        }

        // Pre-resolve what the final approval will touch; nothing here
        // mutates yet.
        let adjustment = if approve
            && role == ReviewerRole::Admin
            && request.subject_type == SUBJECT_MANUAL_ADJUSTMENT
        {
            let adjustment: ManualAdjustment = serde_json::from_str(&request.payload)?;
            let account = self
                .accounts
                .get_or_create(&adjustment.user_id, adjustment.account_type, &adjustment.asset)
                .await?;
            Some((adjustment, account.id))
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        ApprovalRepo::insert_decision(
            &mut *tx,
            request.id,
            request.current_step,
            role,
            reviewer_id,
            approve,
            comment,
            now,
        )
        .await
        .map_err(|err| match err {
            PersistenceError::AlreadyExists { .. } => EngineError::invalid_transition(
                "ApprovalRequest",
                format!("step {} already decided", request.current_step),
                format!("{role} decision"),
            ),
            other => other.into(),
        })?;

        let (new_state, new_step) = if !approve {
            (ApprovalState::Rejected, request.current_step)
        } else {
            match role.next() {
                Some(next) => (ApprovalState::Pending, i64::from(next.step())),
                None => (ApprovalState::Approved, request.current_step),
            }
        };
        let advanced = ApprovalRepo::advance(
            &mut *tx,
            request.id,
            new_state,
            new_step,
            request.current_step,
            now,
        )
        .await?;
        if !advanced {
            return Err(EngineError::TransientConflict);
        }

        if new_state == ApprovalState::Approved {
            self.apply_subject(&mut tx, &request, adjustment, reviewer_id)
                .await?;
        }

        tx.commit().await?;

        info!(
            request_no = %request.request_no,
            %role,
            approve,
            state = %new_state,
            "approval decision recorded"
        );
        Ok(ApprovalRepo::get_request(&self.pool, request.id).await?)
    }

    /// Carry out the approved action inside the closing transaction.
    async fn apply_subject(
        &self,
        conn: &mut SqliteConnection,
        request: &ApprovalRequestRow,
        adjustment: Option<(ManualAdjustment, i64)>,
        reviewer_id: &str,
    ) -> EngineResult<()> {
        match request.subject_type.as_str() {
            SUBJECT_PRODUCT_LAUNCH => {
                let product_id: i64 = request
                    .subject_id
                    .parse()
                    .map_err(|_| EngineError::validation("bad product id in approval subject"))?;
                WealthProductRepo::set_status(&mut *conn, product_id, WealthProductStatus::Open)
                    .await?;
                info!(product_id, "wealth product opened by approval");
                Ok(())
            }
            SUBJECT_MANUAL_ADJUSTMENT => {
                let (adjustment, account_id) = adjustment
                    .ok_or_else(|| EngineError::validation("adjustment payload not resolved"))?;
                let mut change = if adjustment.delta >= Decimal::ZERO {
                    BalanceChange::credit(account_id, adjustment.delta, BizType::Adjustment)
                } else {
                    BalanceChange::debit(account_id, -adjustment.delta, BizType::Adjustment)
                }
                .with_ref(request.request_no.clone())
                .with_remark(format!("{} (approved by {})", adjustment.reason, reviewer_id));
                if EngineConfig::is_system_user(&adjustment.user_id) {
                    change = change.allowing_negative();
                }
                AccountStore::apply(conn, &change, Utc::now()).await?;
                Ok(())
            }
            other => Err(EngineError::validation(format!(
                "unknown approval subject type: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wealth::WealthEngine;
    use monera_persistence::{Database, JournalRepo, NewWealthProduct};
    use rust_decimal_macros::dec;

    async fn setup() -> (Database, ApprovalWorkflow, WealthEngine) {
        let db = Database::in_memory().await.unwrap();
        let workflow = ApprovalWorkflow::new(db.pool().clone(), EngineConfig::default());
        let wealth = WealthEngine::new(db.pool().clone(), EngineConfig::default());
        (db, workflow, wealth)
    }

    fn pending_product(code: &str) -> NewWealthProduct {
        NewWealthProduct {
            code: code.to_string(),
            name: "USDT 90-day".to_string(),
            asset: "USDT".to_string(),
            apy: dec!(8.00),
            duration_days: 90,
            min_amount: dec!(100),
            max_amount: dec!(50000),
            total_quota: dec!(100000),
            early_redeem_allowed: false,
            early_redeem_penalty: dec!(0),
            status: WealthProductStatus::Pending,
        }
    }

    #[tokio::test]
    async fn full_chain_opens_the_product() {
        let (db, workflow, wealth) = setup().await;
        let product = wealth.create_product(pending_product("P1")).await.unwrap();

        let request = workflow.submit_product_launch(product.id).await.unwrap();
        workflow
            .decide(&request.request_no, ReviewerRole::Finance, "fin-1", true, None)
            .await
            .unwrap();
        workflow
            .decide(&request.request_no, ReviewerRole::Risk, "risk-1", true, None)
            .await
            .unwrap();
        let closed = workflow
            .decide(&request.request_no, ReviewerRole::Admin, "adm-1", true, Some("ok"))
            .await
            .unwrap();
        assert_eq!(closed.state().unwrap(), ApprovalState::Approved);

        let product = WealthProductRepo::get_by_id(db.pool(), product.id).await.unwrap();
        assert_eq!(product.status().unwrap(), WealthProductStatus::Open);

        let decisions = workflow.decisions(&request.request_no).await.unwrap();
        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[0].role().unwrap(), ReviewerRole::Finance);
        assert_eq!(decisions[2].role().unwrap(), ReviewerRole::Admin);
    }

    #[tokio::test]
    async fn out_of_order_and_duplicate_decisions_are_rejected() {
        let (_db, workflow, wealth) = setup().await;
        let product = wealth.create_product(pending_product("P1")).await.unwrap();
        let request = workflow.submit_product_launch(product.id).await.unwrap();

        // Risk cannot sign before Finance.
        assert!(matches!(
            workflow
                .decide(&request.request_no, ReviewerRole::Risk, "risk-1", true, None)
                .await,
            Err(EngineError::InvalidStateTransition { .. })
        ));

        workflow
            .decide(&request.request_no, ReviewerRole::Finance, "fin-1", true, None)
            .await
            .unwrap();

        // Finance cannot sign its step twice.
        assert!(matches!(
            workflow
                .decide(&request.request_no, ReviewerRole::Finance, "fin-2", true, None)
                .await,
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_leaves_product_pending() {
        let (db, workflow, wealth) = setup().await;
        let product = wealth.create_product(pending_product("P1")).await.unwrap();
        let request = workflow.submit_product_launch(product.id).await.unwrap();

        workflow
            .decide(&request.request_no, ReviewerRole::Finance, "fin-1", true, None)
            .await
            .unwrap();
        let rejected = workflow
            .decide(&request.request_no, ReviewerRole::Risk, "risk-1", false, Some("too risky"))
            .await
            .unwrap();
        assert_eq!(rejected.state().unwrap(), ApprovalState::Rejected);

        // No further decisions accepted.
        assert!(matches!(
            workflow
                .decide(&request.request_no, ReviewerRole::Admin, "adm-1", true, None)
                .await,
            Err(EngineError::InvalidStateTransition { .. })
        ));

        let product = WealthProductRepo::get_by_id(db.pool(), product.id).await.unwrap();
        assert_eq!(product.status().unwrap(), WealthProductStatus::Pending);
    }

    #[tokio::test]
    async fn approved_adjustment_moves_balance_with_journal_entry() {
        let (db, workflow, _wealth) = setup().await;
        let adjustment = ManualAdjustment {
            user_id: "alice".to_string(),
            account_type: AccountType::Fund,
            asset: "USDT".to_string(),
            delta: dec!(250),
            reason: "support credit".to_string(),
        };
        let request = workflow.submit_manual_adjustment(&adjustment).await.unwrap();

        // Nothing moves until the chain completes.
        for (role, reviewer) in [(ReviewerRole::Finance, "fin-1"), (ReviewerRole::Risk, "risk-1")] {
            workflow
                .decide(&request.request_no, role, reviewer, true, None)
                .await
                .unwrap();
            let account = workflow
                .accounts
                .get_or_create("alice", AccountType::Fund, "USDT")
                .await
                .unwrap();
            assert_eq!(account.balance().unwrap(), dec!(0));
        }

        workflow
            .decide(&request.request_no, ReviewerRole::Admin, "adm-1", true, None)
            .await
            .unwrap();

        let account = workflow
            .accounts
            .get_or_create("alice", AccountType::Fund, "USDT")
            .await
            .unwrap();
        assert_eq!(account.balance().unwrap(), dec!(250));

        let entries = JournalRepo::list_by_ref(db.pool(), &request.request_no)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].biz_type().unwrap(), BizType::Adjustment);
    }

    #[tokio::test]
    async fn debit_adjustment_fails_closed_and_rolls_back_approval() {
        let (_db, workflow, _wealth) = setup().await;
        let adjustment = ManualAdjustment {
            user_id: "alice".to_string(),
            account_type: AccountType::Fund,
            asset: "USDT".to_string(),
            delta: dec!(-100),
            reason: "clawback".to_string(),
        };
        let request = workflow.submit_manual_adjustment(&adjustment).await.unwrap();

        workflow
            .decide(&request.request_no, ReviewerRole::Finance, "fin-1", true, None)
            .await
            .unwrap();
        workflow
            .decide(&request.request_no, ReviewerRole::Risk, "risk-1", true, None)
            .await
            .unwrap();

        // The account is empty: the final step fails and the request stays
        // decidable once funds exist.
        let err = workflow
            .decide(&request.request_no, ReviewerRole::Admin, "adm-1", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let request = workflow.get(&request.request_no).await.unwrap();
        assert_eq!(request.state().unwrap(), ApprovalState::Pending);
        assert_eq!(request.current_step, 3);
    }

    #[tokio::test]
    async fn launch_request_requires_pending_product() {
        let (_db, workflow, wealth) = setup().await;
        let mut spec = pending_product("P1");
        spec.status = WealthProductStatus::Open;
        let product = wealth.create_product(spec).await.unwrap();

        assert!(matches!(
            workflow.submit_product_launch(product.id).await,
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }
}

//! Wealth product engine - subscription, daily accrual, redemption
//!
//! A subscription moves principal from the user's FUND account into their
//! WEALTH account and books an ACTIVE order against the product quota.
//! Interest accrues order by order, one calendar day per transaction, under
//! the order's optimistic version; the (order, type, date) unique key on
//! `wealth_interest_records` backs the version guard up. Redemption returns
//! principal from the WEALTH account and pays unpaid interest out of the
//! system interest reserve.

use chrono::{Days, NaiveDate, Utc};
use monera_core::{AccountType, Amount, BizType, RedemptionType, WealthOrderStatus};
use monera_persistence::{
    InterestRecordRepo, NewWealthOrder, NewWealthProduct, WealthOrderRepo, WealthOrderRow,
    WealthProductRepo, WealthProductRow,
};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::account::{with_retries, AccountStore};
use crate::config::{EngineConfig, INTEREST_RESERVE_USER};
use crate::error::{EngineError, EngineResult};
use crate::freeze::FreezeGuard;
use crate::transfer::{TransferEngine, TransferSpec};

/// Record type codes in `wealth_interest_records`.
const RECORD_ACCRUE: &str = "ACCRUE";
const RECORD_PAY: &str = "PAY";

/// Outcome of one accrual sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccrualSummary {
    pub orders_processed: usize,
    pub days_accrued: u64,
    pub orders_failed: usize,
}

/// Outcome of one maturity sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaturitySummary {
    pub renewed: usize,
    pub redeemed: usize,
    pub orders_failed: usize,
}

/// Subscription, accrual and redemption over wealth products.
#[derive(Clone)]
pub struct WealthEngine {
    pool: SqlitePool,
    config: EngineConfig,
    accounts: AccountStore,
    freeze: FreezeGuard,
}

impl WealthEngine {
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        let accounts = AccountStore::new(pool.clone(), config.clone());
        let freeze = FreezeGuard::new(pool.clone());
        Self {
            pool,
            config,
            accounts,
            freeze,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    /// Validate and store a product definition.
    ///
    /// Operator tooling creates products PENDING and opens them through the
    /// approval workflow.
    pub async fn create_product(&self, product: NewWealthProduct) -> EngineResult<WealthProductRow> {
        if product.min_amount <= Decimal::ZERO || product.max_amount < product.min_amount {
            return Err(EngineError::validation(
                "product requires 0 < min_amount <= max_amount",
            ));
        }
        if product.total_quota <= Decimal::ZERO {
            return Err(EngineError::validation("product quota must be positive"));
        }
        if product.early_redeem_penalty < Decimal::ZERO || product.early_redeem_penalty > Decimal::ONE
        {
            return Err(EngineError::validation(
                "early redemption penalty must lie in [0, 1]",
            ));
        }
        if product.duration_days <= 0 {
            return Err(EngineError::validation("product duration must be positive"));
        }

        let id = WealthProductRepo::insert(&self.pool, &product, Utc::now()).await?;
        info!(product_id = id, code = %product.code, "wealth product created");
        Ok(WealthProductRepo::get_by_id(&self.pool, id).await?)
    }

    /// Subscribe `amount` of the user's FUND balance to a product.
    ///
    /// The quota bump, the FUND -> WEALTH move and the ACTIVE order land in
    /// one transaction; a lost quota or balance race rolls the whole
    /// subscription back and retries.
    #[instrument(skip(self), fields(%amount))]
    pub async fn subscribe(
        &self,
        user_id: &str,
        product_id: i64,
        amount: Decimal,
        auto_renew: bool,
        start_date: NaiveDate,
    ) -> EngineResult<WealthOrderRow> {
        let amount = Amount::positive(amount)?.value();
        self.freeze.ensure_unfrozen().await?;

        let product = WealthProductRepo::get_by_id(&self.pool, product_id).await?;
        if !product.status()?.accepts_subscriptions() {
            return Err(EngineError::validation(format!(
                "product {} is not open for subscription ({})",
                product.code, product.status
            )));
        }
        if amount < product.min_amount()? || amount > product.max_amount()? {
            return Err(EngineError::validation(format!(
                "amount {} outside product bounds [{}, {}]",
                amount, product.min_amount, product.max_amount
            )));
        }

        let fund = self
            .accounts
            .get_or_create(user_id, AccountType::Fund, &product.asset)
            .await?;
        let wealth = self
            .accounts
            .get_or_create(user_id, AccountType::Wealth, &product.asset)
            .await?;

        let order_no = format!("WO-{}", Uuid::new_v4());
        let end_date = start_date
            .checked_add_days(Days::new(product.duration_days as u64))
            .ok_or_else(|| EngineError::validation("order end date out of range"))?;

        let order = NewWealthOrder {
            order_no: order_no.clone(),
            user_id: user_id.to_string(),
            product_id,
            amount,
            start_date,
            end_date,
            auto_renew,
            renewed_from_order_id: None,
        };

        let order_ref = &order;
        let (fund_id, wealth_id) = (fund.id, wealth.id);
        with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            // Quota is claimed by compare-and-swap inside the transaction;
            // the loser of the race re-reads and re-checks remaining quota.
            let current = WealthProductRepo::get_by_id(&mut *tx, product_id).await?;
            let sold = current.sold_quota()?;
            let remaining = current.total_quota()? - sold;
            if amount > remaining {
                return Err(EngineError::QuotaExceeded {
                    requested: amount,
                    remaining,
                });
            }
            if !WealthProductRepo::cas_sold_quota(&mut *tx, product_id, sold, sold + amount).await? {
                return Err(EngineError::VersionConflict);
            }

            let spec = TransferSpec {
                transfer_id: Uuid::new_v4().to_string(),
                from_account_id: fund_id,
                to_account_id: wealth_id,
                amount,
                biz_type: BizType::WealthSubscribe,
                ref_id: Some(order_ref.order_no.clone()),
                allow_negative_from: false,
            };
            TransferEngine::execute(&mut tx, &spec, now).await?;

            WealthOrderRepo::insert(&mut *tx, order_ref, now).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(order_no = %order_no, product_id, "wealth subscription created");
        Ok(WealthOrderRepo::get_by_order_no(&self.pool, &order_no).await?)
    }

    /// Daily accrual sweep: bring every ACTIVE order forward to `as_of`.
    ///
    /// Each order runs in its own transactions, so one failing order stalls
    /// only itself and is picked up again on the next run.
    pub async fn accrue_daily(&self, as_of: NaiveDate) -> EngineResult<AccrualSummary> {
        let orders = WealthOrderRepo::list_accruable(&self.pool, as_of).await?;
        let mut summary = AccrualSummary::default();

        for order in orders {
            match self.accrue_order(order.id, as_of).await {
                Ok(days) => {
                    summary.orders_processed += 1;
                    summary.days_accrued += days;
                }
                Err(err) => {
                    warn!(order_id = order.id, %err, "accrual skipped order");
                    summary.orders_failed += 1;
                }
            }
        }

        info!(
            orders = summary.orders_processed,
            days = summary.days_accrued,
            failed = summary.orders_failed,
            "daily accrual sweep finished"
        );
        Ok(summary)
    }

    /// Accrue one order day by day up to `as_of` (capped at its end date).
    ///
    /// Running the job twice on the same day accrues nothing the second
    /// time: each day moves `last_interest_date` forward under the order's
    /// version, and a date can only be passed once.
    pub async fn accrue_order(&self, order_id: i64, as_of: NaiveDate) -> EngineResult<u64> {
        let mut days: u64 = 0;
        loop {
            let accrued = with_retries(&self.config, || async move {
                self.accrue_next_day(order_id, as_of).await
            })
            .await?;
            if !accrued {
                return Ok(days);
            }
            days += 1;
        }
    }

    /// Book interest for the single next unaccrued day, if any.
    async fn accrue_next_day(&self, order_id: i64, as_of: NaiveDate) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let order = WealthOrderRepo::get_by_id(&mut *tx, order_id).await?;
        if !order.status()?.accrues() {
            return Ok(false);
        }
        let target = as_of.min(order.end_date);
        if order.last_interest_date >= target {
            return Ok(false);
        }
        let day = order
            .last_interest_date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| EngineError::validation("interest date out of range"))?;

        let product = WealthProductRepo::get_by_id(&mut *tx, order.product_id).await?;
        let daily = self.daily_interest(order.amount()?, product.apy()?);

        InterestRecordRepo::insert(&mut *tx, order.id, RECORD_ACCRUE, day, daily, now).await?;
        let advanced = WealthOrderRepo::apply_accrual(
            &mut *tx,
            order.id,
            order.interest_accrued()? + daily,
            day,
            order.version,
            now,
        )
        .await?;
        if !advanced {
            return Err(EngineError::VersionConflict);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Simple daily interest: `principal * apy / 100 / basis`, banker's
    /// rounding to the configured scale. Not compounding.
    fn daily_interest(&self, principal: Decimal, apy: Decimal) -> Decimal {
        (principal * apy
            / Decimal::ONE_HUNDRED
            / Decimal::from(self.config.interest_basis_days))
        .round_dp(self.config.interest_scale)
    }

    /// Redeem an order: principal back to FUND, unpaid interest from the
    /// reserve. Before `end_date` this is an early redemption and the
    /// product's penalty rate is taken out of the unpaid interest; the
    /// forfeited part stays in the reserve.
    #[instrument(skip(self))]
    pub async fn redeem(&self, order_id: i64, as_of: NaiveDate) -> EngineResult<WealthOrderRow> {
        self.freeze.ensure_unfrozen().await?;

        let order = WealthOrderRepo::get_by_id(&self.pool, order_id).await?;
        let status = order.status()?;
        if !matches!(status, WealthOrderStatus::Active | WealthOrderStatus::Matured) {
            return Err(EngineError::invalid_transition(
                "WealthOrder",
                status,
                WealthOrderStatus::Redeemed,
            ));
        }

        let product = WealthProductRepo::get_by_id(&self.pool, order.product_id).await?;
        let early = as_of < order.end_date;
        if early && !product.early_redeem_allowed {
            return Err(EngineError::validation(format!(
                "product {} does not allow early redemption",
                product.code
            )));
        }
        let redemption_type = if early {
            RedemptionType::Early
        } else {
            // Accrual must be settled through the end date before paying out.
            self.accrue_order(order_id, order.end_date).await?;
            RedemptionType::Maturity
        };
        let penalty_rate = if early {
            product.early_redeem_penalty()?
        } else {
            Decimal::ZERO
        };

        let fund = self
            .accounts
            .get_or_create(&order.user_id, AccountType::Fund, &product.asset)
            .await?;
        let wealth = self
            .accounts
            .get_or_create(&order.user_id, AccountType::Wealth, &product.asset)
            .await?;
        let reserve = self
            .accounts
            .get_or_create(INTEREST_RESERVE_USER, AccountType::Fund, &product.asset)
            .await?;

        let order_no = order.order_no.clone();
        let (fund_id, wealth_id, reserve_id) = (fund.id, wealth.id, reserve.id);
        with_retries(&self.config, || {
            let order_no = order_no.clone();
            async move {
                let mut tx = self.pool.begin().await?;
                let now = Utc::now();

                let order = WealthOrderRepo::get_by_id(&mut *tx, order_id).await?;
                let principal = order.amount()?;
                let unpaid = order.interest_outstanding()?;
                let payable = (unpaid
                    - (unpaid * penalty_rate).round_dp(self.config.interest_scale))
                .max(Decimal::ZERO);

                let principal_spec = TransferSpec {
                    transfer_id: Uuid::new_v4().to_string(),
                    from_account_id: wealth_id,
                    to_account_id: fund_id,
                    amount: principal,
                    biz_type: BizType::WealthRedeem,
                    ref_id: Some(order_no.clone()),
                    allow_negative_from: false,
                };
                TransferEngine::execute(&mut tx, &principal_spec, now).await?;

                if payable > Decimal::ZERO {
                    let interest_spec = TransferSpec {
                        transfer_id: Uuid::new_v4().to_string(),
                        from_account_id: reserve_id,
                        to_account_id: fund_id,
                        amount: payable,
                        biz_type: BizType::InterestPay,
                        ref_id: Some(order_no.clone()),
                        allow_negative_from: true,
                    };
                    TransferEngine::execute(&mut tx, &interest_spec, now).await?;
                    InterestRecordRepo::insert(&mut *tx, order_id, RECORD_PAY, as_of, payable, now)
                        .await?;
                }

                let closed = WealthOrderRepo::mark_redeemed(
                    &mut *tx,
                    order_id,
                    order.interest_accrued()?,
                    order.interest_paid()? + payable,
                    principal,
                    redemption_type,
                    order.version,
                    now,
                )
                .await?;
                if !closed {
                    return Err(EngineError::VersionConflict);
                }

                tx.commit().await?;
                Ok(())
            }
        })
        .await?;

        info!(order_no = %order.order_no, ?redemption_type, "wealth order redeemed");
        Ok(WealthOrderRepo::get_by_id(&self.pool, order_id).await?)
    }

    /// Maturity sweep: settle every ACTIVE order whose term ended.
    ///
    /// Orders with auto-renew roll their principal into a fresh order on
    /// the same product when it still accepts subscriptions; everything
    /// else is redeemed at maturity.
    pub async fn process_maturities(&self, as_of: NaiveDate) -> EngineResult<MaturitySummary> {
        let orders = WealthOrderRepo::list_matured(&self.pool, as_of).await?;
        let mut summary = MaturitySummary::default();

        for order in orders {
            let result = self.settle_matured(&order, as_of).await;
            match result {
                Ok(true) => summary.renewed += 1,
                Ok(false) => summary.redeemed += 1,
                Err(err) => {
                    warn!(order_id = order.id, %err, "maturity sweep skipped order");
                    summary.orders_failed += 1;
                }
            }
        }

        info!(
            renewed = summary.renewed,
            redeemed = summary.redeemed,
            failed = summary.orders_failed,
            "maturity sweep finished"
        );
        Ok(summary)
    }

    /// Returns true when the order was renewed, false when redeemed.
    async fn settle_matured(&self, order: &WealthOrderRow, as_of: NaiveDate) -> EngineResult<bool> {
        self.accrue_order(order.id, order.end_date).await?;

        if order.auto_renew {
            let product = WealthProductRepo::get_by_id(&self.pool, order.product_id).await?;
            if product.status()?.accepts_subscriptions() {
                self.renew(order.id, &product).await?;
                return Ok(true);
            }
            warn!(
                order_id = order.id,
                product_code = %product.code,
                "auto-renew requested but product is closed, redeeming instead"
            );
        }

        self.redeem(order.id, as_of).await?;
        Ok(false)
    }

    /// Close a matured order into a linked successor carrying the principal.
    ///
    /// Principal stays in the WEALTH account (its quota claim carries over,
    /// so `sold_quota` is untouched); accrued unpaid interest is paid out to
    /// the FUND account as part of the closure.
    async fn renew(&self, order_id: i64, product: &WealthProductRow) -> EngineResult<WealthOrderRow> {
        let order = WealthOrderRepo::get_by_id(&self.pool, order_id).await?;

        let fund = self
            .accounts
            .get_or_create(&order.user_id, AccountType::Fund, &product.asset)
            .await?;
        let reserve = self
            .accounts
            .get_or_create(INTEREST_RESERVE_USER, AccountType::Fund, &product.asset)
            .await?;

        let new_order_no = format!("WO-{}", Uuid::new_v4());
        let start_date = order.end_date;
        let end_date = start_date
            .checked_add_days(Days::new(product.duration_days as u64))
            .ok_or_else(|| EngineError::validation("order end date out of range"))?;

        let successor = NewWealthOrder {
            order_no: new_order_no.clone(),
            user_id: order.user_id.clone(),
            product_id: product.id,
            amount: order.amount()?,
            start_date,
            end_date,
            auto_renew: order.auto_renew,
            renewed_from_order_id: Some(order.id),
        };

        let successor_ref = &successor;
        let (fund_id, reserve_id) = (fund.id, reserve.id);
        with_retries(&self.config, || async move {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now();

            let order = WealthOrderRepo::get_by_id(&mut *tx, order_id).await?;
            let unpaid = order.interest_outstanding()?;

            if unpaid > Decimal::ZERO {
                let interest_spec = TransferSpec {
                    transfer_id: Uuid::new_v4().to_string(),
                    from_account_id: reserve_id,
                    to_account_id: fund_id,
                    amount: unpaid,
                    biz_type: BizType::InterestPay,
                    ref_id: Some(order.order_no.clone()),
                    allow_negative_from: true,
                };
                TransferEngine::execute(&mut tx, &interest_spec, now).await?;
                InterestRecordRepo::insert(
                    &mut *tx,
                    order_id,
                    RECORD_PAY,
                    order.end_date,
                    unpaid,
                    now,
                )
                .await?;
            }

            let closed = WealthOrderRepo::mark_redeemed(
                &mut *tx,
                order_id,
                order.interest_accrued()?,
                order.interest_paid()? + unpaid,
                order.amount()?,
                RedemptionType::Maturity,
                order.version,
                now,
            )
            .await?;
            if !closed {
                return Err(EngineError::VersionConflict);
            }

            let new_id = WealthOrderRepo::insert(&mut *tx, successor_ref, now).await?;
            WealthOrderRepo::set_renewed_to(&mut *tx, order_id, new_id).await?;

            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(
            from_order = %order.order_no,
            to_order = %new_order_no,
            "wealth order auto-renewed"
        );
        Ok(WealthOrderRepo::get_by_order_no(&self.pool, &new_order_no).await?)
    }
}

//! Account and business-type enums
//!
//! All enums round-trip through their SCREAMING_SNAKE_CASE text form, which
//! is also how they are stored in TEXT columns.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Purpose of an account row.
///
/// Every user gets at most one account per (type, asset), created lazily.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// General wallet - deposits, withdrawals, transfers
    Fund,
    /// Holdings committed to wealth products
    Wealth,
}

/// Business tag attached to every journal entry.
///
/// The tag names the operation that moved the balance; the signed journal
/// amount carries the direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BizType {
    /// External deposit credited from the system deposit account
    Deposit,
    /// Confirmed outbound withdrawal (frozen funds leave the system)
    Withdraw,
    /// Withdrawal request froze available balance
    WithdrawFreeze,
    /// Failed withdrawal released frozen balance back
    WithdrawRelease,
    /// Generic internal transfer; journal legs carry TransferOut/TransferIn
    Transfer,
    /// Credit leg of an internal transfer
    TransferIn,
    /// Debit leg of an internal transfer
    TransferOut,
    /// Principal moved into a wealth product
    WealthSubscribe,
    /// Principal returned on redemption
    WealthRedeem,
    /// Accrued interest paid out from the interest reserve
    InterestPay,
    /// Operator adjustment approved through the workflow
    Adjustment,
}

impl BizType {
    /// Journal tags for the debit and credit legs of a two-account move.
    ///
    /// Generic transfers keep the classic TRANSFER_OUT/TRANSFER_IN pair;
    /// business moves tag both legs with the operation itself.
    pub fn leg_tags(&self) -> (BizType, BizType) {
        match self {
            BizType::Transfer => (BizType::TransferOut, BizType::TransferIn),
            other => (*other, *other),
        }
    }
}

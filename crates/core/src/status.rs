//! Status enums for orders, transfers and the approval workflow

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Lifecycle of a transfer record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle of a withdrawal order.
///
/// The order is created with its funds already frozen; `Confirmed` and
/// `Failed` are terminal and decide where the frozen funds go.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    /// Frozen, not yet handed to the custody provider
    Pending,
    /// Accepted by the custody provider, awaiting on-chain result
    Sent,
    /// Funds left the system; freeze released permanently
    Confirmed,
    /// Provider rejected or the send failed; freeze returned to balance
    Failed,
}

impl WithdrawalStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

/// Lifecycle of a wealth order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WealthOrderStatus {
    /// Accruing interest daily
    Active,
    /// Reached end_date, waiting for payout or renewal
    Matured,
    /// Principal returned; order closed
    Redeemed,
}

impl WealthOrderStatus {
    /// Whether the order may still accrue interest.
    pub fn accrues(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Lifecycle of a wealth product
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WealthProductStatus {
    /// Created, pending launch approval
    Pending,
    /// Accepting subscriptions
    Open,
    /// Quota fully subscribed
    SoldOut,
    /// Closed to new subscriptions
    Closed,
}

impl WealthProductStatus {
    /// Only OPEN products accept new subscriptions.
    pub fn accepts_subscriptions(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// How a wealth order was redeemed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionType {
    Maturity,
    Early,
}

/// Kind of a wealth interest record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterestRecordType {
    /// Daily accrual booked against the order
    Accrue,
    /// Accrued interest paid out to the FUND account
    Pay,
}

/// Where a withdrawal freeze went when it was released
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreezeReleaseKind {
    /// Freeze consumed by a confirmed send; funds left the system
    Withdrawn,
    /// Freeze returned to available balance after a failure
    Returned,
}

/// State of an idempotency record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

/// State of an approval request
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Reviewer roles, signed off in a fixed order: Finance, then Risk, then
/// Admin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewerRole {
    Finance,
    Risk,
    Admin,
}

impl ReviewerRole {
    /// 1-based position of this role in the sign-off chain.
    pub fn step(&self) -> u8 {
        match self {
            Self::Finance => 1,
            Self::Risk => 2,
            Self::Admin => 3,
        }
    }

    /// Role expected after this one, if any.
    pub fn next(&self) -> Option<ReviewerRole> {
        match self {
            Self::Finance => Some(Self::Risk),
            Self::Risk => Some(Self::Admin),
            Self::Admin => None,
        }
    }

    /// First role in the chain.
    pub fn first() -> ReviewerRole {
        Self::Finance
    }
}

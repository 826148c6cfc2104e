//! Engine error taxonomy
//!
//! Validation and balance errors are terminal; `VersionConflict` is retried
//! internally and surfaced as `TransientConflict` once attempts run out.

use monera_core::CoreError;
use monera_persistence::PersistenceError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the ledger engines
#[derive(Debug, Error)]
pub enum EngineError {
    // === Validation ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Product quota exceeded: requested {requested}, remaining {remaining}")]
    QuotaExceeded {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Address not on verified whitelist: {chain}/{address}")]
    AddressNotWhitelisted { chain: String, address: String },

    // === Concurrency ===
    /// Internal: one optimistic write lost its race. Retried, never returned.
    #[error("Optimistic version conflict")]
    VersionConflict,

    /// Returned once the bounded retry loop gives up.
    #[error("Operation kept conflicting, try again")]
    TransientConflict,

    #[error("Request with this idempotency key is still processing")]
    RequestInProgress,

    // === Operational state ===
    #[error("Business operations are frozen")]
    BusinessFrozen,

    #[error("Invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    // === External collaborator ===
    #[error("Custody provider error: {0}")]
    ExternalProvider(String),

    // === Wrapped ===
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.into())
    }
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the error is the internal retry signal.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insufficient_balance_message() {
        let err = EngineError::insufficient_balance(dec!(1500), dec!(1000));
        assert!(err.to_string().contains("required 1500"));
        assert!(err.to_string().contains("available 1000"));
    }

    #[test]
    fn invalid_transition_message() {
        let err = EngineError::invalid_transition("WithdrawalOrder", "CONFIRMED", "FAILED");
        assert!(err.to_string().contains("CONFIRMED -> FAILED"));
    }
}

//! Core domain errors

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors from core value-type construction and parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(Decimal),

    #[error("Amount must be positive: {0}")]
    NonPositiveAmount(Decimal),

    #[error("Unknown {field} value: {value}")]
    UnknownEnumValue { field: String, value: String },
}

impl CoreError {
    pub fn unknown_enum(field: &str, value: &str) -> Self {
        Self::UnknownEnumValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

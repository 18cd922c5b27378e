//! Store Error Types
//!
//! Errors surfaced by the value store and the id tables. Every failure here is
//! recoverable and reported to the immediate caller.

use thiserror::Error;

/// Errors raised by [`Dict`](crate::Dict) and [`IdTable`](crate::IdTable)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Memory for a new entry could not be reserved
    #[error("Allocation failed: {what}")]
    AllocationFailed { what: String },

    /// A value could not be converted into the requested shape
    #[error("Invalid value for '{key}': expected {expected}, found {found}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Create an allocation failure error
    pub fn allocation_failed(what: impl Into<String>) -> Self {
        Self::AllocationFailed { what: what.into() }
    }

    /// Create an invalid value error
    pub fn invalid_value(key: impl Into<String>, expected: &'static str, found: &'static str) -> Self {
        Self::InvalidValue {
            key: key.into(),
            expected,
            found,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            StoreError::AllocationFailed { .. } => "resource_exhausted",
            StoreError::InvalidValue { .. } => "invalid_value",
        }
    }
}

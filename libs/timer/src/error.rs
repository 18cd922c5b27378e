//! Timer Error Types

use thiserror::Error;
use types::{StoreError, TimerId};

/// Errors raised by the timer scheduler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The id is not scheduled: never issued, already fired, or cancelled
    #[error("Timer {timer} is not scheduled")]
    UnknownTimer { timer: TimerId },

    /// The scheduler is busy firing callbacks and cannot be borrowed
    #[error("Timer scheduler busy: {operation}")]
    Busy { operation: String },

    /// Node or heap storage could not grow
    #[error("Resource exhausted: {what}")]
    ResourceExhausted { what: String },
}

/// Result type alias for timer operations
pub type Result<T> = std::result::Result<T, TimerError>;

impl TimerError {
    pub fn unknown_timer(timer: TimerId) -> Self {
        Self::UnknownTimer { timer }
    }

    pub fn busy(operation: impl Into<String>) -> Self {
        Self::Busy {
            operation: operation.into(),
        }
    }

    pub fn resource_exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted { what: what.into() }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            TimerError::UnknownTimer { .. } => "unknown_timer",
            TimerError::Busy { .. } => "busy",
            TimerError::ResourceExhausted { .. } => "resource_exhausted",
        }
    }
}

impl From<StoreError> for TimerError {
    fn from(error: StoreError) -> Self {
        TimerError::resource_exhausted(error.to_string())
    }
}

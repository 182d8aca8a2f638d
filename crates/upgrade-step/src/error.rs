//! Error types for step implementations

use crate::types::UpgradeStepStatus;

/// Step-local failure
///
/// Returned by `UpgradeStep` implementations. The engine converts these into
/// `UpgradeStepStatus::Failed` with the message as status details; they never
/// abort the run. `Cancelled` is not a failure and leaves the step retryable.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The step could not do its work
    #[error("{0}")]
    Failed(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancellation was requested
    #[error("operation cancelled")]
    Cancelled,
}

impl StepError {
    /// Create a failure with a message
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check if this error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Status transition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The transition is not in the legal transition table
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: UpgradeStepStatus,
        /// Requested status
        to: UpgradeStepStatus,
    },
}

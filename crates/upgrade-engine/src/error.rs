//! Error types for the upgrade engine
//!
//! Errors fall into three groups:
//! - Configuration errors, detected while ordering steps at startup
//! - Contract violations by step implementations
//! - Cancellation

use upgrade_step::{StepId, TransitionError};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Two steps share an id
    #[error("duplicate step id: {0}")]
    DuplicateStep(StepId),

    /// A step depends on an id that no registered step has
    #[error("step {step} depends on unregistered step {dependency}")]
    MissingDependency {
        /// Declaring step
        step: StepId,
        /// Unresolved id
        dependency: StepId,
    },

    /// The dependency graph contains a cycle
    #[error("cyclic step dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// Ids taking part in the cycle, in registration order
        cycle: Vec<StepId>,
    },

    /// Steps are waiting on prerequisites and nothing else can run
    #[error("steps blocked on prerequisites that cannot complete: {}", .blocked.iter().map(StepId::as_str).collect::<Vec<_>>().join(", "))]
    Stalled {
        /// Steps that were passed over, in traversal order
        blocked: Vec<StepId>,
    },

    /// A step left its status `Unknown` after initialize or apply
    #[error("step {step} did not set a status during {operation}")]
    UninitializedStatus {
        /// Offending step
        step: StepId,
        /// `initialize` or `apply`
        operation: &'static str,
    },

    /// Apply or skip was called before initialize
    #[error("step {0} has not been initialized")]
    NotInitialized(StepId),

    /// A step attempted a status transition outside the transition table
    #[error("step {step}: {source}")]
    IllegalTransition {
        /// Offending step
        step: StepId,
        /// Rejected transition
        #[source]
        source: TransitionError,
    },

    /// No step with this id or index
    #[error("step not found: {0}")]
    StepNotFound(String),

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Startup errors that abort the run before any step executes
    #[inline]
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStep(_)
                | Self::MissingDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::Stalled { .. }
        )
    }

    /// Broken step implementations or misuse of the engine API
    #[inline]
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::UninitializedStatus { .. }
                | Self::NotInitialized(_)
                | Self::IllegalTransition { .. }
                | Self::StepNotFound(_)
        )
    }

    /// Check if this error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn format_cycle(cycle: &[StepId]) -> String {
    let names: Vec<&str> = cycle.iter().map(StepId::as_str).collect();
    names.join(" -> ")
}

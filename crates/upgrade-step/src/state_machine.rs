//! Legal step status transitions
//!
//! Initialize moves a step out of `Unknown`; apply and skip move it out of
//! `Incomplete`/`Failed`; reset returns any step to `Unknown`.

use crate::error::TransitionError;
use crate::types::UpgradeStepStatus;

/// Validates a status transition.
///
/// Self-transitions of `Incomplete` and `Failed` are legal: an apply may make
/// partial progress, and a retried step may fail again.
pub fn validate_transition(
    from: UpgradeStepStatus,
    to: UpgradeStepStatus,
) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::IllegalTransition { from, to })
    }
}

/// All statuses reachable from `from` in a single transition
#[must_use]
pub fn allowed_transitions(from: UpgradeStepStatus) -> Vec<UpgradeStepStatus> {
    use UpgradeStepStatus::*;
    match from {
        Unknown => vec![Incomplete, Complete, Skipped, Failed],
        Incomplete => vec![Incomplete, Complete, Skipped, Failed, Unknown],
        Failed => vec![Incomplete, Complete, Skipped, Failed, Unknown],
        Complete => vec![Unknown],
        Skipped => vec![Unknown],
    }
}

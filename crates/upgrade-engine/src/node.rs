//! Step node
//!
//! A node owns one step behaviour together with the engine-managed state:
//! status, details, risk and its position in the step tree. All calls into
//! the behaviour go through the node, which is the step boundary: behaviour
//! errors become `Failed`, cancellation leaves the node retryable, and
//! contract violations surface as [`EngineError`].

use crate::error::EngineError;
use upgrade_step::state_machine::validate_transition;
use upgrade_step::{
    ApplicabilityFn, BuildBreakRisk, CancellationToken, StatusResult, StepError, StepId,
    StepScope, UpgradeContext, UpgradeStep, UpgradeStepStatus,
};

/// Index of a node in the step tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepIndex(pub(crate) usize);

impl StepIndex {
    /// Raw arena position
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Details text used when an apply is interrupted
pub const APPLY_CANCELLED: &str = "Apply cancelled";

/// One step in the tree
pub struct StepNode {
    pub(crate) step: Box<dyn UpgradeStep>,
    pub(crate) id: StepId,
    pub(crate) applicability: Option<ApplicabilityFn>,
    pub(crate) scope: StepScope,
    pub(crate) status: UpgradeStepStatus,
    pub(crate) details: String,
    pub(crate) risk: BuildBreakRisk,
    pub(crate) parent: Option<StepIndex>,
    pub(crate) children: Vec<StepIndex>,
    pub(crate) prerequisites: Vec<StepIndex>,
}

impl StepNode {
    pub(crate) fn new(
        step: Box<dyn UpgradeStep>,
        applicability: Option<ApplicabilityFn>,
        scope: StepScope,
        parent: Option<StepIndex>,
    ) -> Self {
        let id = StepId::from(step.id());
        Self {
            step,
            id,
            applicability,
            scope,
            status: UpgradeStepStatus::Unknown,
            details: String::new(),
            risk: BuildBreakRisk::Unknown,
            parent,
            children: Vec::new(),
            prerequisites: Vec::new(),
        }
    }

    /// Step id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &StepId {
        &self.id
    }

    /// Step title
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        self.step.title()
    }

    /// Step description
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        self.step.description()
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> UpgradeStepStatus {
        self.status
    }

    /// Explanation of the current status
    #[inline]
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    /// Risk of this step alone (see `StepTree::effective_risk` for the
    /// aggregate)
    #[inline]
    #[must_use]
    pub fn risk(&self) -> BuildBreakRisk {
        self.risk
    }

    /// Step scope
    #[inline]
    #[must_use]
    pub fn scope(&self) -> StepScope {
        self.scope
    }

    /// Containing step
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<StepIndex> {
        self.parent
    }

    /// Sub-steps in execution order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[StepIndex] {
        &self.children
    }

    /// Behaviour predicate combined with the registration predicate
    #[must_use]
    pub fn is_applicable(&self, context: &UpgradeContext) -> bool {
        self.step.is_applicable(context)
            && self.applicability.as_ref().map_or(true, |predicate| predicate(context))
    }

    /// Initialize the step if it has not been initialized yet
    ///
    /// Already initialized steps are left untouched and their status is
    /// returned as is.
    ///
    /// # Errors
    /// - `UninitializedStatus` if the behaviour reports `Unknown`
    /// - `Cancelled` if cancellation was requested; the node stays `Unknown`
    pub async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<UpgradeStepStatus, EngineError> {
        if self.status != UpgradeStepStatus::Unknown {
            return Ok(self.status);
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        tracing::debug!(step = %self.id, "Initializing step");
        match self.step.initialize(context, cancel).await {
            Ok(result) if result.status == UpgradeStepStatus::Unknown => {
                Err(EngineError::UninitializedStatus {
                    step: self.id.clone(),
                    operation: "initialize",
                })
            }
            Ok(result) => {
                self.set_result(result)?;
                tracing::info!(step = %self.id, status = %self.status, "Step initialized");
                Ok(self.status)
            }
            Err(StepError::Cancelled) => Err(EngineError::Cancelled),
            Err(err) => {
                tracing::warn!(step = %self.id, error = %err, "Step initialization failed");
                self.set_result(StatusResult::failed(err.to_string()))?;
                Ok(self.status)
            }
        }
    }

    /// Apply the step
    ///
    /// Returns `true` when the step ends up `Complete` (or was already
    /// `Complete`/`Skipped`, in which case nothing is executed).
    ///
    /// # Errors
    /// - `NotInitialized` if the node is still `Unknown`
    /// - `UninitializedStatus` if the behaviour reports `Unknown`
    pub async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        match self.status {
            UpgradeStepStatus::Unknown => Err(EngineError::NotInitialized(self.id.clone())),
            UpgradeStepStatus::Complete | UpgradeStepStatus::Skipped => Ok(true),
            UpgradeStepStatus::Incomplete | UpgradeStepStatus::Failed => {
                if cancel.is_cancelled() {
                    self.details = APPLY_CANCELLED.to_string();
                    return Ok(false);
                }

                tracing::info!(step = %self.id, "Applying step");
                match self.step.apply(context, cancel).await {
                    Ok(result) if result.status == UpgradeStepStatus::Unknown => {
                        Err(EngineError::UninitializedStatus {
                            step: self.id.clone(),
                            operation: "apply",
                        })
                    }
                    Ok(result) => {
                        self.set_result(result)?;
                        match self.status {
                            UpgradeStepStatus::Complete | UpgradeStepStatus::Skipped => {
                                tracing::info!(step = %self.id, "Step applied");
                                Ok(true)
                            }
                            _ => {
                                tracing::warn!(step = %self.id, details = %self.details, "Step apply did not complete");
                                Ok(false)
                            }
                        }
                    }
                    Err(StepError::Cancelled) => {
                        tracing::info!(step = %self.id, "Step apply cancelled");
                        self.details = APPLY_CANCELLED.to_string();
                        Ok(false)
                    }
                    Err(err) => {
                        tracing::warn!(step = %self.id, error = %err, "Step apply failed");
                        self.set_result(StatusResult::failed(err.to_string()))?;
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Mark the step skipped
    ///
    /// Returns whether the status changed.
    ///
    /// # Errors
    /// `NotInitialized` if the node is still `Unknown`
    pub fn skip(&mut self) -> Result<bool, EngineError> {
        match self.status {
            UpgradeStepStatus::Unknown => Err(EngineError::NotInitialized(self.id.clone())),
            UpgradeStepStatus::Complete | UpgradeStepStatus::Skipped => Ok(false),
            UpgradeStepStatus::Incomplete | UpgradeStepStatus::Failed => {
                self.set_result(StatusResult::skipped("Step skipped"))?;
                tracing::info!(step = %self.id, "Step skipped");
                Ok(true)
            }
        }
    }

    /// Skip a node that was never initialized because its parent was skipped
    pub(crate) fn skip_with_parent(&mut self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.set_result(StatusResult::skipped("Parent step skipped"))
    }

    /// Return the node to `Unknown`
    pub fn reset(&mut self) {
        if self.status == UpgradeStepStatus::Unknown {
            return;
        }
        self.step.reset();
        self.status = UpgradeStepStatus::Unknown;
        self.details.clear();
        self.risk = BuildBreakRisk::Unknown;
        tracing::debug!(step = %self.id, "Step reset");
    }

    fn set_result(&mut self, result: StatusResult) -> Result<(), EngineError> {
        validate_transition(self.status, result.status).map_err(|source| {
            EngineError::IllegalTransition {
                step: self.id.clone(),
                source,
            }
        })?;
        self.status = result.status;
        self.details = result.details;
        if result.risk != BuildBreakRisk::Unknown || self.risk == BuildBreakRisk::Unknown {
            self.risk = result.risk;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("details", &self.details)
            .field("risk", &self.risk)
            .field("scope", &self.scope)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

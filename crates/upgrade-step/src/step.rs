//! Step contract and registration data
//!
//! An [`UpgradeStep`] is the behaviour of one unit of upgrade work. It is
//! registered with the engine wrapped in a [`StepSpec`], which attaches the
//! registration-time configuration: extra dependency edges, an applicability
//! predicate, the step scope and the ordered sub-steps.
//!
//! # Contract
//!
//! - `is_applicable` is a pure predicate and may be called before initialize.
//! - `initialize` inspects the current state and returns a status other than
//!   `Unknown`. It may record decisions in the context but must not mutate the
//!   project being upgraded.
//! - `apply` performs the mutation. It is only called on initialized steps
//!   that still need action.
//! - Errors are returned as [`StepError`]; the engine turns them into a
//!   `Failed` status.

use crate::cancel::CancellationToken;
use crate::context::UpgradeContext;
use crate::error::StepError;
use crate::types::{StatusResult, StepId, StepScope};
use std::sync::Arc;

/// Behaviour of an upgrade step
#[async_trait::async_trait]
pub trait UpgradeStep: Send + Sync {
    /// Globally unique id
    fn id(&self) -> &str;

    /// Short display title
    fn title(&self) -> &str;

    /// Longer description shown in details views
    fn description(&self) -> &str {
        ""
    }

    /// Ids of steps that must be done before this step is initialized
    fn depends_on(&self) -> Vec<StepId> {
        Vec::new()
    }

    /// Ids of steps that must not be initialized before this step is done
    fn dependency_of(&self) -> Vec<StepId> {
        Vec::new()
    }

    /// Whether the step is relevant for the current context
    fn is_applicable(&self, _context: &UpgradeContext) -> bool {
        true
    }

    /// Determine the current status without mutating the project
    async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError>;

    /// Perform the upgrade work
    async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError>;

    /// Drop any cached state so the step can be initialized again
    fn reset(&mut self) {}
}

/// Applicability predicate attached at registration time
pub type ApplicabilityFn = Arc<dyn Fn(&UpgradeContext) -> bool + Send + Sync>;

/// A step plus its registration-time configuration
pub struct StepSpec {
    step: Box<dyn UpgradeStep>,
    depends_on: Vec<StepId>,
    dependency_of: Vec<StepId>,
    applicability: Option<ApplicabilityFn>,
    scope: StepScope,
    sub_steps: Vec<StepSpec>,
}

/// Decomposed [`StepSpec`], consumed by the engine when building its tree
pub struct StepParts {
    /// Step behaviour
    pub step: Box<dyn UpgradeStep>,
    /// Declared and registered `depends_on` ids, deduplicated
    pub depends_on: Vec<StepId>,
    /// Declared and registered `dependency_of` ids, deduplicated
    pub dependency_of: Vec<StepId>,
    /// Registration-time applicability predicate
    pub applicability: Option<ApplicabilityFn>,
    /// Step scope
    pub scope: StepScope,
    /// Ordered sub-steps
    pub sub_steps: Vec<StepSpec>,
}

impl StepSpec {
    /// Wrap a step behaviour
    #[must_use]
    pub fn new(step: impl UpgradeStep + 'static) -> Self {
        Self::from_boxed(Box::new(step))
    }

    /// Wrap an already boxed step behaviour
    #[must_use]
    pub fn from_boxed(step: Box<dyn UpgradeStep>) -> Self {
        Self {
            step,
            depends_on: Vec::new(),
            dependency_of: Vec::new(),
            applicability: None,
            scope: StepScope::Solution,
            sub_steps: Vec::new(),
        }
    }

    /// Add a `depends_on` edge
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<StepId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Add a `dependency_of` edge
    #[must_use]
    pub fn dependency_of(mut self, id: impl Into<StepId>) -> Self {
        self.dependency_of.push(id.into());
        self
    }

    /// Only applicable when `predicate` holds (in addition to the step's own
    /// `is_applicable`)
    #[must_use]
    pub fn applicable_when(
        mut self,
        predicate: impl Fn(&UpgradeContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.applicability = Some(Arc::new(predicate));
        self
    }

    /// Set the step scope
    #[must_use]
    pub fn with_scope(mut self, scope: StepScope) -> Self {
        self.scope = scope;
        self
    }

    /// Append a sub-step
    #[must_use]
    pub fn with_sub_step(mut self, sub_step: StepSpec) -> Self {
        self.sub_steps.push(sub_step);
        self
    }

    /// Append several sub-steps
    #[must_use]
    pub fn with_sub_steps(mut self, sub_steps: impl IntoIterator<Item = StepSpec>) -> Self {
        self.sub_steps.extend(sub_steps);
        self
    }

    /// Step id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        self.step.id()
    }

    /// Step scope
    #[inline]
    #[must_use]
    pub fn scope(&self) -> StepScope {
        self.scope
    }

    /// Sub-steps in declaration order
    #[inline]
    #[must_use]
    pub fn sub_steps(&self) -> &[StepSpec] {
        &self.sub_steps
    }

    /// Ids of this step and all of its descendants, parents first
    #[must_use]
    pub fn all_ids(&self) -> Vec<StepId> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(spec) = stack.pop() {
            ids.push(StepId::from(spec.id()));
            stack.extend(spec.sub_steps.iter().rev());
        }
        ids
    }

    /// Merged `depends_on` ids from the behaviour and the registration
    #[must_use]
    pub fn all_depends_on(&self) -> Vec<StepId> {
        merge_ids(self.step.depends_on(), &self.depends_on)
    }

    /// Merged `dependency_of` ids from the behaviour and the registration
    #[must_use]
    pub fn all_dependency_of(&self) -> Vec<StepId> {
        merge_ids(self.step.dependency_of(), &self.dependency_of)
    }

    /// Split into parts for tree construction
    #[must_use]
    pub fn into_parts(self) -> StepParts {
        let depends_on = self.all_depends_on();
        let dependency_of = self.all_dependency_of();
        StepParts {
            step: self.step,
            depends_on,
            dependency_of,
            applicability: self.applicability,
            scope: self.scope,
            sub_steps: self.sub_steps,
        }
    }
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("id", &self.id())
            .field("depends_on", &self.depends_on)
            .field("dependency_of", &self.dependency_of)
            .field("scope", &self.scope)
            .field("sub_steps", &self.sub_steps)
            .finish_non_exhaustive()
    }
}

fn merge_ids(mut declared: Vec<StepId>, registered: &[StepId]) -> Vec<StepId> {
    for id in registered {
        if !declared.contains(id) {
            declared.push(id.clone());
        }
    }
    let mut seen = std::collections::HashSet::new();
    declared.retain(|id| seen.insert(id.clone()));
    declared
}

//! Updater sub-step contract
//!
//! Many upgrade steps are "load some inputs, then run a list of independent
//! updaters over them". This module packages that shape:
//! - [`InputLoader`] produces the inputs once per initialize of the group
//! - [`UpdaterGroupStep`] is the parent step; it stores the inputs in the
//!   context property bag
//! - [`UpdaterSubStep`] drives one [`Updater`] against the stored inputs
//! - [`updater_step_spec`] wires the group and its sub-steps together

use async_trait::async_trait;
use std::sync::Arc;
use upgrade_step::{
    BuildBreakRisk, CancellationToken, StatusResult, StepError, StepSpec, UpgradeContext,
    UpgradeStep,
};

/// Outcome of an updater check or apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterResult {
    /// `true` if the updater applies (check) or succeeded (apply)
    pub result: bool,
    /// Risk of the change
    pub risk: BuildBreakRisk,
    /// Human-readable details
    pub details: String,
}

impl UpdaterResult {
    /// Work to do (check) or done (apply)
    pub fn yes(details: impl Into<String>, risk: BuildBreakRisk) -> Self {
        Self {
            result: true,
            risk,
            details: details.into(),
        }
    }

    /// Nothing to do (check) or failed (apply)
    pub fn no(details: impl Into<String>) -> Self {
        Self {
            result: false,
            risk: BuildBreakRisk::None,
            details: details.into(),
        }
    }
}

/// One independent change applied over a group's inputs
#[async_trait]
pub trait Updater<I>: Send + Sync {
    /// Unique id, used as the sub-step id
    fn id(&self) -> &str;

    /// Short title
    fn title(&self) -> &str;

    /// Longer description
    fn description(&self) -> &str {
        ""
    }

    /// Whether the updater has work to do on `inputs`
    async fn is_applicable(
        &self,
        context: &UpgradeContext,
        inputs: &[I],
        cancel: &CancellationToken,
    ) -> Result<UpdaterResult, StepError>;

    /// Apply the change to `inputs`
    async fn apply(
        &self,
        context: &mut UpgradeContext,
        inputs: &[I],
        cancel: &CancellationToken,
    ) -> Result<UpdaterResult, StepError>;
}

/// Loads the inputs for an updater group
#[async_trait]
pub trait InputLoader<I>: Send + Sync {
    /// Load inputs for the current context
    async fn load(
        &self,
        context: &UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<I>, StepError>;
}

fn inputs_key(group_id: &str) -> String {
    format!("{group_id}.inputs")
}

fn stored_inputs<I: Send + Sync + 'static>(context: &UpgradeContext, key: &str) -> Arc<Vec<I>> {
    context
        .properties()
        .get::<Arc<Vec<I>>>(key)
        .cloned()
        .unwrap_or_default()
}

/// Parent step of an updater group
pub struct UpdaterGroupStep<I> {
    id: String,
    title: String,
    description: String,
    loader: Box<dyn InputLoader<I>>,
}

impl<I: Send + Sync + 'static> UpdaterGroupStep<I> {
    /// Create a group
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        loader: impl InputLoader<I> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            loader: Box::new(loader),
        }
    }

    /// With a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<I: Send + Sync + 'static> UpgradeStep for UpdaterGroupStep<I> {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        let inputs = self.loader.load(context, cancel).await?;
        let count = inputs.len();
        context
            .properties_mut()
            .insert(inputs_key(&self.id), Arc::new(inputs));
        tracing::debug!(group = %self.id, inputs = count, "Loaded updater inputs");

        if count == 0 {
            return Ok(StatusResult::complete("No inputs to update"));
        }
        Ok(StatusResult::incomplete(
            format!("{count} input(s) to update"),
            BuildBreakRisk::None,
        ))
    }

    async fn apply(
        &mut self,
        _context: &mut UpgradeContext,
        _cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        // Sub-steps carry the work; reaching the parent means they are done.
        Ok(StatusResult::complete("All updaters processed"))
    }
}

/// Sub-step running one updater over its group's inputs
pub struct UpdaterSubStep<I> {
    updater: Box<dyn Updater<I>>,
    inputs_key: String,
}

impl<I: Send + Sync + 'static> UpdaterSubStep<I> {
    /// Create a sub-step reading the inputs of `group_id`
    pub fn new(group_id: &str, updater: Box<dyn Updater<I>>) -> Self {
        Self {
            updater,
            inputs_key: inputs_key(group_id),
        }
    }
}

#[async_trait]
impl<I: Send + Sync + 'static> UpgradeStep for UpdaterSubStep<I> {
    fn id(&self) -> &str {
        self.updater.id()
    }

    fn title(&self) -> &str {
        self.updater.title()
    }

    fn description(&self) -> &str {
        self.updater.description()
    }

    async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        let inputs = stored_inputs::<I>(context, &self.inputs_key);
        let check = self.updater.is_applicable(context, &inputs, cancel).await?;
        Ok(if check.result {
            StatusResult::incomplete(check.details, check.risk)
        } else {
            StatusResult::complete(check.details)
        })
    }

    async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        let inputs = stored_inputs::<I>(context, &self.inputs_key);
        let outcome = self.updater.apply(context, &inputs, cancel).await?;
        Ok(if outcome.result {
            StatusResult::complete(outcome.details)
        } else {
            StatusResult::failed(outcome.details)
        })
    }
}

/// Build the spec of an updater group with one sub-step per updater
///
/// Updaters keep their given order; add dependencies on the returned
/// spec's sub-steps through their ids if needed.
pub fn updater_step_spec<I: Send + Sync + 'static>(
    group: UpdaterGroupStep<I>,
    updaters: Vec<Box<dyn Updater<I>>>,
) -> StepSpec {
    let group_id = group.id.clone();
    let sub_steps = updaters
        .into_iter()
        .map(|updater| StepSpec::new(UpdaterSubStep::new(&group_id, updater)));
    StepSpec::new(group).with_sub_steps(sub_steps)
}

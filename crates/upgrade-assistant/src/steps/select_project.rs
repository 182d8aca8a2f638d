//! Project selection step
//!
//! Applicable while no project is selected. Each apply picks the next
//! unprocessed project in discovery order. Once the engine finishes a
//! project it clears the selection, which makes this step applicable again.

use async_trait::async_trait;
use std::path::PathBuf;
use upgrade_step::{
    BuildBreakRisk, CancellationToken, ProjectRef, StatusResult, StepError, UpgradeContext,
    UpgradeStep,
};

/// Step id
pub const SELECT_PROJECT_STEP_ID: &str = "builtin.select-project";

/// Property bag key holding the paths of projects already selected
pub const PROCESSED_PROJECTS_KEY: &str = "builtin.select-project.processed";

/// Selects the next project to upgrade
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectSelectionStep;

impl ProjectSelectionStep {
    /// Projects not yet selected, in discovery order
    #[must_use]
    pub fn remaining(context: &UpgradeContext) -> Vec<ProjectRef> {
        let processed = context
            .properties()
            .get::<Vec<PathBuf>>(PROCESSED_PROJECTS_KEY);
        context
            .projects()
            .iter()
            .filter(|p| processed.map_or(true, |done| !done.contains(&p.path)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UpgradeStep for ProjectSelectionStep {
    fn id(&self) -> &str {
        SELECT_PROJECT_STEP_ID
    }

    fn title(&self) -> &str {
        "Select project to upgrade"
    }

    fn description(&self) -> &str {
        "Chooses the next project in discovery order"
    }

    fn is_applicable(&self, context: &UpgradeContext) -> bool {
        context.current_project().is_none() && !context.projects().is_empty()
    }

    async fn initialize(
        &mut self,
        context: &mut UpgradeContext,
        _cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        let remaining = Self::remaining(context);
        Ok(match remaining.first() {
            Some(next) => StatusResult::incomplete(
                format!("{} project(s) remaining; next is {}", remaining.len(), next.name),
                BuildBreakRisk::None,
            ),
            None => StatusResult::complete("All projects processed"),
        })
    }

    async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        cancel.check()?;
        let Some(next) = Self::remaining(context).into_iter().next() else {
            return Ok(StatusResult::complete("All projects processed"));
        };

        context
            .properties_mut()
            .get_or_default::<Vec<PathBuf>>(PROCESSED_PROJECTS_KEY)
            .push(next.path.clone());
        let details = format!("Selected {}", next.name);
        context.set_current_project(Some(next));
        Ok(StatusResult::complete(details))
    }
}

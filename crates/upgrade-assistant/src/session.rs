//! Session assembly
//!
//! Discovers projects, loads extensions and builds the ordered step tree
//! for one input path.

use crate::config::AssistantConfig;
use crate::discovery::discover_projects;
use crate::error::AssistantError;
use crate::extension::{ExtensionRegistry, LoadReport};
use serde::Serialize;
use std::path::Path;
use upgrade_engine::{EngineError, StepOrderer, StepReport, UpgradeManager};
use upgrade_step::{CancellationToken, ProjectRef, UpgradeContext};

/// Analysis of the steps for one project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectAnalysis {
    /// Analyzed project
    pub project: ProjectRef,
    /// Step tree as initialized for this project
    pub steps: Vec<StepReport>,
}

/// A ready-to-run engine plus the extension load outcome
#[derive(Debug)]
pub struct Session {
    /// Engine over the loaded steps
    pub manager: UpgradeManager,
    /// What the extensions contributed
    pub extensions: LoadReport,
}

impl Session {
    /// Build a session for `input`
    ///
    /// # Errors
    /// - Discovery errors (`InputNotFound`, `NoProjects`, `Io`)
    /// - Step graph errors from the engine (duplicate, missing dependency, cycle)
    pub fn build(
        input: &Path,
        config: &AssistantConfig,
        registry: &ExtensionRegistry,
    ) -> Result<Self, AssistantError> {
        let projects = discover_projects(input, &config.project_extensions)?;

        let mut context = UpgradeContext::new(input).with_projects(projects.clone());
        context.set_entry_points(projects);

        let mut orderer = StepOrderer::new();
        let extensions = registry.load_into(&mut orderer, config);
        for failure in &extensions.failures {
            tracing::warn!(extension = failure.extension(), error = %failure, "Extension not loaded");
        }
        for id in &extensions.rejected_steps {
            tracing::warn!(step = %id, "Duplicate step id not registered");
        }

        let manager = orderer.build(context)?;
        Ok(Self {
            manager,
            extensions,
        })
    }

    /// Initialize the steps for every project in turn without applying
    /// anything
    ///
    /// The current project is cleared afterwards.
    ///
    /// # Errors
    /// Contract violations and cancellation from the engine
    pub async fn analyze_projects(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProjectAnalysis>, EngineError> {
        let projects = self.manager.context().projects().to_vec();
        let mut analyses = Vec::with_capacity(projects.len());
        for project in projects {
            self.manager.select_project(Some(project.clone()));
            let steps = self.manager.analyze(cancel).await?;
            analyses.push(ProjectAnalysis { project, steps });
        }
        self.manager.select_project(None);
        Ok(analyses)
    }
}

//! Step registration and ordering
//!
//! Steps are registered as a forest of [`StepSpec`]s. Nothing is validated
//! until the orderer is queried or built; at that point all dependency
//! declarations are reconciled into one graph.

use crate::error::EngineError;
use crate::graph::{DeclaredStep, DependencyGraph};
use crate::manager::UpgradeManager;
use crate::tree::StepTree;
use std::collections::HashSet;
use upgrade_step::{StepId, StepSpec, UpgradeContext};

/// Collects top-level steps and orders them by their dependencies
#[derive(Debug, Default)]
pub struct StepOrderer {
    specs: Vec<StepSpec>,
    ids: HashSet<StepId>,
}

impl StepOrderer {
    /// Create an empty orderer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a top-level step with its sub-steps
    ///
    /// Returns `false` (and registers nothing) if any id in the spec's
    /// subtree is already registered or repeated within the subtree.
    pub fn register(&mut self, spec: StepSpec) -> bool {
        let incoming = spec.all_ids();
        let mut seen = HashSet::with_capacity(incoming.len());
        for id in &incoming {
            if self.ids.contains(id) || !seen.insert(id.clone()) {
                tracing::warn!(step = %id, "Step already registered; ignoring");
                return false;
            }
        }

        tracing::debug!(step = %spec.id(), sub_steps = incoming.len() - 1, "Registered step");
        self.ids.extend(incoming);
        self.specs.push(spec);
        true
    }

    /// Remove a top-level step and its sub-steps
    ///
    /// Returns `false` if no top-level step has that id.
    pub fn unregister(&mut self, id: &str) -> bool {
        let Some(position) = self.specs.iter().position(|spec| spec.id() == id) else {
            return false;
        };
        let removed = self.specs.remove(position);
        for removed_id in removed.all_ids() {
            self.ids.remove(&removed_id);
        }
        tracing::debug!(step = %id, "Unregistered step");
        true
    }

    /// Number of registered top-level steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Check if nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Check if a step or sub-step id is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Top-level step ids in execution order
    ///
    /// # Errors
    /// `MissingDependency` or `CyclicDependency` if the declarations are
    /// inconsistent
    pub fn ordered_steps(&self) -> Result<Vec<StepId>, EngineError> {
        let graph = self.graph()?;
        Ok(graph.order(&self.root_ids()))
    }

    /// Validate, order and build the step tree
    ///
    /// # Errors
    /// Same as [`StepOrderer::ordered_steps`]
    pub fn build(self, context: UpgradeContext) -> Result<UpgradeManager, EngineError> {
        let graph = self.graph()?;
        let order = graph.order(&self.root_ids());

        let mut by_id: std::collections::HashMap<StepId, StepSpec> = self
            .specs
            .into_iter()
            .map(|spec| (StepId::from(spec.id()), spec))
            .collect();
        let roots: Vec<StepSpec> = order.iter().filter_map(|id| by_id.remove(id)).collect();

        let tree = StepTree::build(roots, &graph);
        tracing::info!(steps = tree.len(), "Step tree built");
        Ok(UpgradeManager::new(tree, context))
    }

    fn root_ids(&self) -> Vec<StepId> {
        self.specs.iter().map(|spec| StepId::from(spec.id())).collect()
    }

    /// Declarations of every registered step, pre-order per top-level step
    fn graph(&self) -> Result<DependencyGraph, EngineError> {
        let mut declared = Vec::with_capacity(self.ids.len());
        let mut stack: Vec<(&StepSpec, Option<StepId>)> =
            self.specs.iter().rev().map(|spec| (spec, None)).collect();
        while let Some((spec, parent)) = stack.pop() {
            let id = StepId::from(spec.id());
            stack.extend(
                spec.sub_steps()
                    .iter()
                    .rev()
                    .map(|sub| (sub, Some(id.clone()))),
            );
            declared.push(DeclaredStep {
                id,
                parent,
                depends_on: spec.all_depends_on(),
                dependency_of: spec.all_dependency_of(),
            });
        }
        DependencyGraph::build(&declared)
    }
}

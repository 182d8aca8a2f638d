//! Upgrade manager
//!
//! Drives the step tree: finds the next actionable step, applies and skips
//! steps, and re-derives the next step after every mutation.
//!
//! # Next-step protocol
//!
//! 1. Walk the top-level steps in order, ignoring inapplicable ones.
//! 2. Initialize each step the first time it is reached (parents before
//!    their sub-steps). A step left `Unknown` is a contract violation.
//! 3. Descend into sub-steps first; the first sub-step needing action wins.
//! 4. Once no sub-step needs action, the parent itself is returned if it
//!    needs action (`Incomplete` or `Failed`).
//! 5. If nothing needs action while a project is selected, clear the
//!    project, reset project-scoped steps and start over.
//! 6. Otherwise the run is complete, unless steps were passed over for
//!    prerequisites. A pass can complete a prerequisite during initialize,
//!    so the walk is repeated; if a repeat blocks on the same steps the run
//!    is stalled and that is an error.
//!
//! The walk uses an explicit frame stack rather than recursion.

use crate::error::EngineError;
use crate::node::{StepIndex, StepNode};
use crate::report::StepReport;
use crate::tree::StepTree;
use std::collections::HashMap;
use upgrade_step::{CancellationToken, ProjectRef, StepId, UpgradeContext};

/// Result of one pass over the tree
enum Scan {
    Next(StepIndex),
    Blocked(Vec<StepId>),
    Exhausted,
}

/// Sibling list being walked
struct Frame {
    siblings: Vec<StepIndex>,
    position: usize,
    parent: Option<StepIndex>,
    /// A sibling was passed over because its prerequisites are not done
    blocked: bool,
}

impl Frame {
    fn new(siblings: Vec<StepIndex>, parent: Option<StepIndex>) -> Self {
        Self {
            siblings,
            position: 0,
            parent,
            blocked: false,
        }
    }
}

/// Owns the step tree and the session context for one run
#[derive(Debug)]
pub struct UpgradeManager {
    tree: StepTree,
    context: UpgradeContext,
}

impl UpgradeManager {
    /// Create a manager over a built step tree
    #[must_use]
    pub fn new(tree: StepTree, context: UpgradeContext) -> Self {
        Self { tree, context }
    }

    /// Session context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &UpgradeContext {
        &self.context
    }

    /// Mutable session context
    #[inline]
    pub fn context_mut(&mut self) -> &mut UpgradeContext {
        &mut self.context
    }

    /// Step tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &StepTree {
        &self.tree
    }

    /// Look up a step node
    ///
    /// # Errors
    /// `StepNotFound` for an index from another tree
    pub fn step(&self, index: StepIndex) -> Result<&StepNode, EngineError> {
        self.tree
            .get(index)
            .ok_or_else(|| EngineError::StepNotFound(format!("#{}", index.index())))
    }

    /// Look up a step by id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<StepIndex> {
        self.tree.find(id)
    }

    /// Whether a step is applicable in the current context
    #[must_use]
    pub fn is_applicable(&self, index: StepIndex) -> bool {
        self.tree
            .get(index)
            .is_some_and(|node| node.is_applicable(&self.context))
    }

    /// Find the next step that needs action
    ///
    /// Returns `None` once the whole run is complete.
    ///
    /// # Errors
    /// - `UninitializedStatus` if a step leaves its status `Unknown`
    /// - `Stalled` if steps wait on prerequisites that never become done
    /// - `Cancelled` if cancellation interrupts an initialize
    pub async fn next_step(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<StepIndex>, EngineError> {
        let mut last_blocked: Option<Vec<StepId>> = None;
        loop {
            match self.scan(cancel).await? {
                Scan::Next(index) => {
                    let node = self.tree.node(index);
                    tracing::debug!(step = %node.id(), status = %node.status(), "Next step");
                    return Ok(Some(index));
                }
                Scan::Blocked(blocked) if last_blocked.as_ref() != Some(&blocked) => {
                    tracing::debug!(blocked = blocked.len(), "Steps passed over; scanning again");
                    last_blocked = Some(blocked);
                    continue;
                }
                Scan::Blocked(blocked) if self.context.current_project().is_none() => {
                    tracing::error!(?blocked, "Steps can never run");
                    return Err(EngineError::Stalled { blocked });
                }
                Scan::Blocked(_) => {}
                Scan::Exhausted => {
                    if self.context.current_project().is_none() {
                        tracing::debug!("No remaining steps");
                        return Ok(None);
                    }
                }
            }

            tracing::info!("Project steps finished; clearing current project");
            self.select_project(None);
            last_blocked = None;
        }
    }

    /// One pass over the tree
    async fn scan(&mut self, cancel: &CancellationToken) -> Result<Scan, EngineError> {
        let mut stack = vec![Frame::new(self.tree.roots().to_vec(), None)];
        let mut blocked = Vec::new();

        while let Some(frame) = stack.last_mut() {
            if frame.position >= frame.siblings.len() {
                let Some(finished) = stack.pop() else {
                    break;
                };
                let Some(parent) = finished.parent else {
                    continue;
                };
                if finished.blocked {
                    // A parent never runs ahead of a sub-step that is waiting
                    // on a prerequisite.
                    if let Some(outer) = stack.last_mut() {
                        outer.blocked = true;
                    }
                    blocked.push(self.tree.node(parent).id().clone());
                    continue;
                }
                if self.tree.node(parent).status().needs_action() {
                    return Ok(Scan::Next(parent));
                }
                continue;
            }

            let index = frame.siblings[frame.position];
            frame.position += 1;

            if !self.tree.node(index).is_applicable(&self.context) {
                continue;
            }

            if !self.prerequisites_done(index) {
                tracing::debug!(step = %self.tree.node(index).id(), "Prerequisites not done; passing over");
                frame.blocked = true;
                blocked.push(self.tree.node(index).id().clone());
                continue;
            }

            let status = self
                .tree
                .node_mut(index)
                .initialize(&mut self.context, cancel)
                .await?;

            let children = self.tree.node(index).children().to_vec();
            if !children.is_empty() {
                stack.push(Frame::new(children, Some(index)));
                continue;
            }

            if status.needs_action() {
                return Ok(Scan::Next(index));
            }
        }

        Ok(if blocked.is_empty() {
            Scan::Exhausted
        } else {
            Scan::Blocked(blocked)
        })
    }

    /// Prerequisites that are inapplicable, or sit under an inapplicable
    /// parent, count as done
    fn prerequisites_done(&self, index: StepIndex) -> bool {
        self.tree.prerequisites(index).iter().all(|pre| {
            self.tree.node(*pre).status().is_done() || !self.reachable(*pre)
        })
    }

    /// The step and all of its ancestors are applicable
    fn reachable(&self, index: StepIndex) -> bool {
        let mut current = Some(index);
        while let Some(step) = current {
            let node = self.tree.node(step);
            if !node.is_applicable(&self.context) {
                return false;
            }
            current = node.parent();
        }
        true
    }

    /// Initialize a single step (no-op if already initialized)
    ///
    /// # Errors
    /// See [`StepNode::initialize`]
    pub async fn initialize(
        &mut self,
        index: StepIndex,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.step(index)?;
        self.tree
            .node_mut(index)
            .initialize(&mut self.context, cancel)
            .await?;
        Ok(())
    }

    /// Apply a step
    ///
    /// If the apply changed the current project, every other project-scoped
    /// step is reset so it re-initializes against the new project.
    ///
    /// # Errors
    /// See [`StepNode::apply`]
    pub async fn apply(
        &mut self,
        index: StepIndex,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        self.step(index)?;
        let project_before = self.context.current_project().cloned();

        let applied = self
            .tree
            .node_mut(index)
            .apply(&mut self.context, cancel)
            .await?;

        if self.context.current_project() != project_before.as_ref() {
            self.tree.reset_project_scoped(Some(index));
        }
        Ok(applied)
    }

    /// Skip a step and every sub-step that is not already complete or skipped
    ///
    /// Returns whether the step's status changed.
    ///
    /// # Errors
    /// `NotInitialized` if the step was never initialized
    pub fn skip(&mut self, index: StepIndex, cancel: &CancellationToken) -> Result<bool, EngineError> {
        self.step(index)?;
        if cancel.is_cancelled() {
            return Ok(false);
        }
        if !self.tree.node_mut(index).skip()? {
            return Ok(false);
        }
        for descendant in self.tree.subtree(index).into_iter().skip(1) {
            self.tree.node_mut(descendant).skip_with_parent()?;
        }
        Ok(true)
    }

    /// Reset a step and its sub-steps to `Unknown`
    ///
    /// # Errors
    /// `StepNotFound` for an index from another tree
    pub fn reset(&mut self, index: StepIndex) -> Result<(), EngineError> {
        self.step(index)?;
        self.tree.reset(index);
        Ok(())
    }

    /// Change the current project
    ///
    /// Project-scoped steps are reset when the project actually changes.
    /// Returns whether it changed.
    pub fn select_project(&mut self, project: Option<ProjectRef>) -> bool {
        let changed = self.context.set_current_project(project);
        if changed {
            self.tree.reset_project_scoped(None);
        }
        changed
    }

    /// Initialize every reachable applicable step without applying anything
    /// and report the whole tree
    ///
    /// Steps whose prerequisites are not done stay `Unknown`.
    ///
    /// # Errors
    /// Same as [`UpgradeManager::next_step`]
    pub async fn analyze(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<StepReport>, EngineError> {
        let mut pending: Vec<StepIndex> = self.tree.roots().iter().rev().copied().collect();
        while let Some(index) = pending.pop() {
            if !self.tree.node(index).is_applicable(&self.context) || !self.prerequisites_done(index)
            {
                continue;
            }
            self.tree
                .node_mut(index)
                .initialize(&mut self.context, cancel)
                .await?;
            pending.extend(self.tree.node(index).children().iter().rev().copied());
        }
        Ok(self.reports())
    }

    /// Reports for all top-level steps
    #[must_use]
    pub fn reports(&self) -> Vec<StepReport> {
        self.tree.roots().iter().map(|root| self.report(*root)).collect()
    }

    /// Report for one step and its sub-steps
    #[must_use]
    pub fn report(&self, index: StepIndex) -> StepReport {
        // Children are built before parents so each parent takes ownership of
        // its finished child reports.
        let order = self.tree.subtree(index);
        let mut built: HashMap<StepIndex, StepReport> = HashMap::with_capacity(order.len());

        for current in order.into_iter().rev() {
            let sub_steps = self
                .tree
                .node(current)
                .children()
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(current, self.snapshot(current, sub_steps));
        }

        built
            .remove(&index)
            .unwrap_or_else(|| self.snapshot(index, Vec::new()))
    }

    fn snapshot(&self, index: StepIndex, sub_steps: Vec<StepReport>) -> StepReport {
        let node = self.tree.node(index);
        StepReport {
            id: node.id().clone(),
            title: node.title().to_string(),
            description: node.description().to_string(),
            status: node.status(),
            details: node.details().to_string(),
            risk: self.tree.effective_risk(index),
            sub_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderer::StepOrderer;
    use upgrade_step::{StatusResult, StepScope, StepSpec, UpgradeStepStatus};
    use upgrade_test_utils::{Scripted, ScriptedStep};

    fn manager(specs: Vec<StepSpec>) -> UpgradeManager {
        let mut orderer = StepOrderer::new();
        for spec in specs {
            assert!(orderer.register(spec));
        }
        orderer.build(UpgradeContext::default()).unwrap()
    }

    fn id_of(manager: &UpgradeManager, index: Option<StepIndex>) -> Option<String> {
        index.map(|i| manager.step(i).unwrap().id().to_string())
    }

    #[tokio::test]
    async fn returns_none_when_everything_is_done() {
        let mut m = manager(vec![
            StepSpec::new(ScriptedStep::new("a").initializes_to(StatusResult::complete("ok"))),
            StepSpec::new(ScriptedStep::new("b").initializes_to(StatusResult::skipped("n/a"))),
        ]);
        assert_eq!(m.next_step(&CancellationToken::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn inapplicable_steps_are_never_initialized() {
        let step = ScriptedStep::new("a").applicable(false);
        let calls = step.calls();
        let mut m = manager(vec![StepSpec::new(step)]);

        assert_eq!(m.next_step(&CancellationToken::new()).await.unwrap(), None);
        assert_eq!(calls.init_calls(), 0);
    }

    #[tokio::test]
    async fn parent_is_initialized_before_children() {
        let log = upgrade_test_utils::VisitLog::default();
        let mut m = manager(vec![StepSpec::new(ScriptedStep::new("p").with_log(&log))
            .with_sub_step(StepSpec::new(ScriptedStep::new("c").with_log(&log)))]);

        let next = m.next_step(&CancellationToken::new()).await.unwrap();
        assert_eq!(id_of(&m, next).as_deref(), Some("c"));
        assert_eq!(log.entries(), vec!["init:p", "init:c"]);
    }

    #[tokio::test]
    async fn cancellation_during_initialize_is_reported() {
        let mut m = manager(vec![StepSpec::new(
            ScriptedStep::new("a").initializes_with(Scripted::Cancelled),
        )]);
        let err = m.next_step(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_cancelled());
        let a = m.find("a").unwrap();
        assert_eq!(m.step(a).unwrap().status(), UpgradeStepStatus::Unknown);
    }

    #[tokio::test]
    async fn skipping_a_parent_skips_pending_children() {
        let mut m = manager(vec![StepSpec::new(ScriptedStep::new("p"))
            .with_sub_step(StepSpec::new(ScriptedStep::new("c1")))
            .with_sub_step(StepSpec::new(ScriptedStep::new("c2")))]);
        let cancel = CancellationToken::new();

        m.next_step(&cancel).await.unwrap();
        let p = m.find("p").unwrap();
        assert!(m.skip(p, &cancel).unwrap());

        for id in ["c1", "c2"] {
            let idx = m.find(id).unwrap();
            assert_eq!(m.step(idx).unwrap().status(), UpgradeStepStatus::Skipped);
        }
        assert_eq!(m.next_step(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn skip_honours_cancellation() {
        let mut m = manager(vec![StepSpec::new(ScriptedStep::new("a"))]);
        let cancel = CancellationToken::new();
        let a = m.next_step(&cancel).await.unwrap().unwrap();

        cancel.cancel();
        assert!(!m.skip(a, &cancel).unwrap());
        assert_eq!(m.step(a).unwrap().status(), UpgradeStepStatus::Incomplete);
    }

    #[tokio::test]
    async fn selecting_a_project_resets_project_steps() {
        let project_step = ScriptedStep::new("per-project");
        let calls = project_step.calls();
        let mut m = manager(vec![
            StepSpec::new(project_step).with_scope(StepScope::Project),
            StepSpec::new(ScriptedStep::new("solution")),
        ]);
        let cancel = CancellationToken::new();

        let first = m.next_step(&cancel).await.unwrap();
        assert_eq!(id_of(&m, first).as_deref(), Some("per-project"));
        assert_eq!(calls.init_calls(), 1);

        assert!(m.select_project(Some(ProjectRef::from_path("/src/A.csproj"))));
        let idx = m.find("per-project").unwrap();
        assert_eq!(m.step(idx).unwrap().status(), UpgradeStepStatus::Unknown);

        m.next_step(&cancel).await.unwrap();
        assert_eq!(calls.init_calls(), 2);
    }

    #[tokio::test]
    async fn analyze_initializes_without_applying() {
        let child = ScriptedStep::new("c").initializes_to(StatusResult::incomplete(
            "needs work",
            upgrade_step::BuildBreakRisk::High,
        ));
        let child_calls = child.calls();
        let mut m = manager(vec![
            StepSpec::new(ScriptedStep::new("p")).with_sub_step(StepSpec::new(child)),
            StepSpec::new(ScriptedStep::new("q")),
        ]);

        let reports = m.analyze(&CancellationToken::new()).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sub_steps[0].status, UpgradeStepStatus::Incomplete);
        assert_eq!(reports[0].risk, upgrade_step::BuildBreakRisk::High);
        assert_eq!(child_calls.apply_calls(), 0);
        assert_eq!(reports[1].status, UpgradeStepStatus::Incomplete);
    }
}

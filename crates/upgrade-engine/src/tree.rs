//! Step tree arena
//!
//! Steps and sub-steps live in one flat arena. Parent/child links are arena
//! indices, so traversal never needs recursion and deep trees cannot exhaust
//! the call stack.

use crate::graph::DependencyGraph;
use crate::node::{StepIndex, StepNode};
use std::collections::HashMap;
use upgrade_step::{BuildBreakRisk, StepId, StepScope, StepSpec, UpgradeStepStatus};

/// Arena of step nodes
#[derive(Debug, Default)]
pub struct StepTree {
    nodes: Vec<StepNode>,
    roots: Vec<StepIndex>,
    by_id: HashMap<StepId, StepIndex>,
}

impl StepTree {
    /// Build the arena from top-level specs already in execution order
    ///
    /// Sub-steps of each parent are ordered with `graph`. Nodes are numbered
    /// in pre-order.
    pub(crate) fn build(roots: Vec<StepSpec>, graph: &DependencyGraph) -> Self {
        let mut tree = Self::default();
        let mut stack: Vec<(StepSpec, Option<StepIndex>)> =
            roots.into_iter().rev().map(|spec| (spec, None)).collect();

        while let Some((spec, parent)) = stack.pop() {
            let parts = spec.into_parts();
            let children = order_specs(parts.sub_steps, graph);

            let index = StepIndex(tree.nodes.len());
            let node = StepNode::new(parts.step, parts.applicability, parts.scope, parent);
            tree.by_id.insert(node.id().clone(), index);
            tree.nodes.push(node);

            match parent {
                Some(parent) => tree.nodes[parent.0].children.push(index),
                None => tree.roots.push(index),
            }

            stack.extend(children.into_iter().rev().map(|child| (child, Some(index))));
        }

        for position in 0..tree.nodes.len() {
            let prerequisites: Vec<StepIndex> = graph
                .prerequisites(tree.nodes[position].id().as_str())
                .iter()
                .filter_map(|id| tree.by_id.get(id).copied())
                .collect();
            tree.nodes[position].prerequisites = prerequisites;
        }

        tree
    }

    /// Top-level steps in execution order
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[StepIndex] {
        &self.roots
    }

    /// Number of nodes, including sub-steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree has no steps
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by index
    #[inline]
    #[must_use]
    pub fn get(&self, index: StepIndex) -> Option<&StepNode> {
        self.nodes.get(index.0)
    }

    /// Look up a node by id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<StepIndex> {
        self.by_id.get(id).copied()
    }

    /// Node by index; indices handed out by this tree are always valid
    #[inline]
    pub(crate) fn node(&self, index: StepIndex) -> &StepNode {
        &self.nodes[index.0]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: StepIndex) -> &mut StepNode {
        &mut self.nodes[index.0]
    }

    /// Steps that must be done before `index` may be initialized
    #[inline]
    pub(crate) fn prerequisites(&self, index: StepIndex) -> &[StepIndex] {
        &self.nodes[index.0].prerequisites
    }

    /// `index` and all of its descendants, parents first
    #[must_use]
    pub fn subtree(&self, index: StepIndex) -> Vec<StepIndex> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.node(current).children.iter().rev().copied());
        }
        out
    }

    /// All indices in pre-order
    pub fn indices(&self) -> impl Iterator<Item = StepIndex> + '_ {
        (0..self.nodes.len()).map(StepIndex)
    }

    /// Max risk over the step and its initialized, not skipped descendants
    #[must_use]
    pub fn effective_risk(&self, index: StepIndex) -> BuildBreakRisk {
        self.subtree(index)
            .into_iter()
            .map(|i| self.node(i))
            .filter(|node| {
                !matches!(
                    node.status(),
                    UpgradeStepStatus::Unknown | UpgradeStepStatus::Skipped
                )
            })
            .map(StepNode::risk)
            .max()
            .unwrap_or(BuildBreakRisk::Unknown)
    }

    /// Reset a node and its descendants
    pub fn reset(&mut self, index: StepIndex) {
        for i in self.subtree(index) {
            self.node_mut(i).reset();
        }
    }

    /// Reset every project-scoped subtree except the one rooted at `except`
    pub(crate) fn reset_project_scoped(&mut self, except: Option<StepIndex>) {
        let scoped: Vec<StepIndex> = self
            .indices()
            .filter(|i| Some(*i) != except && self.node(*i).scope() == StepScope::Project)
            .collect();
        for index in scoped {
            self.reset(index);
        }
    }
}

/// Reorder sibling specs by their dependency edges
fn order_specs(specs: Vec<StepSpec>, graph: &DependencyGraph) -> Vec<StepSpec> {
    if specs.len() < 2 {
        return specs;
    }
    let ids: Vec<StepId> = specs.iter().map(|s| StepId::from(s.id())).collect();
    let order = graph.order(&ids);
    let mut by_id: HashMap<StepId, StepSpec> = ids.into_iter().zip(specs).collect();
    order.iter().filter_map(|id| by_id.remove(id)).collect()
}

//! Step dependency graph
//!
//! Reconciles `depends_on` and `dependency_of` declarations into one directed
//! graph (edge `a -> b` means `a` must be done before `b`), validates it, and
//! produces stable topological orderings of sibling groups.
//!
//! Containment is checked too: a sub-step is always done before its parent,
//! so cycle detection adds a `child -> parent` edge for every sub-step.
//! Those edges never constrain sibling order or prerequisites.

use crate::error::EngineError;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};
use upgrade_step::StepId;

/// Dependency declarations of one registered step
#[derive(Debug, Clone)]
pub(crate) struct DeclaredStep {
    pub(crate) id: StepId,
    pub(crate) parent: Option<StepId>,
    pub(crate) depends_on: Vec<StepId>,
    pub(crate) dependency_of: Vec<StepId>,
}

/// Validated, acyclic dependency graph
///
/// Node indices follow registration order, which is what makes the
/// topological sort and cycle reports deterministic.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<StepId, ()>,
    index: HashMap<StepId, NodeIndex>,
}

impl DependencyGraph {
    /// Build and validate the graph
    ///
    /// # Errors
    /// - `DuplicateStep` if two declarations share an id
    /// - `MissingDependency` if an edge names an unregistered id
    /// - `CyclicDependency` if the reconciled graph has a cycle
    pub(crate) fn build(steps: &[DeclaredStep]) -> Result<Self, EngineError> {
        let mut graph = DiGraph::with_capacity(steps.len(), steps.len());
        let mut index = HashMap::with_capacity(steps.len());

        for step in steps {
            if index.contains_key(&step.id) {
                return Err(EngineError::DuplicateStep(step.id.clone()));
            }
            let node = graph.add_node(step.id.clone());
            index.insert(step.id.clone(), node);
        }

        for step in steps {
            let node = index[&step.id];
            for dependency in &step.depends_on {
                let from = resolve(&index, &step.id, dependency)?;
                graph.update_edge(from, node, ());
            }
            for dependent in &step.dependency_of {
                let to = resolve(&index, &step.id, dependent)?;
                graph.update_edge(node, to, ());
            }
        }

        let built = Self { graph, index };
        built.check_acyclic(steps)?;
        Ok(built)
    }

    /// Fail with the first cycle, members listed in registration order
    fn check_acyclic(&self, steps: &[DeclaredStep]) -> Result<(), EngineError> {
        let mut execution = self.graph.clone();
        for step in steps {
            if let Some(parent) = &step.parent {
                let child = self.index[&step.id];
                let parent = resolve(&self.index, &step.id, parent)?;
                execution.update_edge(child, parent, ());
            }
        }

        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&execution)
            .into_iter()
            .filter(|scc| scc.len() > 1 || execution.contains_edge(scc[0], scc[0]))
            .collect();

        for cycle in &mut cycles {
            cycle.sort_by_key(|n| n.index());
        }
        cycles.sort_by_key(|cycle| cycle[0].index());

        match cycles.first() {
            Some(cycle) => Err(EngineError::CyclicDependency {
                cycle: cycle.iter().map(|n| self.graph[*n].clone()).collect(),
            }),
            None => Ok(()),
        }
    }

    /// Stable topological order of `members`
    ///
    /// Only edges between members constrain the order. Among steps whose
    /// predecessors are all placed, the one listed first in `members` wins.
    pub(crate) fn order(&self, members: &[StepId]) -> Vec<StepId> {
        let position: HashMap<NodeIndex, usize> = members
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| self.index.get(id).map(|node| (*node, pos)))
            .collect();

        let mut in_degree = vec![0usize; members.len()];
        for (&node, &pos) in &position {
            in_degree[pos] = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter(|pred| position.contains_key(pred))
                .count();
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(pos, _)| pos)
            .collect();

        let mut ordered = Vec::with_capacity(members.len());
        while let Some(pos) = ready.pop_first() {
            ordered.push(members[pos].clone());
            let Some(&node) = self.index.get(&members[pos]) else {
                continue;
            };
            for successor in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(&succ_pos) = position.get(&successor) {
                    in_degree[succ_pos] -= 1;
                    if in_degree[succ_pos] == 0 {
                        ready.insert(succ_pos);
                    }
                }
            }
        }

        ordered
    }

    /// Ids that must be done before `id`, in registration order
    pub(crate) fn prerequisites(&self, id: &str) -> Vec<StepId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut preds: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        preds.sort_by_key(|n| n.index());
        preds.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}

fn resolve(
    index: &HashMap<StepId, NodeIndex>,
    step: &StepId,
    target: &StepId,
) -> Result<NodeIndex, EngineError> {
    index
        .get(target)
        .copied()
        .ok_or_else(|| EngineError::MissingDependency {
            step: step.clone(),
            dependency: target.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(id: &str, depends_on: &[&str], dependency_of: &[&str]) -> DeclaredStep {
        DeclaredStep {
            id: StepId::from(id),
            parent: None,
            depends_on: depends_on.iter().map(|s| StepId::from(*s)).collect(),
            dependency_of: dependency_of.iter().map(|s| StepId::from(*s)).collect(),
        }
    }

    fn ids(names: &[&str]) -> Vec<StepId> {
        names.iter().map(|s| StepId::from(*s)).collect()
    }

    fn names(ids: &[StepId]) -> Vec<&str> {
        ids.iter().map(StepId::as_str).collect()
    }

    #[test]
    fn independent_steps_keep_registration_order() {
        let graph = DependencyGraph::build(&[
            declared("c", &[], &[]),
            declared("a", &[], &[]),
            declared("b", &[], &[]),
        ])
        .unwrap();
        assert_eq!(names(&graph.order(&ids(&["c", "a", "b"]))), vec!["c", "a", "b"]);
    }

    #[test]
    fn depends_on_moves_dependency_first() {
        let graph = DependencyGraph::build(&[
            declared("a", &["c"], &[]),
            declared("b", &[], &[]),
            declared("c", &[], &[]),
        ])
        .unwrap();
        assert_eq!(names(&graph.order(&ids(&["a", "b", "c"]))), vec!["b", "c", "a"]);
    }

    #[test]
    fn dependency_of_is_reconciled_with_depends_on() {
        // "c" declares itself a dependency of "a"; "a" never mentions "c".
        let graph = DependencyGraph::build(&[
            declared("a", &[], &[]),
            declared("b", &[], &[]),
            declared("c", &[], &["a"]),
        ])
        .unwrap();
        assert_eq!(names(&graph.order(&ids(&["a", "b", "c"]))), vec!["b", "c", "a"]);
        assert_eq!(names(&graph.prerequisites("a")), vec!["c"]);
    }

    #[test]
    fn both_directions_declared_once() {
        let graph = DependencyGraph::build(&[
            declared("a", &["b"], &[]),
            declared("b", &[], &["a"]),
        ])
        .unwrap();
        assert_eq!(graph.prerequisites("a").len(), 1);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let err = DependencyGraph::build(&[declared("a", &["x"], &[])]).unwrap_err();
        match err {
            EngineError::MissingDependency { step, dependency } => {
                assert_eq!(step.as_str(), "a");
                assert_eq!(dependency.as_str(), "x");
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = DependencyGraph::build(&[declared("a", &[], &[]), declared("a", &[], &[])])
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateStep(id) if id.as_str() == "a"));
    }

    #[test]
    fn cycles_are_reported_in_registration_order() {
        let err = DependencyGraph::build(&[
            declared("x", &[], &[]),
            declared("c", &["b"], &[]),
            declared("a", &["c"], &[]),
            declared("b", &["a"], &[]),
        ])
        .unwrap_err();
        match err {
            EngineError::CyclicDependency { cycle } => {
                assert_eq!(names(&cycle), vec!["c", "a", "b"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = DependencyGraph::build(&[declared("a", &["a"], &[])]).unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { cycle } if cycle.len() == 1));
    }

    fn child_of(parent: &str, mut step: DeclaredStep) -> DeclaredStep {
        step.parent = Some(StepId::from(parent));
        step
    }

    #[test]
    fn sub_step_depending_on_its_parent_is_a_cycle() {
        let err = DependencyGraph::build(&[
            declared("parent", &[], &[]),
            child_of("parent", declared("child", &["parent"], &[])),
        ])
        .unwrap_err();
        match err {
            EngineError::CyclicDependency { cycle } => {
                assert_eq!(names(&cycle), vec!["parent", "child"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn sub_steps_waiting_on_each_others_parents_are_a_cycle() {
        let err = DependencyGraph::build(&[
            declared("a", &[], &[]),
            child_of("a", declared("a1", &["b"], &[])),
            declared("b", &[], &[]),
            child_of("b", declared("b1", &["a"], &[])),
        ])
        .unwrap_err();
        match err {
            EngineError::CyclicDependency { cycle } => {
                assert_eq!(names(&cycle), vec!["a", "a1", "b", "b1"]);
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn containment_does_not_constrain_order_or_prerequisites() {
        let graph = DependencyGraph::build(&[
            declared("a", &[], &[]),
            child_of("a", declared("a1", &["b"], &[])),
            declared("b", &[], &[]),
        ])
        .unwrap();
        assert_eq!(names(&graph.order(&ids(&["a", "b"]))), vec!["a", "b"]);
        assert!(graph.prerequisites("a").is_empty());
        assert_eq!(names(&graph.prerequisites("a1")), vec!["b"]);
    }

    #[test]
    fn order_ignores_edges_to_non_members() {
        let graph = DependencyGraph::build(&[
            declared("outer", &[], &[]),
            declared("a", &["outer"], &[]),
            declared("b", &[], &[]),
        ])
        .unwrap();
        assert_eq!(names(&graph.order(&ids(&["a", "b"]))), vec!["a", "b"]);
    }
}

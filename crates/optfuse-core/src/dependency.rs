//! Operator-level dependency analysis.
//!
//! Operators never link to each other directly; data flows operator →
//! variable → operator. The analyzer collapses those two hops into an
//! operator → operator relation, ignoring control variables.

use crate::Result;
use crate::ir::{IrGraph, IrNodeId};
use std::collections::{HashMap, HashSet};

/// Topological order restricted to operator nodes.
pub fn topological_operators(graph: &IrGraph) -> Vec<IrNodeId> {
    graph
        .topological_order()
        .into_iter()
        .filter(|&id| graph.node(id).is_ok_and(|node| node.is_op()))
        .collect()
}

/// Preceding and following operators of every operator, via data variables.
#[derive(Debug, Default)]
pub struct OpDependencies {
    preceding: HashMap<IrNodeId, HashSet<IrNodeId>>,
    following: HashMap<IrNodeId, HashSet<IrNodeId>>,
}

impl OpDependencies {
    /// Build the relation for every operator in `operators`.
    pub fn build(graph: &IrGraph, operators: &[IrNodeId]) -> Result<Self> {
        let mut deps = Self::default();

        for &op in operators {
            deps.preceding.entry(op).or_default();
            deps.following.entry(op).or_default();

            for var in graph.outputs(op) {
                if graph.node(var)?.is_ctrl_var() {
                    continue;
                }
                for consumer in graph.outputs(var) {
                    if !graph.node(consumer)?.is_op() {
                        continue;
                    }
                    deps.preceding.entry(consumer).or_default().insert(op);
                    deps.following.entry(op).or_default().insert(consumer);
                }
            }
        }

        Ok(deps)
    }

    /// Operators whose outputs `op` reads directly.
    pub fn preceding(&self, op: IrNodeId) -> Option<&HashSet<IrNodeId>> {
        self.preceding.get(&op)
    }

    /// Operators that directly read an output of `op`.
    pub fn following(&self, op: IrNodeId) -> Option<&HashSet<IrNodeId>> {
        self.following.get(&op)
    }

    /// Every operator transitively downstream of `op`.
    pub fn downstream(&self, op: IrNodeId) -> HashSet<IrNodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<IrNodeId> = self
            .following(op)
            .map(|ops| ops.iter().copied().collect())
            .unwrap_or_default();

        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(ops) = self.following(next) {
                stack.extend(ops.iter().copied());
            }
        }

        seen
    }
}

/// Check whether any candidate depends on another through data variables.
///
/// A direct link (candidate → variable → candidate) and an indirect one
/// through other operators both count: collapsing either pair into one node
/// would put the fused node on both ends of a dependency path.
pub fn has_illegal_cross_dependency(
    graph: &IrGraph,
    operators: &[IrNodeId],
    candidates: &[IrNodeId],
) -> Result<bool> {
    let deps = OpDependencies::build(graph, operators)?;
    let candidate_set: HashSet<IrNodeId> = candidates.iter().copied().collect();

    let intersects = |ops: Option<&HashSet<IrNodeId>>| {
        ops.is_some_and(|ops| !ops.is_disjoint(&candidate_set))
    };

    for &candidate in candidates {
        if intersects(deps.preceding(candidate)) || intersects(deps.following(candidate)) {
            return Ok(true);
        }
    }

    for &candidate in candidates {
        if !deps.downstream(candidate).is_disjoint(&candidate_set) {
            return Ok(true);
        }
    }

    Ok(false)
}

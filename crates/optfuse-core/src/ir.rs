//! Intermediate representation for the dataflow graph.
//!
//! The IR is a directed graph with three kinds of nodes:
//! - **Operators** (`NodeKind::Operator`) carrying an `OpDesc`
//! - **Variables** (`NodeKind::Variable`) carrying a `VarDesc`
//! - **Control variables** (`NodeKind::ControlVariable`) that only order
//!   operators and carry no data
//!
//! Links always connect an operator to a variable or a variable to an
//! operator. A node's inputs and outputs are both read off the same petgraph
//! edge set, so the two directions can never disagree. The same logical tensor
//! may appear as several variable nodes (a parameter read and then written by
//! an optimizer is two nodes with one name).

use crate::desc::{OpDesc, VarDesc};
use crate::{Error, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Type alias for IR node identifiers (backed by petgraph NodeIndex).
///
/// Identifiers stay valid when other nodes are removed.
pub type IrNodeId = NodeIndex;

/// Prefix of generated control-variable names.
pub const CONTROL_VAR_PREFIX: &str = "@CTRL_VAR@";

// ──────────────────────────────── IrGraph ────────────────────────────────

/// Intermediate representation graph.
pub struct IrGraph {
    graph: StableGraph<IrNode, ()>,

    /// Counter for generated control-variable names.
    next_control_var: usize,
}

impl IrGraph {
    /// Create a new empty IR graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            next_control_var: 0,
        }
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: IrNodeId) -> Result<&IrNode> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: IrNodeId) -> Result<&mut IrNode> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Get the operator descriptor of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or is not an operator.
    pub fn op(&self, id: IrNodeId) -> Result<&OpDesc> {
        let node = self.node(id)?;
        node.op()
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} ({}) is not an operator", id, node.name)))
    }

    /// Check whether a node is still part of the graph.
    pub fn contains(&self, id: IrNodeId) -> bool {
        self.graph.contains_node(id)
    }

    /// Iterate over all nodes in the graph, in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (IrNodeId, &IrNode)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    /// Iterate over all operator nodes.
    pub fn operators(&self) -> impl Iterator<Item = (IrNodeId, &OpDesc)> {
        self.nodes()
            .filter_map(|(id, node)| node.op().map(|op| (id, op)))
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of links in the graph.
    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes linking into `id`, in ascending id order.
    pub fn inputs(&self, id: IrNodeId) -> Vec<IrNodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Nodes `id` links into, in ascending id order.
    pub fn outputs(&self, id: IrNodeId) -> Vec<IrNodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: IrNodeId, direction: Direction) -> Vec<IrNodeId> {
        let mut neighbors: Vec<IrNodeId> = self.graph.neighbors_directed(id, direction).collect();
        neighbors.sort();
        neighbors
    }

    /// Check whether `from` links directly into `to`.
    pub fn has_link(&self, from: IrNodeId, to: IrNodeId) -> bool {
        self.graph.find_edge(from, to).is_some()
    }

    // ── Graph mutation ──

    /// Add a new node to the graph and return its ID.
    pub fn add_node(&mut self, node: IrNode) -> IrNodeId {
        self.graph.add_node(node)
    }

    /// Add an operator node.
    pub fn add_operator(&mut self, desc: OpDesc) -> IrNodeId {
        self.add_node(IrNode::operator(desc))
    }

    /// Add a variable node.
    pub fn add_variable(&mut self, desc: VarDesc) -> IrNodeId {
        self.add_node(IrNode::variable(desc))
    }

    /// Add a control variable with a generated, graph-unique name.
    pub fn add_control_variable(&mut self) -> IrNodeId {
        let name = format!("{}{}", CONTROL_VAR_PREFIX, self.next_control_var);
        self.next_control_var += 1;
        self.add_node(IrNode::control_variable(name))
    }

    /// Order `after` behind `before` through a fresh control variable.
    ///
    /// Returns the control variable's ID.
    pub fn add_control_dependency(&mut self, before: IrNodeId, after: IrNodeId) -> Result<IrNodeId> {
        self.op(before)?;
        self.op(after)?;
        let ctrl = self.add_control_variable();
        self.link(before, ctrl)?;
        self.link(ctrl, after)?;
        Ok(ctrl)
    }

    /// Link `from` into `to`.
    ///
    /// Linking an already-linked pair is a no-op, so adjacency never holds
    /// the same neighbour twice.
    pub fn link(&mut self, from: IrNodeId, to: IrNodeId) -> Result<()> {
        self.node(from)?;
        self.node(to)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Remove the link from `from` into `to`. Returns whether it existed.
    pub fn unlink(&mut self, from: IrNodeId, to: IrNodeId) -> bool {
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    /// Remove a node and every link touching it.
    ///
    /// With `StableGraph`, other node indices remain valid.
    pub fn remove_node(&mut self, id: IrNodeId) -> Result<IrNode> {
        self.graph
            .remove_node(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    // ── Graph queries ──

    /// Get the topological order of all nodes in the graph.
    ///
    /// Every node appears after all nodes linking into it. Among nodes that are
    /// ready at the same time the smallest id comes first, so independent
    /// operators keep the order they were added in. Nodes on a cycle are
    /// omitted.
    pub fn topological_order(&self) -> Vec<IrNodeId> {
        let mut in_degree: HashMap<IrNodeId, usize> = HashMap::new();
        let mut ready = BinaryHeap::new();
        for id in self.graph.node_indices() {
            let degree = self.graph.neighbors_directed(id, Direction::Incoming).count();
            if degree == 0 {
                ready.push(Reverse(id));
            }
            in_degree.insert(id, degree);
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for next in self.graph.neighbors_directed(id, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        order
    }

    /// Find all operators of a given type, in ascending id order.
    pub fn find_operators(&self, op_type: &str) -> Vec<IrNodeId> {
        self.operators()
            .filter(|(_, op)| op.op_type == op_type)
            .map(|(id, _)| id)
            .collect()
    }

    /// Find the first variable node with the given name.
    pub fn find_variable(&self, name: &str) -> Option<IrNodeId> {
        self.nodes()
            .find(|(_, node)| node.is_var() && node.name == name)
            .map(|(id, _)| id)
    }
}

impl Default for IrGraph {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── IrNode ─────────────────────────────────

/// What a node represents.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// An operator.
    Operator(OpDesc),

    /// A data-carrying variable.
    Variable(VarDesc),

    /// An ordering-only dependency between operators.
    ControlVariable,
}

/// A node in the IR graph.
#[derive(Debug, Clone)]
pub struct IrNode {
    /// Operator type for operators, variable name for variables.
    pub name: String,

    pub kind: NodeKind,
}

impl IrNode {
    /// Create an operator node.
    pub fn operator(desc: OpDesc) -> Self {
        Self {
            name: desc.op_type.clone(),
            kind: NodeKind::Operator(desc),
        }
    }

    /// Create a variable node.
    pub fn variable(desc: VarDesc) -> Self {
        Self {
            name: desc.name.clone(),
            kind: NodeKind::Variable(desc),
        }
    }

    /// Create a control-variable node.
    pub fn control_variable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::ControlVariable,
        }
    }

    pub fn is_op(&self) -> bool {
        matches!(self.kind, NodeKind::Operator(_))
    }

    /// True for data variables and control variables alike.
    pub fn is_var(&self) -> bool {
        matches!(self.kind, NodeKind::Variable(_) | NodeKind::ControlVariable)
    }

    pub fn is_ctrl_var(&self) -> bool {
        matches!(self.kind, NodeKind::ControlVariable)
    }

    pub fn op(&self) -> Option<&OpDesc> {
        match &self.kind {
            NodeKind::Operator(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn var(&self) -> Option<&VarDesc> {
        match &self.kind {
            NodeKind::Variable(desc) => Some(desc),
            _ => None,
        }
    }
}

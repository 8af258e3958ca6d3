//! Name → variable-node lookup.

use crate::desc::VarDesc;
use crate::ir::{IrGraph, IrNodeId};
use crate::types::{DataType, VarKind};
use crate::{Error, Result};
use std::collections::HashMap;

/// Index from variable name to every variable node carrying that name.
///
/// The same tensor can be materialised as several nodes (for example a
/// parameter that an optimizer reads and writes). Node lists are in ascending
/// id order. Control variables are not indexed.
#[derive(Debug, Clone, Default)]
pub struct VarIndex {
    vars: HashMap<String, Vec<IrNodeId>>,
}

impl VarIndex {
    /// Build the index in one pass over the graph.
    pub fn build(graph: &IrGraph) -> Self {
        let mut vars: HashMap<String, Vec<IrNodeId>> = HashMap::new();
        for (id, node) in graph.nodes() {
            if let Some(var) = node.var() {
                vars.entry(var.name.clone()).or_default().push(id);
            }
        }
        Self { vars }
    }

    /// All nodes for a name (empty if the name is unknown).
    pub fn nodes(&self, name: &str) -> &[IrNodeId] {
        self.vars.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.nodes(name).is_empty()
    }

    /// Number of distinct variable names.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Descriptor of the first node carrying `name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no variable node has this name.
    pub fn desc<'g>(&self, graph: &'g IrGraph, name: &str) -> Result<&'g VarDesc> {
        let first = self
            .nodes(name)
            .first()
            .ok_or_else(|| Error::NotFound(format!("The variable {} is not found", name)))?;
        graph.node(*first)?.var().ok_or_else(|| {
            Error::InvalidArgument(format!("The variable {} has no descriptor", name))
        })
    }

    pub fn dtype(&self, graph: &IrGraph, name: &str) -> Result<DataType> {
        Ok(self.desc(graph, name)?.dtype)
    }

    pub fn kind(&self, graph: &IrGraph, name: &str) -> Result<VarKind> {
        Ok(self.desc(graph, name)?.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::OpDesc;

    #[test]
    fn test_groups_nodes_by_name() {
        let mut graph = IrGraph::new();
        let w_in = graph.add_variable(VarDesc::dense("w", DataType::F32));
        let op = graph.add_operator(OpDesc::new("sgd"));
        let w_out = graph.add_variable(VarDesc::dense("w", DataType::F32));
        graph.add_variable(VarDesc::dense("b", DataType::F16));
        graph.add_control_variable();
        graph.link(w_in, op).unwrap();
        graph.link(op, w_out).unwrap();

        let index = VarIndex::build(&graph);
        assert_eq!(index.len(), 2);
        assert_eq!(index.nodes("w"), &[w_in, w_out]);
        assert_eq!(index.dtype(&graph, "b").unwrap(), DataType::F16);
        assert_eq!(index.kind(&graph, "w").unwrap(), VarKind::DenseTensor);
        assert!(index.nodes("missing").is_empty());
    }

    #[test]
    fn test_missing_name_is_not_found() {
        let graph = IrGraph::new();
        let index = VarIndex::build(&graph);
        assert!(index.is_empty());
        assert!(matches!(index.desc(&graph, "w"), Err(Error::NotFound(_))));
    }
}

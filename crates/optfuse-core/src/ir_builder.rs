//! Build IR graphs from programs.

use crate::ir::{IrGraph, IrNodeId};
use crate::program::ProgramDesc;
use crate::{Error, Result};
use std::collections::HashMap;

impl IrGraph {
    /// Build an IR graph from a program.
    ///
    /// # Process
    ///
    /// Operators are visited in program order:
    /// 1. Every input name resolves to the most recent variable node with that
    ///    name, created from the program's declaration on first use.
    /// 2. Every output name gets a fresh variable node, which becomes the most
    ///    recent node for that name.
    ///
    /// A variable that is read and then written in place (a parameter updated
    /// by its optimizer) therefore shows up as two nodes sharing a name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if an operator references an undeclared variable.
    pub fn from_program(program: &ProgramDesc) -> Result<Self> {
        let mut graph = IrGraph::new();
        let mut latest: HashMap<String, IrNodeId> = HashMap::new();

        for op in &program.ops {
            let op_id = graph.add_operator(op.clone());

            for name in op.input_names() {
                let var_id = match latest.get(name) {
                    Some(&id) => id,
                    None => {
                        let id = graph.add_variable(declared(program, op.op_type(), name)?);
                        latest.insert(name.to_string(), id);
                        id
                    }
                };
                graph.link(var_id, op_id)?;
            }

            for name in op.output_names() {
                let var_id = graph.add_variable(declared(program, op.op_type(), name)?);
                graph.link(op_id, var_id)?;
                latest.insert(name.to_string(), var_id);
            }
        }

        tracing::debug!(
            num_ops = program.ops.len(),
            num_nodes = graph.node_count(),
            "built graph from program"
        );

        Ok(graph)
    }
}

fn declared(program: &ProgramDesc, op_type: &str, name: &str) -> Result<crate::desc::VarDesc> {
    program.var(name).cloned().ok_or_else(|| {
        Error::NotFound(format!(
            "Operator {} references undeclared variable: {}",
            op_type, name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{OpDesc, VarDesc};
    use crate::types::DataType;
    use crate::var_index::VarIndex;

    #[test]
    fn test_in_place_update_creates_two_nodes() {
        let mut program = ProgramDesc::new();
        program
            .add_var(VarDesc::dense("w", DataType::F32).persistable())
            .add_var(VarDesc::dense("w@GRAD", DataType::F32))
            .add_var(VarDesc::dense("lr", DataType::F32));

        let mut sgd = OpDesc::new("sgd");
        sgd.set_input("Param", ["w"])
            .set_input("Grad", ["w@GRAD"])
            .set_input("LearningRate", ["lr"])
            .set_output("ParamOut", ["w"]);
        program.append_op(sgd);

        let graph = IrGraph::from_program(&program).unwrap();
        assert_eq!(graph.node_count(), 5);

        let index = VarIndex::build(&graph);
        let w_nodes = index.nodes("w");
        assert_eq!(w_nodes.len(), 2);

        let op = graph.find_operators("sgd")[0];
        assert!(graph.has_link(w_nodes[0], op));
        assert!(graph.has_link(op, w_nodes[1]));
    }

    #[test]
    fn test_reader_after_writer_sees_new_node() {
        let mut program = ProgramDesc::new();
        program
            .add_var(VarDesc::dense("x", DataType::F32))
            .add_var(VarDesc::dense("y", DataType::F32));

        let mut producer = OpDesc::new("fill");
        producer.set_output("Out", ["x"]);
        program.append_op(producer);

        let mut consumer = OpDesc::new("relu");
        consumer.set_input("X", ["x"]).set_output("Out", ["y"]);
        program.append_op(consumer);

        let graph = IrGraph::from_program(&program).unwrap();
        let fill = graph.find_operators("fill")[0];
        let relu = graph.find_operators("relu")[0];
        let x = graph.outputs(fill)[0];
        assert_eq!(graph.outputs(x), vec![relu]);
    }

    #[test]
    fn test_undeclared_variable_fails() {
        let mut program = ProgramDesc::new();
        let mut op = OpDesc::new("relu");
        op.set_input("X", ["ghost"]);
        program.append_op(op);

        let err = IrGraph::from_program(&program).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

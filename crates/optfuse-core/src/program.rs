//! Side programs: flat operator lists run outside the main graph.
//!
//! Passes that move tensors into contiguous buffers cannot express the
//! allocation inside the graph they are rewriting. Instead they append
//! `coalesce_tensor` descriptions to a program that the executor runs before
//! the main program.

use crate::desc::{OpDesc, VarDesc};
use crate::types::DataType;

/// Operator type of the coalescing operator.
pub const COALESCE_TENSOR_OP: &str = "coalesce_tensor";

/// A single-block program: declared variables plus an ordered operator list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramDesc {
    pub vars: Vec<VarDesc>,
    pub ops: Vec<OpDesc>,
}

impl ProgramDesc {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable, replacing an earlier declaration of the same name.
    pub fn add_var(&mut self, var: VarDesc) -> &mut Self {
        match self.vars.iter_mut().find(|v| v.name == var.name) {
            Some(existing) => *existing = var,
            None => self.vars.push(var),
        }
        self
    }

    /// Look up a declared variable.
    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Append an operator and return a handle to it.
    pub fn append_op(&mut self, op: OpDesc) -> &mut OpDesc {
        self.ops.push(op);
        let last = self.ops.len() - 1;
        &mut self.ops[last]
    }

    /// Append a `coalesce_tensor` operator.
    ///
    /// The operator lays `outputs` out in one buffer named `fused_output`,
    /// using `inputs` as the source tensors. With `copy_data` the current
    /// values are copied into the buffer; otherwise only the memory is
    /// shared. `check_name` asks the kernel to verify that inputs and outputs
    /// are the same variables.
    pub fn append_coalesce_tensor_op(
        &mut self,
        inputs: &[String],
        outputs: &[String],
        fused_output: &str,
        dtype: DataType,
        copy_data: bool,
        check_name: bool,
    ) -> &mut OpDesc {
        let mut op = OpDesc::new(COALESCE_TENSOR_OP);
        op.set_input("Input", inputs.iter().cloned())
            .set_output("Output", outputs.iter().cloned())
            .set_output("FusedOutput", [fused_output])
            .set_attr("copy_data", copy_data)
            .set_attr("check_name", check_name)
            .set_attr("dtype", dtype.proto_code());
        self.append_op(op)
    }
}

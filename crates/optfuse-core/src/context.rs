//! Compilation-wide annotations shared between passes.
//!
//! Passes cannot keep state of their own across invocations, so everything a
//! later pass (or the executor) needs to know about an earlier one is recorded
//! here. Each field has one writer: the pass documented on it.

use crate::program::ProgramDesc;
use crate::types::VarKind;
use std::collections::{BTreeMap, BTreeSet};

/// Prefix of every variable synthesized for a contiguous buffer.
pub const FUSED_VAR_PREFIX: &str = "@FUSEDVAR@";

/// Description of a variable that only exists at runtime, outside the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarInfo {
    pub name: String,
    pub kind: VarKind,
    pub persistable: bool,
}

impl VarInfo {
    /// A non-persistable dense tensor.
    pub fn dense(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::DenseTensor,
            persistable: false,
        }
    }
}

/// Annotations threaded through every pass of one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    /// Optimizer op type already fused in this graph (fuse-optimizer pass).
    pub fused_opt_type: Option<String>,

    /// Contiguous-buffer variables to create before execution
    /// (coalesce-gradient and fuse-optimizer passes).
    pub fused_vars: BTreeMap<String, VarInfo>,

    /// Fused gradient buckets, one per dtype group (coalesce-gradient pass).
    pub fused_grads: Option<Vec<String>>,

    /// Variables exempt from memory reuse (coalesce-gradient and
    /// fuse-optimizer passes).
    pub pinned_vars: BTreeSet<String>,

    /// `(param, grad)` pairs laid out in fused gradient buckets, in bucket
    /// order (coalesce-gradient pass).
    pub params_and_dense_grads: Option<Vec<(String, String)>>,

    /// Programs to run before the main program on every step.
    pub program_descs: Vec<ProgramDesc>,

    /// Programs to run once, before the first step.
    pub startup_program_descs: Vec<ProgramDesc>,
}

impl CompilationContext {
    /// Create a context with no annotations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a fused variable name is already taken.
    pub fn has_fused_var(&self, name: &str) -> bool {
        self.fused_vars.contains_key(name)
    }

    /// Append an empty program to `program_descs` and return it.
    pub fn push_program(&mut self) -> &mut ProgramDesc {
        self.program_descs.push(ProgramDesc::new());
        let last = self.program_descs.len() - 1;
        &mut self.program_descs[last]
    }

    /// Total number of operators across all per-step side programs.
    pub fn side_program_op_count(&self) -> usize {
        self.program_descs.iter().map(|p| p.ops.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::OpDesc;

    #[test]
    fn test_fused_var_registry() {
        let mut ctx = CompilationContext::new();
        assert!(!ctx.has_fused_var("@FUSEDVAR@_sgd_Param_w"));

        let info = VarInfo::dense("@FUSEDVAR@_sgd_Param_w");
        ctx.fused_vars.insert(info.name.clone(), info);
        assert!(ctx.has_fused_var("@FUSEDVAR@_sgd_Param_w"));
        assert!(!ctx.fused_vars["@FUSEDVAR@_sgd_Param_w"].persistable);
    }

    #[test]
    fn test_push_program() {
        let mut ctx = CompilationContext::new();
        ctx.push_program().append_op(OpDesc::new("coalesce_tensor"));
        ctx.push_program();

        assert_eq!(ctx.program_descs.len(), 2);
        assert_eq!(ctx.side_program_op_count(), 1);
        assert!(ctx.startup_program_descs.is_empty());
    }
}

//! Gradient coalescing pass.
//!
//! Lays the dense gradients of every optimizer operator out in contiguous
//! buffers, one per element type, and records the layout so that optimizer
//! fusion can reuse the buffers instead of allocating its own.

use crate::families::{FamilyRegistry, GRAD, PARAM};
use optfuse_core::{
    CompilationContext, DataType, Error, FUSED_VAR_PREFIX, IrGraph, KernelRegistry, Pass, Result,
    Stage, VarIndex, VarInfo, topological_operators,
};

/// Pass that coalesces dense gradients into per-dtype buckets.
pub struct CoalesceGradTensorPass {
    op_types: Vec<String>,
}

impl CoalesceGradTensorPass {
    /// Coalesce the gradients of the given optimizer op types.
    pub fn new<I, S>(op_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut op_types: Vec<String> = op_types.into_iter().map(Into::into).collect();
        op_types.sort();
        op_types.dedup();
        Self { op_types }
    }

    /// Coalesce the gradients of every family in `registry`.
    pub fn from_registry(registry: &FamilyRegistry) -> Self {
        Self::new(registry.op_types())
    }

    /// `(param, grad, dtype)` for every optimizer op with a dense gradient,
    /// in topological order.
    ///
    /// Operators that already read a fused buffer are skipped.
    fn collect_pairs(
        &self,
        graph: &IrGraph,
        ctx: &CompilationContext,
    ) -> Result<Vec<(String, String, DataType)>> {
        let index = VarIndex::build(graph);
        let mut pairs = Vec::new();

        for id in topological_operators(graph) {
            let op = graph.op(id)?;
            if !self.op_types.iter().any(|t| t == op.op_type()) {
                continue;
            }

            let (params, grads) = (op.input(PARAM), op.input(GRAD));
            if params.len() != 1 || grads.len() != 1 {
                return Err(Error::InvalidArgument(format!(
                    "The {} operator should have one Param and one Grad input, got {} and {}",
                    op.op_type(),
                    params.len(),
                    grads.len()
                )));
            }
            if ctx.has_fused_var(&grads[0]) {
                continue;
            }

            let grad = index.desc(graph, &grads[0])?;
            if grad.kind.is_dense_tensor() {
                pairs.push((params[0].clone(), grads[0].clone(), grad.dtype));
            }
        }

        Ok(pairs)
    }
}

impl Default for CoalesceGradTensorPass {
    fn default() -> Self {
        Self::from_registry(&FamilyRegistry::with_defaults())
    }
}

impl Pass for CoalesceGradTensorPass {
    fn name(&self) -> &str {
        "coalesce_grad_tensor_pass"
    }

    fn stage(&self) -> Stage {
        Stage::Coalescing
    }

    #[tracing::instrument(skip_all)]
    fn run(
        &self,
        graph: &mut IrGraph,
        ctx: &mut CompilationContext,
        _kernels: &KernelRegistry,
    ) -> Result<bool> {
        if ctx.params_and_dense_grads.is_some() {
            tracing::debug!("gradients already coalesced");
            return Ok(false);
        }

        let pairs = self.collect_pairs(graph, ctx)?;
        if pairs.len() < 2 {
            tracing::debug!(count = pairs.len(), "too few dense gradients to coalesce");
            return Ok(false);
        }

        // Group by dtype, keeping first-seen order of groups and members.
        let mut groups: Vec<(DataType, Vec<(String, String)>)> = Vec::new();
        for (param, grad, dtype) in pairs {
            match groups.iter_mut().find(|(d, _)| *d == dtype) {
                Some((_, members)) => members.push((param, grad)),
                None => groups.push((dtype, vec![(param, grad)])),
            }
        }

        let mut fused_names = Vec::with_capacity(groups.len());
        for (_, members) in &groups {
            let name = format!("{FUSED_VAR_PREFIX}_grad_{}", members[0].1);
            if ctx.has_fused_var(&name) {
                return Err(Error::AlreadyExists(format!(
                    "The fused variable({}) already exists",
                    name
                )));
            }
            fused_names.push(name);
        }

        let program = ctx.push_program();
        for ((dtype, members), fused) in groups.iter().zip(&fused_names) {
            let (params, grads): (Vec<String>, Vec<String>) = members.iter().cloned().unzip();
            program.append_coalesce_tensor_op(&params, &grads, fused, *dtype, false, false);
        }

        for name in &fused_names {
            ctx.fused_vars
                .insert(name.clone(), VarInfo::dense(name.clone()));
        }
        let layout: Vec<(String, String)> = groups.into_iter().flat_map(|(_, m)| m).collect();
        ctx.pinned_vars
            .extend(layout.iter().map(|(_, grad)| grad.clone()));

        tracing::info!(
            grads = layout.len(),
            buckets = fused_names.len(),
            "coalesced dense gradients"
        );
        ctx.params_and_dense_grads = Some(layout);
        ctx.fused_grads = Some(fused_names);
        Ok(true)
    }
}

//! Optimizer fusion pass.
//!
//! Replaces every optimizer operator of one family that updates a dense
//! gradient with a single operator working on contiguous buffers. The buffers
//! are created by `coalesce_tensor` operators appended to side programs.

mod planner;
mod rewriter;

pub use planner::{FusionPlan, PlanOutcome, Rejection};

use crate::families::{AdamFamily, FamilyRegistry, MomentumFamily, OptimizerFamily, SgdFamily};
use optfuse_core::{CompilationContext, IrGraph, KernelRegistry, Pass, Result, Stage};
use planner::FusionPlanner;
use rewriter::FusionRewriter;
use std::sync::Arc;

/// Pass that fuses the optimizer operators of one family.
///
/// A graph is fused for at most one optimizer type; once a family has been
/// fused every later fusion pass is a no-op.
pub struct FuseOptimizerOpsPass {
    family: Arc<dyn OptimizerFamily>,
    name: String,
}

impl FuseOptimizerOpsPass {
    /// Create a fusion pass for `family`.
    pub fn new(family: Arc<dyn OptimizerFamily>) -> Self {
        let name = format!("fuse_{}_op_pass", family.op_type());
        Self { family, name }
    }

    pub fn sgd() -> Self {
        Self::new(Arc::new(SgdFamily))
    }

    pub fn momentum() -> Self {
        Self::new(Arc::new(MomentumFamily))
    }

    pub fn adam() -> Self {
        Self::new(Arc::new(AdamFamily))
    }

    /// Create a fusion pass for a registered family.
    pub fn from_registry(registry: &FamilyRegistry, op_type: &str) -> Option<Self> {
        registry.get(op_type).map(Self::new)
    }

    /// The family this pass fuses.
    pub fn family(&self) -> &dyn OptimizerFamily {
        self.family.as_ref()
    }

    /// Plan the fusion without touching the graph.
    ///
    /// Useful for reporting why a graph was left alone.
    pub fn plan(
        &self,
        graph: &IrGraph,
        ctx: &CompilationContext,
        kernels: &KernelRegistry,
    ) -> Result<PlanOutcome> {
        FusionPlanner::new(graph, ctx, kernels, self.family()).plan()
    }
}

impl Pass for FuseOptimizerOpsPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        Stage::Fusion
    }

    #[tracing::instrument(skip_all, fields(op_type = self.family.op_type()))]
    fn run(
        &self,
        graph: &mut IrGraph,
        ctx: &mut CompilationContext,
        kernels: &KernelRegistry,
    ) -> Result<bool> {
        let plan = match self.plan(graph, ctx, kernels)? {
            PlanOutcome::Ready(plan) => plan,
            PlanOutcome::Rejected(rejection) => {
                tracing::debug!(%rejection, "skipping optimizer fusion");
                return Ok(false);
            }
        };

        let fused_count = plan.candidates.len();
        let total_ops = plan.total_ops;
        let grads_fused = plan.grads_fused;
        FusionRewriter::new(self.family(), plan).apply(graph, ctx)?;

        tracing::info!(
            op_type = self.family.op_type(),
            total_ops,
            fused = fused_count,
            grads_fused,
            "fused optimizer operators"
        );
        Ok(true)
    }
}

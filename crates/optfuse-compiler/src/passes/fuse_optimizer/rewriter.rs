//! Applies a `FusionPlan` to the graph and the compilation context.

use super::planner::FusionPlan;
use crate::families::{GRAD, OptimizerFamily, PARAM};
use optfuse_core::{
    CompilationContext, Error, IrGraph, IrNodeId, OpDesc, Result, VarIndex, VarInfo,
};
use std::collections::{BTreeMap, BTreeSet};

/// What happens to a control variable touching the fused operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlVarFate {
    /// Ordered only the fused operators among themselves.
    Remove,
    /// Still orders a later operator behind the fused one.
    Keep,
}

/// Rewrites the graph for one plan.
pub struct FusionRewriter<'a> {
    family: &'a dyn OptimizerFamily,
    plan: FusionPlan,
}

impl<'a> FusionRewriter<'a> {
    pub fn new(family: &'a dyn OptimizerFamily, plan: FusionPlan) -> Self {
        Self { family, plan }
    }

    /// Replace the candidates with one fused operator.
    ///
    /// Everything that can fail is checked before the first mutation, so an
    /// error leaves the graph and the context as they were.
    ///
    /// Returns the fused operator's ID.
    pub fn apply(self, graph: &mut IrGraph, ctx: &mut CompilationContext) -> Result<IrNodeId> {
        let plan = &self.plan;

        self.check_gradients(graph)?;
        let fused_desc = {
            let descs = plan
                .candidates
                .iter()
                .map(|&id| graph.op(id))
                .collect::<Result<Vec<&OpDesc>>>()?;
            self.family.build_fused_op(&descs, &plan.fused_names)?
        };

        let (inputs, outputs) = self.neighbours(graph);
        let control_vars = self.classify_control_vars(graph, &inputs, &outputs)?;

        self.annotate(ctx)?;

        let fused = graph.add_operator(fused_desc);
        for &input in &inputs {
            graph.link(input, fused)?;
        }
        for &output in &outputs {
            graph.link(fused, output)?;
        }
        for &op in &plan.candidates {
            graph.remove_node(op)?;
        }

        for (ctrl, fate) in control_vars {
            match fate {
                ControlVarFate::Remove => {
                    graph.remove_node(ctrl)?;
                }
                ControlVarFate::Keep => {
                    graph.unlink(ctrl, fused);
                }
            }
        }

        tracing::debug!(
            op_type = %plan.op_type,
            inputs = graph.inputs(fused).len(),
            outputs = graph.outputs(fused).len(),
            "spliced fused operator"
        );
        Ok(fused)
    }

    /// Every gradient must be a dense variable in the graph.
    fn check_gradients(&self, graph: &IrGraph) -> Result<()> {
        let index = VarIndex::build(graph);
        for grad in self.plan.columns.get(GRAD) {
            if !index.kind(graph, grad)?.is_dense_tensor() {
                return Err(Error::InvalidArgument(format!(
                    "Currently only support fusing dense gradients, but {} is not",
                    grad
                )));
            }
        }
        Ok(())
    }

    /// Union of the candidates' inputs and outputs.
    fn neighbours(&self, graph: &IrGraph) -> (BTreeSet<IrNodeId>, BTreeSet<IrNodeId>) {
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for &op in &self.plan.candidates {
            inputs.extend(graph.inputs(op));
            outputs.extend(graph.outputs(op));
        }
        (inputs, outputs)
    }

    /// Decide the fate of every control variable the fused node will inherit.
    ///
    /// Control variables produced outside the candidates stay ordinary inputs
    /// and are not returned.
    fn classify_control_vars(
        &self,
        graph: &IrGraph,
        inputs: &BTreeSet<IrNodeId>,
        outputs: &BTreeSet<IrNodeId>,
    ) -> Result<BTreeMap<IrNodeId, ControlVarFate>> {
        let candidates: BTreeSet<IrNodeId> = self.plan.candidates.iter().copied().collect();
        let mut fates = BTreeMap::new();

        for &var in inputs.union(outputs) {
            let node = graph.node(var)?;
            if !node.is_ctrl_var() {
                continue;
            }

            let producers = graph.inputs(var);
            if producers.len() != 1 {
                return Err(Error::InvalidArgument(format!(
                    "The control var({}) node has multiple inputs",
                    node.name
                )));
            }
            if !candidates.contains(&producers[0]) {
                continue;
            }

            let consumers = graph.outputs(var);
            if consumers.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "The control var({}) node has no output",
                    node.name
                )));
            }
            let fate = if consumers.iter().all(|op| candidates.contains(op)) {
                ControlVarFate::Remove
            } else {
                ControlVarFate::Keep
            };
            tracing::trace!(name = %node.name, ?fate, "control variable");
            fates.insert(var, fate);
        }

        Ok(fates)
    }

    /// Record the fused layout in the context and emit the coalesce programs.
    fn annotate(&self, ctx: &mut CompilationContext) -> Result<()> {
        let plan = &self.plan;

        ctx.fused_opt_type = Some(plan.op_type.clone());
        for (role, name) in &plan.fused_names {
            if role == GRAD && plan.grads_fused {
                continue;
            }
            ctx.fused_vars
                .insert(name.clone(), VarInfo::dense(name.clone()));
        }
        ctx.pinned_vars
            .extend(plan.columns.get(GRAD).iter().cloned());

        if !plan.grads_fused {
            ctx.push_program().append_coalesce_tensor_op(
                plan.columns.get(PARAM),
                plan.columns.get(GRAD),
                plan.fused_name(GRAD)?,
                plan.dtype,
                false,
                false,
            );
        }

        let program = ctx.push_program();
        for role in plan.columns.roles().iter().filter(|role| *role != GRAD) {
            let names = plan.columns.get(role);
            let fused = plan
                .fused_names
                .get(role)
                .ok_or_else(|| Error::NotFound(format!("No fused variable for role {}", role)))?;
            program.append_coalesce_tensor_op(names, names, fused, plan.dtype, true, true);
        }

        Ok(())
    }
}

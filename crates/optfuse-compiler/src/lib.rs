//! Optimizer-operator fusion for optfuse.
//!
//! This crate takes a training program whose optimizer updates one parameter
//! per operator and rewrites it so that all parameters of one optimizer family
//! are updated by a single operator working on contiguous buffers.
//!
//! The compiler is organized as a pipeline of passes that run in stages:
//! 1. **Coalescing** - Lay dense gradients out in shared buffers (optional)
//! 2. **Fusion** - Replace the optimizer operators of one family with one
//!    fused operator
//!
//! The buffers themselves are allocated by `coalesce_tensor` operators the
//! passes append to side programs in the `CompilationContext`.
//!
//! # Example
//!
//! ```no_run
//! use optfuse_compiler::{fuse, FusionConfig};
//! use optfuse_core::{KernelRegistry, ProgramDesc};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let program = ProgramDesc::new();
//! let kernels = KernelRegistry::new();
//! let fused = fuse(&program, &FusionConfig::default(), &kernels)?;
//!
//! println!("{} side programs", fused.context.program_descs.len());
//! # Ok(())
//! # }
//! ```

pub mod families;
pub mod passes;

pub use families::{
    AdamFamily, FamilyRegistry, MomentumFamily, OptimizerFamily, SgdFamily,
};
pub use passes::{
    CoalesceGradTensorPass, FuseOptimizerOpsPass, FusionPlan, PlanOutcome, Rejection,
};

// Re-export commonly used types from optfuse-core
pub use optfuse_core::{
    CompilationContext, Error, IrGraph, KernelRegistry, Pass, ProgramDesc, Result, Stage,
};

/// Which passes a `FusionPipeline` registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionConfig {
    /// Register one fusion pass per entry of `families`.
    pub fuse_all_optimizer_ops: bool,

    /// Register the gradient coalescing pass.
    pub coalesce_grad_tensor: bool,

    /// Optimizer op types to fuse, in the order their passes run.
    ///
    /// Only the first family that fuses wins; the rest see a graph that
    /// already has a fused optimizer and leave it alone.
    pub families: Vec<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fuse_all_optimizer_ops: true,
            coalesce_grad_tensor: false,
            families: vec!["adam".to_string(), "sgd".to_string(), "momentum".to_string()],
        }
    }
}

/// Fusion pipeline with pluggable passes.
///
/// The pipeline runs in fixed stages: Coalescing → Fusion. Built-in passes are
/// registered according to a `FusionConfig`, and custom passes can be added
/// via `add_pass()`.
pub struct FusionPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,
}

impl FusionPipeline {
    /// Create a pipeline for the built-in optimizer families.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `config` names a family that is not built in.
    pub fn new(config: &FusionConfig) -> Result<Self> {
        Self::with_registry(config, &FamilyRegistry::with_defaults())
    }

    /// Create a pipeline resolving family names against `registry`.
    pub fn with_registry(config: &FusionConfig, registry: &FamilyRegistry) -> Result<Self> {
        let mut pipeline = Self::empty();

        if config.coalesce_grad_tensor {
            pipeline.add_pass(CoalesceGradTensorPass::from_registry(registry));
        }
        if config.fuse_all_optimizer_ops {
            for op_type in &config.families {
                let pass = FuseOptimizerOpsPass::from_registry(registry, op_type).ok_or_else(
                    || Error::NotFound(format!("No optimizer family registered for {}", op_type)),
                )?;
                pipeline.add_pass(pass);
            }
        }

        Ok(pipeline)
    }

    /// Create a pipeline with no passes.
    pub fn empty() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add a custom pass to the pipeline.
    ///
    /// The pass will be inserted into the appropriate stage (determined by
    /// `pass.stage()`). Within a stage, passes run in the order they were
    /// registered.
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Names of the registered passes, in run order.
    pub fn pass_names(&self) -> Vec<&str> {
        let mut passes: Vec<&dyn Pass> = self.passes.iter().map(|p| p.as_ref()).collect();
        passes.sort_by_key(|p| p.stage());
        passes.into_iter().map(|p| p.name()).collect()
    }

    /// Run every pass in stage order.
    ///
    /// Returns whether any pass changed the graph.
    ///
    /// # Errors
    ///
    /// Returns the first error a pass reports. Passes that ran before it keep
    /// their changes.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), num_passes = self.passes.len()))]
    pub fn run(
        &mut self,
        graph: &mut IrGraph,
        ctx: &mut CompilationContext,
        kernels: &KernelRegistry,
    ) -> Result<bool> {
        // Stable sort keeps registration order within a stage
        self.passes.sort_by_key(|p| p.stage());

        let mut changed = false;
        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
            changed |= pass.run(graph, ctx, kernels)?;
        }

        Ok(changed)
    }
}

/// A program after fusion.
pub struct FusedProgram {
    pub graph: IrGraph,
    pub context: CompilationContext,

    /// Whether any pass changed the graph.
    pub changed: bool,
}

/// Convenience function: builds the graph of `program` and runs a pipeline
/// configured by `config` on it.
///
/// # Errors
///
/// Returns an error if the program references undeclared variables, if
/// `config` names an unknown family, or if any pass fails.
#[tracing::instrument(skip_all, fields(num_ops = program.ops.len()))]
pub fn fuse(
    program: &ProgramDesc,
    config: &FusionConfig,
    kernels: &KernelRegistry,
) -> Result<FusedProgram> {
    let mut graph = IrGraph::from_program(program)?;
    let mut context = CompilationContext::new();
    let changed = FusionPipeline::new(config)?.run(&mut graph, &mut context, kernels)?;

    Ok(FusedProgram {
        graph,
        context,
        changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn stage(&self) -> Stage {
            Stage::Coalescing
        }

        fn run(
            &self,
            _graph: &mut IrGraph,
            _ctx: &mut CompilationContext,
            _kernels: &KernelRegistry,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_default_pipeline_passes() {
        let pipeline = FusionPipeline::new(&FusionConfig::default()).unwrap();
        assert_eq!(
            pipeline.pass_names(),
            vec!["fuse_adam_op_pass", "fuse_sgd_op_pass", "fuse_momentum_op_pass"]
        );
    }

    #[test]
    fn test_coalescing_runs_first() {
        let config = FusionConfig {
            coalesce_grad_tensor: true,
            families: vec!["sgd".to_string()],
            ..FusionConfig::default()
        };
        let mut pipeline = FusionPipeline::new(&config).unwrap();
        pipeline.add_pass(NoOpPass);

        assert_eq!(
            pipeline.pass_names(),
            vec!["coalesce_grad_tensor_pass", "noop", "fuse_sgd_op_pass"]
        );
    }

    #[test]
    fn test_fusion_disabled() {
        let config = FusionConfig {
            fuse_all_optimizer_ops: false,
            ..FusionConfig::default()
        };
        let pipeline = FusionPipeline::new(&config).unwrap();
        assert!(pipeline.pass_names().is_empty());
    }

    #[test]
    fn test_unknown_family_is_rejected() {
        let config = FusionConfig {
            families: vec!["lamb".to_string()],
            ..FusionConfig::default()
        };
        assert!(matches!(
            FusionPipeline::new(&config),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_run_empty_graph() {
        let mut pipeline = FusionPipeline::new(&FusionConfig::default()).unwrap();
        let mut graph = IrGraph::new();
        let mut ctx = CompilationContext::new();

        let changed = pipeline
            .run(&mut graph, &mut ctx, &KernelRegistry::new())
            .unwrap();
        assert!(!changed);
        assert!(ctx.fused_opt_type.is_none());
    }
}

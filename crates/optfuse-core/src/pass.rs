//! Graph pass trait and stage definitions.

use crate::Result;
use crate::context::CompilationContext;
use crate::ir::IrGraph;
use crate::kernel::KernelRegistry;

/// Compilation stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Lay gradients out in contiguous buffers.
    ///
    /// Passes in this stage record which gradients share a buffer so that
    /// later passes can reuse the layout instead of allocating a new one.
    Coalescing,

    /// Collapse groups of identical operators into one fused operator.
    Fusion,
}

/// Trait for implementing graph passes.
///
/// The `run()` method returns `Ok(true)` if the pass changed the graph, or
/// `Ok(false)` if it left it untouched. A pass that decides an optimization is
/// unsafe returns `Ok(false)` rather than an error; errors are reserved for
/// malformed graphs and violated pass ordering.
///
/// # Example
///
/// ```ignore
/// struct NoOpPass;
///
/// impl Pass for NoOpPass {
///     fn name(&self) -> &str {
///         "noop"
///     }
///
///     fn stage(&self) -> Stage {
///         Stage::Fusion
///     }
///
///     fn run(
///         &self,
///         graph: &mut IrGraph,
///         ctx: &mut CompilationContext,
///         kernels: &KernelRegistry,
///     ) -> Result<bool> {
///         Ok(false)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    ///
    /// # Arguments
    ///
    /// * `graph` - The IR graph to transform (mutable).
    /// * `ctx` - Annotations shared with the other passes of this compilation.
    /// * `kernels` - Kernel availability, for passes that must not fuse
    ///   around device-specific operators.
    fn run(
        &self,
        graph: &mut IrGraph,
        ctx: &mut CompilationContext,
        kernels: &KernelRegistry,
    ) -> Result<bool>;
}

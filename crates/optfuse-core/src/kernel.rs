//! Kernel availability lookup.

use std::collections::{HashMap, HashSet};

/// Device class a kernel is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Place {
    Cpu,
    Gpu,
    Xpu,
}

/// Operators without kernels that are always safe next to fused buffers.
const ALWAYS_SUPPORTED: &[&str] = &["c_sync_calc_stream", "c_sync_comm_stream"];

/// Registry of the places each operator type has kernels for.
///
/// # Example
///
/// ```
/// use optfuse_core::{KernelRegistry, Place};
///
/// let mut registry = KernelRegistry::new();
/// registry.register("mul_grad", Place::Cpu).register("mul_grad", Place::Gpu);
/// assert!(registry.supports_cpu_and_gpu("mul_grad"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, HashSet<Place>>,
}

impl KernelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a kernel for `op_type` on `place`.
    ///
    /// Returns `self` for method chaining.
    pub fn register(&mut self, op_type: &str, place: Place) -> &mut Self {
        self.kernels
            .entry(op_type.to_string())
            .or_default()
            .insert(place);
        self
    }

    /// Record kernels for `op_type` on both CPU and GPU.
    pub fn register_cpu_and_gpu(&mut self, op_type: &str) -> &mut Self {
        self.register(op_type, Place::Cpu).register(op_type, Place::Gpu)
    }

    /// Places with a kernel for `op_type`, if any kernel is registered.
    pub fn places(&self, op_type: &str) -> Option<&HashSet<Place>> {
        self.kernels.get(op_type).filter(|places| !places.is_empty())
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.places(op_type).is_some()
    }

    /// Check whether `op_type` runs on both CPU and GPU.
    ///
    /// Operator types with no kernel at all (pure graph bookkeeping) count as
    /// supported.
    pub fn supports_cpu_and_gpu(&self, op_type: &str) -> bool {
        if ALWAYS_SUPPORTED.contains(&op_type) {
            return true;
        }

        let supported = match self.places(op_type) {
            Some(places) => places.contains(&Place::Cpu) && places.contains(&Place::Gpu),
            None => true,
        };

        tracing::trace!(op_type, supported, "kernel support check");
        supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_only_is_unsupported() {
        let mut registry = KernelRegistry::new();
        registry.register("custom_grad", Place::Cpu);
        assert!(registry.contains("custom_grad"));
        assert!(!registry.supports_cpu_and_gpu("custom_grad"));

        registry.register("custom_grad", Place::Gpu);
        assert!(registry.supports_cpu_and_gpu("custom_grad"));
    }

    #[test]
    fn test_register_cpu_and_gpu() {
        let mut registry = KernelRegistry::new();
        registry.register_cpu_and_gpu("sum").register("scale", Place::Xpu);
        assert!(registry.supports_cpu_and_gpu("sum"));
        assert!(!registry.supports_cpu_and_gpu("scale"));
        assert_eq!(registry.places("sum").map(|places| places.len()), Some(2));
    }

    #[test]
    fn test_unknown_op_is_supported() {
        let registry = KernelRegistry::new();
        assert!(!registry.contains("feed"));
        assert!(registry.supports_cpu_and_gpu("feed"));
    }

    #[test]
    fn test_sync_ops_are_always_supported() {
        let mut registry = KernelRegistry::new();
        registry.register("c_sync_calc_stream", Place::Xpu);
        assert!(registry.supports_cpu_and_gpu("c_sync_calc_stream"));
        assert!(registry.supports_cpu_and_gpu("c_sync_comm_stream"));
    }
}

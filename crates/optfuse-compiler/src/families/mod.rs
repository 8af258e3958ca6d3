//! Optimizer families that can be fused.
//!
//! Every optimizer op the fusion pass understands reads a `Param`, a `Grad`
//! and a `LearningRate`, plus family-specific state (`Velocity` for momentum,
//! moments and beta powers for Adam). A family describes those extra roles
//! and which attributes must agree before N ops may become one.

pub mod adam;
pub mod momentum;
pub mod sgd;

pub use adam::AdamFamily;
pub use momentum::MomentumFamily;
pub use sgd::SgdFamily;

use optfuse_core::{Error, OP_ROLE_ATTR, OpDesc, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Role of the parameter being updated.
pub const PARAM: &str = "Param";

/// Role of the parameter's gradient.
pub const GRAD: &str = "Grad";

/// Role of the learning-rate scalar.
pub const LEARNING_RATE: &str = "LearningRate";

/// Capabilities of one optimizer family.
///
/// Implementors only describe the family; the provided methods cover the
/// consistency check and fused-operator construction shared by all families.
pub trait OptimizerFamily: Send + Sync {
    /// Operator type of the family (e.g., "adam").
    fn op_type(&self) -> &str;

    /// Per-parameter state roles besides `Param` and `Grad`.
    ///
    /// Each role `R` is read as input `R` and written as output `ROut`.
    fn auxiliary_roles(&self) -> &[&'static str];

    /// Attributes that must be identical on every fused operator.
    fn uniform_attributes(&self) -> &[&'static str] {
        &[]
    }

    /// Check that `ops` can share one fused operator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the operators disagree on a uniform
    /// attribute or read different learning rates.
    fn check_consistency(&self, ops: &[&OpDesc]) -> Result<()> {
        let Some(first) = ops.first() else {
            return Ok(());
        };

        let lr = first.input(LEARNING_RATE);
        if lr.len() != 1 {
            return Err(Error::InvalidArgument(format!(
                "The {} operator should have exactly one {} input, got {}",
                self.op_type(),
                LEARNING_RATE,
                lr.len()
            )));
        }

        for op in &ops[1..] {
            for &attr in self.uniform_attributes() {
                if op.attr(attr) != first.attr(attr) {
                    return Err(Error::InvalidArgument(format!(
                        "All {} operators should have the same attribute {}: {:?} vs {:?}",
                        self.op_type(),
                        attr,
                        first.attr(attr),
                        op.attr(attr)
                    )));
                }
            }
            if op.input(LEARNING_RATE) != lr {
                return Err(Error::InvalidArgument(format!(
                    "All {} operators should share one {}: {:?} vs {:?}",
                    self.op_type(),
                    LEARNING_RATE,
                    lr,
                    op.input(LEARNING_RATE)
                )));
            }
        }

        Ok(())
    }

    /// Build the operator that replaces `ops`.
    ///
    /// `fused_vars` maps each role (`Param`, `Grad` and every auxiliary role)
    /// to the contiguous buffer holding that role for all `ops`.
    fn build_fused_op(
        &self,
        ops: &[&OpDesc],
        fused_vars: &BTreeMap<String, String>,
    ) -> Result<OpDesc> {
        let first = ops.first().ok_or_else(|| {
            Error::InvalidArgument(format!("No {} operators to fuse", self.op_type()))
        })?;
        let fused_name = |role: &str| {
            fused_vars.get(role).cloned().ok_or_else(|| {
                Error::NotFound(format!("The fused variable of role {} is not found", role))
            })
        };

        let mut fused = OpDesc::new(self.op_type());
        for role in std::iter::once(PARAM).chain(self.auxiliary_roles().iter().copied()) {
            let name = fused_name(role)?;
            fused.set_input(role, [name.clone()]);
            fused.set_output(format!("{role}Out"), [name]);
        }
        fused.set_input(GRAD, [fused_name(GRAD)?]);
        fused.set_input(LEARNING_RATE, first.input(LEARNING_RATE).iter().cloned());

        for &attr in self.uniform_attributes() {
            if let Some(value) = first.attr(attr) {
                fused.set_attr(attr, value.clone());
            }
        }
        if let Some(role) = first.attr(OP_ROLE_ATTR) {
            fused.set_attr(OP_ROLE_ATTR, role.clone());
        }

        Ok(fused)
    }
}

/// Registry of optimizer families keyed on operator type.
///
/// # Example
///
/// ```
/// use optfuse_compiler::families::{FamilyRegistry, SgdFamily};
///
/// let mut registry = FamilyRegistry::new();
/// registry.register(SgdFamily);
/// assert!(registry.get("sgd").is_some());
/// ```
pub struct FamilyRegistry {
    families: HashMap<String, Arc<dyn OptimizerFamily>>,
}

impl FamilyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    /// Registry with every built-in family (sgd, momentum, adam).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(SgdFamily)
            .register(MomentumFamily)
            .register(AdamFamily);
        registry
    }

    /// Register a family under its op type.
    ///
    /// Returns `self` for method chaining.
    pub fn register<F>(&mut self, family: F) -> &mut Self
    where
        F: OptimizerFamily + 'static,
    {
        self.families
            .insert(family.op_type().to_string(), Arc::new(family));
        self
    }

    /// Look up a family by op type.
    pub fn get(&self, op_type: &str) -> Option<Arc<dyn OptimizerFamily>> {
        self.families.get(op_type).cloned()
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.families.contains_key(op_type)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Iterate over all registered op types.
    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(|s| s.as_str())
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optfuse_core::AttributeValue;

    struct ScaleFamily;

    impl OptimizerFamily for ScaleFamily {
        fn op_type(&self) -> &str {
            "scale_update"
        }

        fn auxiliary_roles(&self) -> &[&'static str] {
            &["Scale"]
        }

        fn uniform_attributes(&self) -> &[&'static str] {
            &["factor"]
        }
    }

    fn scale_op(i: usize, factor: f32, lr: &str) -> OpDesc {
        let mut op = OpDesc::new("scale_update");
        op.set_input(PARAM, [format!("w{i}")])
            .set_input(GRAD, [format!("w{i}@GRAD")])
            .set_input("Scale", [format!("s{i}")])
            .set_input(LEARNING_RATE, [lr])
            .set_output("ParamOut", [format!("w{i}")])
            .set_output("ScaleOut", [format!("s{i}")])
            .set_attr("factor", factor)
            .set_attr(OP_ROLE_ATTR, 2);
        op
    }

    #[test]
    fn test_registry_defaults() {
        let registry = FamilyRegistry::with_defaults();
        assert_eq!(registry.len(), 3);
        let mut types: Vec<_> = registry.op_types().collect();
        types.sort();
        assert_eq!(types, vec!["adam", "momentum", "sgd"]);
        assert!(!registry.contains("lamb"));
        assert!(FamilyRegistry::new().is_empty());
    }

    #[test]
    fn test_custom_family_registration() {
        let mut registry = FamilyRegistry::new();
        registry.register(ScaleFamily);
        let family = registry.get("scale_update").unwrap();
        assert_eq!(family.auxiliary_roles(), &["Scale"]);
    }

    #[test]
    fn test_consistency_accepts_matching_ops() {
        let a = scale_op(0, 0.5, "lr");
        let b = scale_op(1, 0.5, "lr");
        assert!(ScaleFamily.check_consistency(&[&a, &b]).is_ok());
        assert!(ScaleFamily.check_consistency(&[]).is_ok());
    }

    #[test]
    fn test_consistency_rejects_attribute_mismatch() {
        let a = scale_op(0, 0.5, "lr");
        let b = scale_op(1, 0.25, "lr");
        let err = ScaleFamily.check_consistency(&[&a, &b]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_consistency_rejects_learning_rate_mismatch() {
        let a = scale_op(0, 0.5, "lr");
        let b = scale_op(1, 0.5, "lr_other");
        assert!(matches!(
            ScaleFamily.check_consistency(&[&a, &b]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_fused_op() {
        let a = scale_op(0, 0.5, "lr");
        let b = scale_op(1, 0.5, "lr");
        let fused_vars = BTreeMap::from([
            (PARAM.to_string(), "fp".to_string()),
            (GRAD.to_string(), "fg".to_string()),
            ("Scale".to_string(), "fs".to_string()),
        ]);

        let fused = ScaleFamily.build_fused_op(&[&a, &b], &fused_vars).unwrap();
        assert_eq!(fused.op_type(), "scale_update");
        assert_eq!(fused.input(PARAM), ["fp".to_string()]);
        assert_eq!(fused.output("ParamOut"), ["fp".to_string()]);
        assert_eq!(fused.input(GRAD), ["fg".to_string()]);
        assert_eq!(fused.input("Scale"), ["fs".to_string()]);
        assert_eq!(fused.output("ScaleOut"), ["fs".to_string()]);
        assert_eq!(fused.input(LEARNING_RATE), ["lr".to_string()]);
        assert_eq!(fused.attr("factor"), Some(&AttributeValue::Float(0.5)));
        assert_eq!(fused.attr(OP_ROLE_ATTR), Some(&AttributeValue::Int(2)));
    }

    #[test]
    fn test_build_fused_op_requires_every_role() {
        let a = scale_op(0, 0.5, "lr");
        let fused_vars = BTreeMap::from([(PARAM.to_string(), "fp".to_string())]);
        assert!(matches!(
            ScaleFamily.build_fused_op(&[&a], &fused_vars),
            Err(Error::NotFound(_))
        ));
    }
}

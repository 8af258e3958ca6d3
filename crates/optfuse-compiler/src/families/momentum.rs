//! Momentum SGD, optionally Nesterov.

use super::OptimizerFamily;

/// The `momentum` operator family: one `Velocity` buffer per parameter.
pub struct MomentumFamily;

impl OptimizerFamily for MomentumFamily {
    fn op_type(&self) -> &str {
        "momentum"
    }

    fn auxiliary_roles(&self) -> &[&'static str] {
        &["Velocity"]
    }

    fn uniform_attributes(&self) -> &[&'static str] {
        &["mu", "use_nesterov"]
    }
}

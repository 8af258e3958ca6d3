//! Adam: first and second moments plus the running beta powers.

use super::OptimizerFamily;

/// The `adam` operator family.
pub struct AdamFamily;

impl OptimizerFamily for AdamFamily {
    fn op_type(&self) -> &str {
        "adam"
    }

    fn auxiliary_roles(&self) -> &[&'static str] {
        &["Moment1", "Moment2", "Beta1Pow", "Beta2Pow"]
    }

    fn uniform_attributes(&self) -> &[&'static str] {
        &[
            "beta1",
            "beta2",
            "epsilon",
            "lazy_mode",
            "min_row_size_to_use_multithread",
        ]
    }
}

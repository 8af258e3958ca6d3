//! Plain SGD: `param -= lr * grad`.

use super::OptimizerFamily;

/// The `sgd` operator family. It carries no per-parameter state.
pub struct SgdFamily;

impl OptimizerFamily for SgdFamily {
    fn op_type(&self) -> &str {
        "sgd"
    }

    fn auxiliary_roles(&self) -> &[&'static str] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::{GRAD, LEARNING_RATE, PARAM};
    use optfuse_core::OpDesc;
    use std::collections::BTreeMap;

    #[test]
    fn test_fused_sgd_reads_and_writes_fused_param() {
        let mut op = OpDesc::new("sgd");
        op.set_input(PARAM, ["w"])
            .set_input(GRAD, ["w@GRAD"])
            .set_input(LEARNING_RATE, ["lr"])
            .set_output("ParamOut", ["w"]);

        let fused_vars = BTreeMap::from([
            (PARAM.to_string(), "@FUSEDVAR@_sgd_Param_w".to_string()),
            (GRAD.to_string(), "@FUSEDVAR@_sgd_Grad_w@GRAD".to_string()),
        ]);
        let fused = SgdFamily.build_fused_op(&[&op], &fused_vars).unwrap();

        assert_eq!(fused.inputs.len(), 3);
        assert_eq!(fused.outputs.len(), 1);
        assert_eq!(fused.input(PARAM), fused.output("ParamOut"));
        assert!(fused.attributes.is_empty());
    }
}

//! Operator and variable descriptors.
//!
//! Descriptors are the name-level view of the program: an `OpDesc` refers to
//! its arguments by variable name, grouped by role (`Param`, `Grad`, ...).
//! Graph nodes wrap descriptors and add the node-level links.

use crate::types::{AttributeValue, DataType, VarKind};
use std::collections::{BTreeMap, HashMap};

/// Name of the attribute carrying an operator's role in the training program.
pub const OP_ROLE_ATTR: &str = "op_role";

/// Description of a single operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpDesc {
    /// Operator type (e.g., "sgd", "adam", "coalesce_tensor").
    pub op_type: String,

    /// Input arguments: role → ordered variable names.
    pub inputs: BTreeMap<String, Vec<String>>,

    /// Output arguments: role → ordered variable names.
    pub outputs: BTreeMap<String, Vec<String>>,

    /// Operator attributes.
    pub attributes: HashMap<String, AttributeValue>,
}

impl OpDesc {
    /// Create a descriptor with no arguments.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Self::default()
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Variable names bound to an input role (empty if the role is unset).
    pub fn input(&self, role: &str) -> &[String] {
        self.inputs.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Variable names bound to an output role (empty if the role is unset).
    pub fn output(&self, role: &str) -> &[String] {
        self.outputs.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_input<S: Into<String>>(
        &mut self,
        role: impl Into<String>,
        names: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.inputs
            .insert(role.into(), names.into_iter().map(Into::into).collect());
        self
    }

    pub fn set_output<S: Into<String>>(
        &mut self,
        role: impl Into<String>,
        names: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.outputs
            .insert(role.into(), names.into_iter().map(Into::into).collect());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// All input variable names, in role order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().flatten().map(String::as_str)
    }

    /// All output variable names, in role order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.values().flatten().map(String::as_str)
    }
}

/// Description of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDesc {
    pub name: String,
    pub dtype: DataType,
    pub kind: VarKind,
    pub persistable: bool,
}

impl VarDesc {
    /// Create a non-persistable dense tensor variable.
    pub fn dense(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            kind: VarKind::DenseTensor,
            persistable: false,
        }
    }

    /// Create a non-persistable variable of the given kind.
    pub fn with_kind(name: impl Into<String>, dtype: DataType, kind: VarKind) -> Self {
        Self {
            name: name.into(),
            dtype,
            kind,
            persistable: false,
        }
    }

    /// Mark the variable as persistable (parameters, optimizer state).
    pub fn persistable(mut self) -> Self {
        self.persistable = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_desc_arguments() {
        let mut op = OpDesc::new("sgd");
        op.set_input("Param", ["w"])
            .set_input("Grad", ["w@GRAD"])
            .set_output("ParamOut", ["w"])
            .set_attr(OP_ROLE_ATTR, 2);

        assert_eq!(op.op_type(), "sgd");
        assert_eq!(op.input("Param"), ["w".to_string()]);
        assert!(op.input("LearningRate").is_empty());
        assert_eq!(op.attr(OP_ROLE_ATTR), Some(&AttributeValue::Int(2)));

        let inputs: Vec<&str> = op.input_names().collect();
        assert_eq!(inputs, vec!["w@GRAD", "w"]);
        assert_eq!(op.output_names().collect::<Vec<_>>(), vec!["w"]);
    }

    #[test]
    fn test_var_desc_builders() {
        let var = VarDesc::dense("w", DataType::F32).persistable();
        assert!(var.persistable);
        assert!(var.kind.is_dense_tensor());

        let sparse = VarDesc::with_kind("emb@GRAD", DataType::F32, VarKind::SelectedRows);
        assert!(!sparse.kind.is_dense_tensor());
    }
}

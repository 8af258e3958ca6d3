//! Core types for variable element types, container kinds, and attributes.

use std::fmt;

/// Element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    F16,
    BF16,
    F32,
    F64,
}

impl DataType {
    /// Integer code used in the `dtype` attribute of emitted operators.
    ///
    /// The codes follow the framework's variable-type numbering, so side
    /// programs can be consumed by an initializer that expects them.
    pub fn proto_code(&self) -> i32 {
        match self {
            DataType::Bool => 0,
            DataType::I16 => 1,
            DataType::I32 => 2,
            DataType::I64 => 3,
            DataType::F16 => 4,
            DataType::F32 => 5,
            DataType::F64 => 6,
            DataType::U8 => 20,
            DataType::I8 => 21,
            DataType::BF16 => 22,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::U8 => "uint8",
            DataType::F16 => "float16",
            DataType::BF16 => "bfloat16",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Container kind of a variable.
///
/// Only `DenseTensor` variables take part in fusion; sparse gradients
/// (`SelectedRows`) are left to their own optimizer operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Contiguous dense tensor.
    DenseTensor,

    /// Row-sparse tensor (rows + values).
    SelectedRows,

    /// Array of dense tensors.
    TensorArray,

    /// Opaque runtime object (readers, communicators, ...).
    Raw,
}

impl VarKind {
    pub fn is_dense_tensor(&self) -> bool {
        matches!(self, VarKind::DenseTensor)
    }
}

/// Typed attribute value attached to an operator.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Bools(Vec<bool>),
    Ints(Vec<i32>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl AttributeValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            AttributeValue::Long(v) => Some(*v),
            AttributeValue::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_codes_are_distinct() {
        let all = [
            DataType::Bool,
            DataType::I8,
            DataType::I16,
            DataType::I32,
            DataType::I64,
            DataType::U8,
            DataType::F16,
            DataType::BF16,
            DataType::F32,
            DataType::F64,
        ];
        let mut codes: Vec<i32> = all.iter().map(|d| d.proto_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(DataType::F32.proto_code(), 5);
    }

    #[test]
    fn test_attribute_accessors() {
        assert_eq!(AttributeValue::from(0.9f32).as_float(), Some(0.9));
        assert_eq!(AttributeValue::from(true).as_bool(), Some(true));
        assert_eq!(AttributeValue::from(7i32).as_long(), Some(7));
        assert_eq!(AttributeValue::from("x").as_str(), Some("x"));
        assert_eq!(AttributeValue::from(1i64).as_float(), None);
    }
}

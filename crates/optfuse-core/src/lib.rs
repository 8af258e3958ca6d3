//! Core intermediate representation and pass infrastructure for optfuse.
//!
//! This crate provides the foundations the fusion passes build on:
//! - Dataflow IR (`IrGraph`, `IrNode`, `NodeKind`) with operator, variable
//!   and control-variable nodes
//! - Operator, variable and program descriptors (`OpDesc`, `VarDesc`,
//!   `ProgramDesc`)
//! - Name lookup (`VarIndex`) and operator dependency analysis
//! - Compilation-wide annotations (`CompilationContext`)
//! - Kernel availability (`KernelRegistry`) and the `Pass` trait

pub mod context;
pub mod dependency;
pub mod desc;
pub mod ir;
pub mod ir_builder;
pub mod kernel;
pub mod pass;
pub mod program;
pub mod types;
pub mod var_index;

// Re-export commonly used types
pub use context::{CompilationContext, FUSED_VAR_PREFIX, VarInfo};
pub use dependency::{OpDependencies, has_illegal_cross_dependency, topological_operators};
pub use desc::{OP_ROLE_ATTR, OpDesc, VarDesc};
pub use ir::{IrGraph, IrNode, IrNodeId, NodeKind};
pub use kernel::{KernelRegistry, Place};
pub use pass::{Pass, Stage};
pub use program::{COALESCE_TENSOR_OP, ProgramDesc};
pub use types::{AttributeValue, DataType, VarKind};
pub use var_index::VarIndex;

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for optfuse operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed operator or variable (wrong argument count, wrong kind).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A variable or annotation expected to exist is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A name that must be unique is already taken.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A pass ran before a pass it depends on.
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    /// A node handle does not refer to a node of the expected shape.
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),
}

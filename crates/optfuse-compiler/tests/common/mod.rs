//! Helpers for building training programs in integration tests.

#![allow(dead_code)]

use optfuse_core::{
    CompilationContext, DataType, IrGraph, OP_ROLE_ATTR, OpDesc, ProgramDesc, VarDesc, VarKind,
};

/// `op_role` of optimizer operators.
pub const OPTIMIZE_ROLE: i32 = 2;

/// Operator type producing every gradient.
pub const GRAD_OP: &str = "matmul_v2_grad";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn grad_name(param: &str) -> String {
    format!("{param}@GRAD")
}

/// Builds a program of backward operators followed by optimizer operators.
pub struct TrainingProgram {
    program: ProgramDesc,
}

impl TrainingProgram {
    pub fn new() -> Self {
        let mut program = ProgramDesc::new();
        program
            .add_var(VarDesc::dense("lr", DataType::F32).persistable())
            .add_var(VarDesc::dense("x", DataType::F32));
        Self { program }
    }

    pub fn declare(&mut self, var: VarDesc) -> &mut Self {
        self.program.add_var(var);
        self
    }

    pub fn append(&mut self, op: OpDesc) -> &mut Self {
        self.program.append_op(op);
        self
    }

    /// Declare `param` and its gradient, and append the operator producing
    /// the gradient.
    pub fn param(&mut self, param: &str, dtype: DataType, grad_kind: VarKind) -> &mut Self {
        let grad = grad_name(param);
        self.declare(VarDesc::dense(param, dtype).persistable())
            .declare(VarDesc::with_kind(grad.clone(), dtype, grad_kind));

        let mut backward = OpDesc::new(GRAD_OP);
        backward
            .set_input("X", ["x"])
            .set_output("Y@GRAD", [grad]);
        self.append(backward)
    }

    /// Declare a persistable optimizer state variable.
    pub fn state(&mut self, name: &str, dtype: DataType) -> &mut Self {
        self.declare(VarDesc::dense(name, dtype).persistable())
    }

    pub fn sgd(&mut self, param: &str, dtype: DataType) -> &mut Self {
        self.sgd_with_grad_kind(param, dtype, VarKind::DenseTensor)
    }

    pub fn sgd_with_grad_kind(&mut self, param: &str, dtype: DataType, kind: VarKind) -> &mut Self {
        self.param(param, dtype, kind);
        let op = optimizer_op("sgd", param);
        self.append(op)
    }

    pub fn momentum(&mut self, param: &str, dtype: DataType, mu: f32) -> &mut Self {
        let velocity = format!("{param}_velocity");
        self.param(param, dtype, VarKind::DenseTensor)
            .state(&velocity, dtype);

        let mut op = optimizer_op("momentum", param);
        op.set_input("Velocity", [velocity.clone()])
            .set_output("VelocityOut", [velocity])
            .set_attr("mu", mu)
            .set_attr("use_nesterov", false);
        self.append(op)
    }

    /// Adam update of `param`; `state_dtype` applies to the moments.
    pub fn adam(&mut self, param: &str, dtype: DataType, state_dtype: DataType) -> &mut Self {
        self.param(param, dtype, VarKind::DenseTensor);

        let mut op = optimizer_op("adam", param);
        for (role, suffix) in ADAM_STATE {
            let name = format!("{param}_{suffix}");
            let state_type = if role.starts_with("Moment") {
                state_dtype
            } else {
                dtype
            };
            self.state(&name, state_type);
            op.set_input(role, [name.clone()])
                .set_output(format!("{role}Out"), [name]);
        }
        op.set_attr("beta1", 0.9f32)
            .set_attr("beta2", 0.999f32)
            .set_attr("epsilon", 1e-8f32)
            .set_attr("lazy_mode", false)
            .set_attr("min_row_size_to_use_multithread", 1000i64);
        self.append(op)
    }

    pub fn program(&self) -> &ProgramDesc {
        &self.program
    }

    pub fn build(&self) -> IrGraph {
        IrGraph::from_program(&self.program).unwrap()
    }
}

pub const ADAM_STATE: [(&str, &str); 4] = [
    ("Moment1", "moment1"),
    ("Moment2", "moment2"),
    ("Beta1Pow", "beta1_pow"),
    ("Beta2Pow", "beta2_pow"),
];

/// Optimizer operator updating `param` in place with learning rate `lr`.
pub fn optimizer_op(op_type: &str, param: &str) -> OpDesc {
    let mut op = OpDesc::new(op_type);
    op.set_input("Param", [param])
        .set_input("Grad", [grad_name(param)])
        .set_input("LearningRate", ["lr"])
        .set_output("ParamOut", [param])
        .set_attr(OP_ROLE_ATTR, OPTIMIZE_ROLE);
    op
}

/// Three sgd updates of f32 parameters `w0`, `w1`, `w2`.
pub fn three_sgd() -> TrainingProgram {
    let mut program = TrainingProgram::new();
    for i in 0..3 {
        program.sgd(&format!("w{i}"), DataType::F32);
    }
    program
}

/// Pretend a gradient coalescing pass laid `params` out in one bucket, in
/// the given order.
pub fn record_grad_bucket(ctx: &mut CompilationContext, params: &[&str]) -> String {
    let bucket = format!("@FUSEDVAR@_grad_{}", grad_name(params[0]));
    ctx.params_and_dense_grads = Some(
        params
            .iter()
            .map(|p| (p.to_string(), grad_name(p)))
            .collect(),
    );
    ctx.fused_grads = Some(vec![bucket.clone()]);
    ctx.fused_vars
        .insert(bucket.clone(), optfuse_core::VarInfo::dense(bucket.clone()));
    bucket
}

/// Borrowed view of an argument list, for terse assertions.
pub fn names(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// Snapshot of everything a no-op must leave untouched.
pub fn snapshot(graph: &IrGraph, ctx: &CompilationContext) -> (usize, usize, usize, usize) {
    (
        graph.node_count(),
        graph.link_count(),
        ctx.fused_vars.len(),
        ctx.program_descs.len(),
    )
}

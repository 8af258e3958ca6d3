//! Candidate selection and validation for optimizer fusion.
//!
//! The planner only reads the graph and the context. It either rejects the
//! fusion, leaving everything untouched, or hands a `FusionPlan` to the
//! rewriter.

use crate::families::{GRAD, OptimizerFamily, PARAM};
use optfuse_core::{
    CompilationContext, DataType, Error, FUSED_VAR_PREFIX, IrGraph, IrNodeId, KernelRegistry,
    OpDesc, Result, VarIndex, has_illegal_cross_dependency, topological_operators,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Why a fusion was skipped.
///
/// Rejections are not errors: the graph is still correct, it just keeps one
/// optimizer op per parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Fewer than two optimizer ops with dense gradients.
    TooFewCandidates { found: usize },

    /// Another optimizer type was already fused in this graph.
    AlreadyFused { op_type: String },

    /// A candidate depends on another candidate through data variables.
    CrossDependency,

    /// The gradients were coalesced into more than one bucket.
    MultipleGradBuckets { buckets: usize },

    /// Exactly one gradient is missing from the coalesced layout.
    SingleNewGradient { grad: String },

    /// Fusing variables do not share one element type.
    MixedDataTypes {
        var: String,
        expected: DataType,
        found: DataType,
    },

    /// A gradient is produced by an operator lacking a CPU or GPU kernel.
    MissingKernel { op_type: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooFewCandidates { found } => {
                write!(f, "only {found} operator(s) with dense gradients")
            }
            Rejection::AlreadyFused { op_type } => {
                write!(f, "{op_type} has already been fused in this graph")
            }
            Rejection::CrossDependency => {
                write!(f, "there are interdependent variables among the operators")
            }
            Rejection::MultipleGradBuckets { buckets } => {
                write!(f, "gradients are split over {buckets} fused buckets")
            }
            Rejection::SingleNewGradient { grad } => {
                write!(f, "gradient {grad} is not part of the coalesced layout")
            }
            Rejection::MixedDataTypes {
                var,
                expected,
                found,
            } => write!(f, "variable {var} is {found}, expected {expected}"),
            Rejection::MissingKernel { op_type } => {
                write!(f, "{op_type} does not have both CPU and GPU kernels")
            }
        }
    }
}

/// Per-role variable names, one column per role, one row per candidate.
///
/// Row `i` of every column belongs to the same optimizer operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleColumns {
    roles: Vec<String>,
    columns: BTreeMap<String, Vec<String>>,
}

impl RoleColumns {
    /// Collect the columns for `roles` from `ops`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if an operator binds a role to anything
    /// other than exactly one variable.
    pub fn collect(roles: &[String], ops: &[&OpDesc]) -> Result<Self> {
        let mut columns: BTreeMap<String, Vec<String>> = roles
            .iter()
            .map(|role| (role.clone(), Vec::with_capacity(ops.len())))
            .collect();

        for op in ops {
            for role in roles {
                let names = op.input(role);
                if names.len() != 1 {
                    return Err(Error::InvalidArgument(format!(
                        "The input variable of optimizer to be fused is invalid. \
                         Expected {} only has one {} input, got {}",
                        op.op_type(),
                        role,
                        names.len()
                    )));
                }
                if let Some(column) = columns.get_mut(role) {
                    column.push(names[0].clone());
                }
            }
        }

        Ok(Self {
            roles: roles.to_vec(),
            columns,
        })
    }

    /// Roles in declaration order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Names for one role (empty if the role is unknown).
    pub fn get(&self, role: &str) -> &[String] {
        self.columns.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every name of every role.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.roles
            .iter()
            .flat_map(|role| self.get(role).iter().map(String::as_str))
    }

    /// Keep rows `order[0]`, `order[1]`, ... in that order.
    pub fn select(&mut self, order: &[usize]) {
        for column in self.columns.values_mut() {
            *column = order.iter().map(|&i| column[i].clone()).collect();
        }
    }
}

/// Everything the rewriter needs to fuse one optimizer family.
#[derive(Debug, Clone)]
pub struct FusionPlan {
    /// Optimizer op type being fused.
    pub op_type: String,

    /// Operators to replace, aligned with the rows of `columns`.
    pub candidates: Vec<IrNodeId>,

    /// Per-role variable names.
    pub columns: RoleColumns,

    /// Role → contiguous buffer name.
    pub fused_names: BTreeMap<String, String>,

    /// Shared element type of every fusing variable.
    pub dtype: DataType,

    /// Gradients already live in a buffer from the coalesce-gradient pass.
    pub grads_fused: bool,

    /// Optimizer ops of this type seen, including sparse-gradient ones.
    pub total_ops: usize,
}

impl FusionPlan {
    /// Contiguous buffer for a role.
    pub fn fused_name(&self, role: &str) -> Result<&str> {
        self.fused_names
            .get(role)
            .map(String::as_str)
            .ok_or_else(|| Error::NotFound(format!("No fused variable for role {}", role)))
    }
}

/// Outcome of planning.
#[derive(Debug)]
pub enum PlanOutcome {
    Ready(FusionPlan),
    Rejected(Rejection),
}

impl PlanOutcome {
    /// Why the fusion was skipped, if it was.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            PlanOutcome::Ready(_) => None,
            PlanOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Result of reconciling candidates with a coalesced gradient layout.
enum GradLayout {
    /// All gradients live in this bucket; candidates were reordered.
    Fused(String),
    /// Candidates were narrowed to the gradients outside the layout.
    Filtered,
    Rejected(Rejection),
}

/// Plans the fusion of one optimizer family.
pub struct FusionPlanner<'a> {
    graph: &'a IrGraph,
    ctx: &'a CompilationContext,
    kernels: &'a KernelRegistry,
    family: &'a dyn OptimizerFamily,
    index: VarIndex,
}

impl<'a> FusionPlanner<'a> {
    pub fn new(
        graph: &'a IrGraph,
        ctx: &'a CompilationContext,
        kernels: &'a KernelRegistry,
        family: &'a dyn OptimizerFamily,
    ) -> Self {
        Self {
            graph,
            ctx,
            kernels,
            family,
            index: VarIndex::build(graph),
        }
    }

    /// Select, validate and lay out the candidates.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed optimizer operators, missing variables,
    /// a violated pass order, or a fused-name collision. Every other reason not
    /// to fuse is a `PlanOutcome::Rejected`.
    pub fn plan(&self) -> Result<PlanOutcome> {
        let op_type = self.family.op_type();
        let order = topological_operators(self.graph);

        // Scanning
        let (mut candidates, total_ops) = self.scan(&order)?;
        tracing::debug!(
            op_type,
            total_ops,
            dense = candidates.len(),
            "found optimizer operators"
        );

        // Validating
        if candidates.len() < 2 {
            return Ok(PlanOutcome::Rejected(Rejection::TooFewCandidates {
                found: candidates.len(),
            }));
        }
        if let Some(fused) = &self.ctx.fused_opt_type {
            return Ok(PlanOutcome::Rejected(Rejection::AlreadyFused {
                op_type: fused.clone(),
            }));
        }
        if has_illegal_cross_dependency(self.graph, &order, &candidates)? {
            return Ok(PlanOutcome::Rejected(Rejection::CrossDependency));
        }

        let mut columns = RoleColumns::collect(&self.roles(), &self.descs(&candidates)?)?;

        let mut grad_bucket = None;
        if let Some(pairs) = &self.ctx.params_and_dense_grads {
            match self.reconcile_grad_layout(pairs, &mut candidates, &mut columns)? {
                GradLayout::Fused(bucket) => grad_bucket = Some(bucket),
                GradLayout::Filtered => {}
                GradLayout::Rejected(rejection) => return Ok(PlanOutcome::Rejected(rejection)),
            }
        }

        let first_param = columns.get(PARAM).first().ok_or_else(|| {
            Error::InvalidArgument("There is no parameter to fuse".to_string())
        })?;
        let dtype = self.index.dtype(self.graph, first_param)?;
        if let Some(rejection) = self.check_dtypes(&columns, dtype)? {
            return Ok(PlanOutcome::Rejected(rejection));
        }
        if let Some(rejection) = self.check_grad_kernels(columns.get(GRAD))? {
            return Ok(PlanOutcome::Rejected(rejection));
        }
        self.family.check_consistency(&self.descs(&candidates)?)?;

        // Planning
        let fused_names = self.fused_names(&columns, grad_bucket.as_deref())?;

        Ok(PlanOutcome::Ready(FusionPlan {
            op_type: op_type.to_string(),
            candidates,
            columns,
            fused_names,
            dtype,
            grads_fused: grad_bucket.is_some(),
            total_ops,
        }))
    }

    /// Family roles followed by `Param` and `Grad`.
    fn roles(&self) -> Vec<String> {
        self.family
            .auxiliary_roles()
            .iter()
            .copied()
            .chain([PARAM, GRAD])
            .map(str::to_string)
            .collect()
    }

    fn descs(&self, ops: &[IrNodeId]) -> Result<Vec<&'a OpDesc>> {
        ops.iter().map(|&id| self.graph.op(id)).collect()
    }

    /// Collect operators of the family type with a dense gradient.
    fn scan(&self, order: &[IrNodeId]) -> Result<(Vec<IrNodeId>, usize)> {
        let op_type = self.family.op_type();
        let mut candidates = Vec::new();
        let mut total = 0;

        for &id in order {
            let op = self.graph.op(id)?;
            if op.op_type() != op_type {
                continue;
            }
            total += 1;

            let grads = op.input(GRAD);
            if grads.len() != 1 {
                return Err(Error::InvalidArgument(format!(
                    "The {} operator has multiple gradient input. \
                     Expected it to only have one gradient input, got {}",
                    op_type,
                    grads.len()
                )));
            }
            // An earlier fusion already rewrote this op onto a contiguous buffer
            if self.ctx.has_fused_var(&grads[0]) {
                continue;
            }
            if self.index.kind(self.graph, &grads[0])?.is_dense_tensor() {
                candidates.push(id);
            }
        }

        Ok((candidates, total))
    }

    /// Line the candidates up with the gradient layout of an earlier
    /// coalesce-gradient pass.
    fn reconcile_grad_layout(
        &self,
        pairs: &[(String, String)],
        candidates: &mut Vec<IrNodeId>,
        columns: &mut RoleColumns,
    ) -> Result<GradLayout> {
        let grads = columns.get(GRAD);
        if pairs.len() > grads.len() {
            return Err(Error::InvalidArgument(format!(
                "The number of dense gradients({}) should be little than optimizer ops({})",
                pairs.len(),
                grads.len()
            )));
        }

        let coalesced: HashSet<&str> = pairs.iter().map(|(_, grad)| grad.as_str()).collect();
        let new_grads: Vec<usize> = grads
            .iter()
            .enumerate()
            .filter(|(_, grad)| !coalesced.contains(grad.as_str()))
            .map(|(i, _)| i)
            .collect();

        if new_grads.is_empty() {
            let fused_grads = self.ctx.fused_grads.as_ref().ok_or_else(|| {
                Error::PreconditionNotMet(
                    "The coalesce_grad_tensor pass should be called before this pass".to_string(),
                )
            })?;
            let bucket = match fused_grads.as_slice() {
                [] => {
                    return Err(Error::NotFound(
                        "The fused gradient should not be empty".to_string(),
                    ));
                }
                [bucket] => bucket.clone(),
                buckets => {
                    return Ok(GradLayout::Rejected(Rejection::MultipleGradBuckets {
                        buckets: buckets.len(),
                    }));
                }
            };
            if !self.ctx.has_fused_var(&bucket) {
                return Err(Error::NotFound(format!(
                    "Not found the fused gradient variable {}",
                    bucket
                )));
            }
            if pairs.len() != grads.len() {
                return Err(Error::InvalidArgument(format!(
                    "The coalesced layout holds {} gradients but {} optimizer ops read them",
                    pairs.len(),
                    grads.len()
                )));
            }

            let mut order = Vec::with_capacity(pairs.len());
            for (_, grad) in pairs {
                let idx = grads.iter().position(|g| g == grad).ok_or_else(|| {
                    Error::NotFound(format!(
                        "Parameter@Grad({}) is not found in gradient vector",
                        grad
                    ))
                })?;
                order.push(idx);
            }

            columns.select(&order);
            *candidates = order.iter().map(|&i| candidates[i]).collect();
            tracing::debug!(bucket = %bucket, "reusing coalesced gradient buffer");
            return Ok(GradLayout::Fused(bucket));
        }

        tracing::debug!(count = new_grads.len(), "gradients outside the coalesced layout");
        if new_grads.len() == 1 {
            return Ok(GradLayout::Rejected(Rejection::SingleNewGradient {
                grad: grads[new_grads[0]].clone(),
            }));
        }

        columns.select(&new_grads);
        *candidates = new_grads.iter().map(|&i| candidates[i]).collect();
        Ok(GradLayout::Filtered)
    }

    /// Every fusing variable must have the first parameter's dtype.
    fn check_dtypes(
        &self,
        columns: &RoleColumns,
        expected: DataType,
    ) -> Result<Option<Rejection>> {
        for name in columns.all_names() {
            let found = self.index.dtype(self.graph, name)?;
            if found != expected {
                return Ok(Some(Rejection::MixedDataTypes {
                    var: name.to_string(),
                    expected,
                    found,
                }));
            }
        }

        Ok(None)
    }

    /// Every operator writing a gradient must run on both CPU and GPU.
    fn check_grad_kernels(&self, grads: &[String]) -> Result<Option<Rejection>> {
        for grad in grads {
            let mut producers = BTreeSet::new();
            for &var in self.index.nodes(grad) {
                for producer in self.graph.inputs(var) {
                    if let Some(op) = self.graph.node(producer)?.op() {
                        producers.insert(op.op_type().to_string());
                    }
                }
            }

            for op_type in producers {
                if !self.kernels.supports_cpu_and_gpu(&op_type) {
                    return Ok(Some(Rejection::MissingKernel { op_type }));
                }
            }
        }

        Ok(None)
    }

    /// One buffer name per role, unique across the compilation.
    fn fused_names(
        &self,
        columns: &RoleColumns,
        grad_bucket: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let op_type = self.family.op_type();
        let mut names = BTreeMap::new();

        for role in columns.roles() {
            if role == GRAD {
                if let Some(bucket) = grad_bucket {
                    names.insert(role.clone(), bucket.to_string());
                    continue;
                }
            }

            let first = columns.get(role).first().ok_or_else(|| {
                Error::InvalidArgument(format!("No variables to fuse for role {}", role))
            })?;
            let name = format!("{FUSED_VAR_PREFIX}_{op_type}_{role}_{first}");
            if self.ctx.has_fused_var(&name) {
                return Err(Error::AlreadyExists(format!(
                    "The fused variable({}) already exists",
                    name
                )));
            }
            tracing::trace!(role = %role, fused = %name, "fused variable");
            names.insert(role.clone(), name);
        }

        Ok(names)
    }
}

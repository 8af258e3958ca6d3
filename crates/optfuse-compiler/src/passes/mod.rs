//! Graph passes run by the fusion pipeline.

mod coalesce_grad_tensor;
mod fuse_optimizer;

pub use coalesce_grad_tensor::CoalesceGradTensorPass;
pub use fuse_optimizer::{FuseOptimizerOpsPass, FusionPlan, PlanOutcome, Rejection};

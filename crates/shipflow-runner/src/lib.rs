//! ShipFlow step executor
//!
//! This crate runs a [`shipflow_core::DeploymentPlan`] against a
//! [`shipflow_provider::DeployProvider`]: batches run one after another,
//! services inside a batch run concurrently, and every service goes through
//! build, tag, push and deploy with per-step retry.

pub mod executor;
pub mod report;

pub use executor::{Executor, ExecutorOptions, RollbackPolicy};
pub use report::{
    RollbackOutcome, RunReport, RunStatus, ServiceOutcome, ServiceStatus, StepResult, StepStatus,
};

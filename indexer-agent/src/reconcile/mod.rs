//! Reconcilers
//!
//! The two sides of each reconciliation cycle: converging the indexing
//! node's deployment set to the target, and converging on-chain
//! allocations to the allocation decisions.

pub mod actions;
pub mod deployments;

pub use actions::{reconcile_actions, ActionSummary};
pub use deployments::{
    deployment_name, plan_deployment_changes, reconcile_deployments, DeploymentChanges,
};

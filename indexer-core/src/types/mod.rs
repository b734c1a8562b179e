//! Domain types shared by the agent and its adapters

pub mod allocation;
pub mod deployment;
pub mod dispute;
pub mod rule;
pub mod subgraph;

pub use allocation::{
    Address, Allocation, AllocationDecision, AllocationId, AllocationStatus, Poi, RuleMatch,
    SubgraphDeployment,
};
pub use deployment::{BlockPointer, DeploymentId};
pub use dispute::{DisputeStatus, PoiDispute, RewardsPool};
pub use rule::{DecisionBasis, IdentifierKind, IndexingRule, GLOBAL_IDENTIFIER};
pub use subgraph::{Subgraph, SubgraphId, SubgraphVersion};

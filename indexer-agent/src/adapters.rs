//! External collaborator interfaces
//!
//! The agent consumes but does not define these services: the indexing
//! node, the per-network read-only monitor, the per-network write side,
//! and the operator's authoring surface. Implementations carry their own
//! retry and timeout policy; the agent recovers from their failures at
//! the eventual boundaries.

use async_trait::async_trait;
use std::sync::Arc;

use indexer_core::types::{
    Address, Allocation, AllocationDecision, AllocationStatus, BlockPointer, DeploymentId,
    DisputeStatus, IndexingRule, Poi, PoiDispute, Subgraph, SubgraphDeployment, SubgraphId,
};
use indexer_core::{IndexerError, IndexerResult};

use crate::config::NetworkSpecification;

/// Adapter to the indexing node (graph-node)
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Probe the node; startup aborts if this fails
    async fn connect(&self) -> IndexerResult<()>;

    /// Deployments currently assigned to an indexing node
    async fn subgraph_deployments(&self) -> IndexerResult<Vec<DeploymentId>>;

    /// Ensure a deployment is indexed under the given name
    async fn ensure(&self, name: &str, deployment: &DeploymentId) -> IndexerResult<()>;

    /// Stop indexing a deployment
    async fn remove(&self, deployment: &DeploymentId) -> IndexerResult<()>;

    /// Proof of indexing for a deployment at a block, salted by indexer
    async fn proof_of_indexing(
        &self,
        deployment: &DeploymentId,
        block: &BlockPointer,
        indexer: &Address,
    ) -> IndexerResult<Option<Poi>>;

    /// Chain name the node reports for a deployment, if it is indexed
    async fn indexing_network(&self, deployment: &DeploymentId) -> IndexerResult<Option<String>>;
}

/// Read-only view of one protocol network
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn current_epoch_number(&self) -> IndexerResult<u64>;

    /// Resolve subgraphs with their version history
    async fn subgraphs(&self, ids: &[SubgraphId]) -> IndexerResult<Vec<Subgraph>>;

    /// Deployments visible on the network, with curation/staking totals
    async fn subgraph_deployments(&self) -> IndexerResult<Vec<SubgraphDeployment>>;

    /// The indexer's allocations in the given status
    async fn allocations(&self, status: AllocationStatus) -> IndexerResult<Vec<Allocation>>;

    /// Allocations closed within `lookback_epochs` before `current_epoch`
    async fn recently_closed_allocations(
        &self,
        current_epoch: u64,
        lookback_epochs: u64,
    ) -> IndexerResult<Vec<Allocation>>;

    /// Allocations whose dispute window ended at or before `claim_epoch`
    async fn claimable_allocations(&self, claim_epoch: u64) -> IndexerResult<Vec<Allocation>>;

    /// Closed allocations eligible for POI cross-checking, restricted to
    /// deployments the indexing node currently serves
    async fn disputable_allocations(
        &self,
        current_epoch: u64,
        deployments: &[DeploymentId],
        min_allocation: u64,
    ) -> IndexerResult<Vec<Allocation>>;

    /// Closed allocations for a deployment, most recent first
    async fn closed_allocations(
        &self,
        deployment: &DeploymentId,
    ) -> IndexerResult<Vec<Allocation>>;
}

/// On-chain allocation state as reported by the staking contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainAllocationState {
    /// Zero while the allocation is still open
    pub closed_at_epoch: u64,
}

/// Write side of one protocol network
#[async_trait]
pub trait Network: Send + Sync {
    fn specification(&self) -> &NetworkSpecification;

    /// The network's own meta-subgraph deployment, if configured
    fn network_subgraph_deployment(&self) -> Option<DeploymentId> {
        self.specification().network_subgraph_deployment
    }

    /// Idempotent on-chain indexer registration
    async fn register(&self) -> IndexerResult<()>;

    /// Claim rebate rewards for the given closed allocations
    async fn claim_rebate_rewards(&self, allocations: &[Allocation]) -> IndexerResult<()>;

    /// Epoch length in blocks, from the epoch manager contract
    async fn epoch_length(&self) -> IndexerResult<u64>;

    /// Epochs an allocation stays disputable after closing
    async fn channel_dispute_epochs(&self) -> IndexerResult<u64>;

    /// Protocol maximum allocation lifetime in epochs
    async fn max_allocation_epochs(&self) -> IndexerResult<u64>;

    /// Current on-chain state of an allocation
    async fn allocation_state(&self, id: &Address) -> IndexerResult<OnChainAllocationState>;

    /// Look up a block header by hash via the network provider
    async fn block(&self, hash: &str) -> IndexerResult<BlockPointer>;
}

/// Per-network authoring surface backed by the operator's store
#[async_trait]
pub trait Operator: Send + Sync {
    fn network_identifier(&self) -> String;

    /// Make sure the network's global indexing rule exists
    async fn ensure_global_indexing_rule(&self) -> IndexerResult<()>;

    /// Indexing rules, optionally merged over the global rule
    async fn indexing_rules(&self, merge_global: bool) -> IndexerResult<Vec<IndexingRule>>;

    /// Disputes already stored with the given status, at or above the epoch
    async fn fetch_poi_disputes(
        &self,
        status: DisputeStatus,
        min_closed_epoch: u64,
    ) -> IndexerResult<Vec<PoiDispute>>;

    /// Persist disputes, idempotent by `(allocation id, network)`
    async fn store_poi_disputes(&self, disputes: &[PoiDispute]) -> IndexerResult<Vec<PoiDispute>>;

    /// Open an allocation for the decision's deployment
    async fn create_allocation(
        &self,
        decision: &AllocationDecision,
        last_closed: Option<&Allocation>,
    ) -> IndexerResult<()>;

    /// Close whichever of the active allocations the decision makes eligible
    async fn close_eligible_allocations(
        &self,
        decision: &AllocationDecision,
        active: &[Allocation],
        epoch: u64,
    ) -> IndexerResult<()>;

    /// Close and reopen allocations past their lifetime
    async fn refresh_expired_allocations(
        &self,
        decision: &AllocationDecision,
        expired: &[Allocation],
    ) -> IndexerResult<()>;
}

/// One protocol network as the agent sees it: monitor, write side, and
/// operator surface. All three must agree on the network identifier.
#[derive(Clone)]
pub struct NetworkAndOperator {
    pub network: Arc<dyn Network>,
    pub monitor: Arc<dyn NetworkMonitor>,
    pub operator: Arc<dyn Operator>,
}

impl NetworkAndOperator {
    /// The shared network identifier; a mismatch between the network and
    /// its operator is a fatal configuration error.
    pub fn network_identifier(&self) -> IndexerResult<String> {
        let network_id = self.network.specification().network_identifier.clone();
        let operator_id = self.operator.network_identifier();
        if network_id != operator_id {
            return Err(IndexerError::Configuration(format!(
                "network and operator disagree on identifier: {} vs {}",
                network_id, operator_id
            )));
        }
        Ok(network_id)
    }
}

//! Mock adapters for tests
//!
//! In-memory implementations of the collaborator traits, recording every
//! side effect so tests can assert on what the agent did.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use indexer_core::types::{
    Address, Allocation, AllocationDecision, AllocationStatus, BlockPointer, DeploymentId,
    DisputeStatus, IndexingRule, Poi, PoiDispute, Subgraph, SubgraphDeployment, SubgraphId,
};
use indexer_core::{IndexerError, IndexerResult};

use crate::adapters::{GraphNode, Network, NetworkMonitor, OnChainAllocationState, Operator};
use crate::config::NetworkSpecification;

/// An allocation with sensible defaults for tests
pub fn mock_allocation(
    id_byte: u8,
    deployment: DeploymentId,
    created_at_epoch: u64,
) -> Allocation {
    Allocation {
        id: Address::new([id_byte; 20]),
        indexer: Address::new([0xEE; 20]),
        subgraph_deployment: deployment,
        allocated_tokens: Decimal::new(1_000, 0),
        created_at_epoch,
        closed_at_epoch: None,
        closed_at_epoch_start_block_hash: None,
        previous_epoch_start_block_hash: None,
        poi: None,
        status: AllocationStatus::Active,
    }
}

/// In-memory indexing node
#[derive(Default)]
pub struct MockGraphNode {
    /// Active deployment set; mutated by `ensure`/`remove`
    pub deployments: Mutex<Vec<DeploymentId>>,
    /// Every `ensure` call, in order
    pub ensured: Mutex<Vec<(String, DeploymentId)>>,
    /// Every `remove` call, in order
    pub removed: Mutex<Vec<DeploymentId>>,
    /// POIs by `(deployment, block hash)`
    pub pois: Mutex<HashMap<(DeploymentId, String), Poi>>,
    /// Chain reported per deployment
    pub chains: Mutex<HashMap<DeploymentId, String>>,
    pub fail_connect: AtomicBool,
}

impl MockGraphNode {
    pub fn with_deployments(deployments: Vec<DeploymentId>) -> Self {
        Self {
            deployments: Mutex::new(deployments),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GraphNode for MockGraphNode {
    async fn connect(&self) -> IndexerResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(IndexerError::GraphNodeConnection("unreachable".to_string()));
        }
        Ok(())
    }

    async fn subgraph_deployments(&self) -> IndexerResult<Vec<DeploymentId>> {
        Ok(self.deployments.lock().unwrap().clone())
    }

    async fn ensure(&self, name: &str, deployment: &DeploymentId) -> IndexerResult<()> {
        self.ensured
            .lock()
            .unwrap()
            .push((name.to_string(), *deployment));
        let mut deployments = self.deployments.lock().unwrap();
        if !deployments.contains(deployment) {
            deployments.push(*deployment);
        }
        Ok(())
    }

    async fn remove(&self, deployment: &DeploymentId) -> IndexerResult<()> {
        self.removed.lock().unwrap().push(*deployment);
        self.deployments.lock().unwrap().retain(|d| d != deployment);
        Ok(())
    }

    async fn proof_of_indexing(
        &self,
        deployment: &DeploymentId,
        block: &BlockPointer,
        _indexer: &Address,
    ) -> IndexerResult<Option<Poi>> {
        Ok(self
            .pois
            .lock()
            .unwrap()
            .get(&(*deployment, block.hash.clone()))
            .copied())
    }

    async fn indexing_network(&self, deployment: &DeploymentId) -> IndexerResult<Option<String>> {
        Ok(self.chains.lock().unwrap().get(deployment).cloned())
    }
}

/// In-memory network monitor
#[derive(Default)]
pub struct MockNetworkMonitor {
    pub epoch: AtomicU64,
    pub subgraphs: Mutex<Vec<Subgraph>>,
    pub network_deployments: Mutex<Vec<SubgraphDeployment>>,
    pub active: Mutex<Vec<Allocation>>,
    pub recently_closed: Mutex<Vec<Allocation>>,
    pub claimable: Mutex<Vec<Allocation>>,
    pub disputable: Mutex<Vec<Allocation>>,
    /// Closed allocations per deployment, most recent first
    pub closed: Mutex<HashMap<DeploymentId, Vec<Allocation>>>,
}

#[async_trait]
impl NetworkMonitor for MockNetworkMonitor {
    async fn current_epoch_number(&self) -> IndexerResult<u64> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn subgraphs(&self, ids: &[SubgraphId]) -> IndexerResult<Vec<Subgraph>> {
        Ok(self
            .subgraphs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn subgraph_deployments(&self) -> IndexerResult<Vec<SubgraphDeployment>> {
        Ok(self.network_deployments.lock().unwrap().clone())
    }

    async fn allocations(&self, status: AllocationStatus) -> IndexerResult<Vec<Allocation>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn recently_closed_allocations(
        &self,
        _current_epoch: u64,
        _lookback_epochs: u64,
    ) -> IndexerResult<Vec<Allocation>> {
        Ok(self.recently_closed.lock().unwrap().clone())
    }

    async fn claimable_allocations(&self, _claim_epoch: u64) -> IndexerResult<Vec<Allocation>> {
        Ok(self.claimable.lock().unwrap().clone())
    }

    async fn disputable_allocations(
        &self,
        _current_epoch: u64,
        deployments: &[DeploymentId],
        _min_allocation: u64,
    ) -> IndexerResult<Vec<Allocation>> {
        Ok(self
            .disputable
            .lock()
            .unwrap()
            .iter()
            .filter(|a| deployments.contains(&a.subgraph_deployment))
            .cloned()
            .collect())
    }

    async fn closed_allocations(
        &self,
        deployment: &DeploymentId,
    ) -> IndexerResult<Vec<Allocation>> {
        Ok(self
            .closed
            .lock()
            .unwrap()
            .get(deployment)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory network write side
pub struct MockNetwork {
    pub spec: NetworkSpecification,
    pub register_calls: AtomicU64,
    pub claimed: Mutex<Vec<Vec<Allocation>>>,
    pub epoch_length: AtomicU64,
    pub channel_dispute_epochs: AtomicU64,
    pub max_allocation_epochs: AtomicU64,
    /// `closed_at_epoch` per allocation, as the staking contract reports it
    pub allocation_states: Mutex<HashMap<Address, u64>>,
    /// Allocations whose state lookup fails with an RPC error
    pub failing_allocations: Mutex<HashSet<Address>>,
    /// Block headers by hash
    pub blocks: Mutex<HashMap<String, BlockPointer>>,
}

impl MockNetwork {
    pub fn new(spec: NetworkSpecification) -> Self {
        Self {
            spec,
            register_calls: AtomicU64::new(0),
            claimed: Mutex::new(Vec::new()),
            epoch_length: AtomicU64::new(7200),
            channel_dispute_epochs: AtomicU64::new(7),
            max_allocation_epochs: AtomicU64::new(28),
            allocation_states: Mutex::new(HashMap::new()),
            failing_allocations: Mutex::new(HashSet::new()),
            blocks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Network for MockNetwork {
    fn specification(&self) -> &NetworkSpecification {
        &self.spec
    }

    async fn register(&self) -> IndexerResult<()> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_rebate_rewards(&self, allocations: &[Allocation]) -> IndexerResult<()> {
        if !allocations.is_empty() {
            self.claimed.lock().unwrap().push(allocations.to_vec());
        }
        Ok(())
    }

    async fn epoch_length(&self) -> IndexerResult<u64> {
        Ok(self.epoch_length.load(Ordering::SeqCst))
    }

    async fn channel_dispute_epochs(&self) -> IndexerResult<u64> {
        Ok(self.channel_dispute_epochs.load(Ordering::SeqCst))
    }

    async fn max_allocation_epochs(&self) -> IndexerResult<u64> {
        Ok(self.max_allocation_epochs.load(Ordering::SeqCst))
    }

    async fn allocation_state(&self, id: &Address) -> IndexerResult<OnChainAllocationState> {
        if self.failing_allocations.lock().unwrap().contains(id) {
            return Err(IndexerError::ContractCall(format!(
                "getAllocation({}) timed out",
                id
            )));
        }
        let closed_at_epoch = self
            .allocation_states
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0);
        Ok(OnChainAllocationState { closed_at_epoch })
    }

    async fn block(&self, hash: &str) -> IndexerResult<BlockPointer> {
        self.blocks
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| IndexerError::ContractCall(format!("unknown block {}", hash)))
    }
}

/// In-memory operator surface
pub struct MockOperator {
    pub id: String,
    pub rules: Mutex<Vec<IndexingRule>>,
    pub global_rule_ensured: AtomicBool,
    pub stored_disputes: Mutex<Vec<PoiDispute>>,
    pub created: Mutex<Vec<AllocationDecision>>,
    pub closed: Mutex<Vec<(AllocationDecision, Vec<Allocation>)>>,
    pub refreshed: Mutex<Vec<(AllocationDecision, Vec<Allocation>)>>,
}

impl MockOperator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rules: Mutex::new(Vec::new()),
            global_rule_ensured: AtomicBool::new(false),
            stored_disputes: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            refreshed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Operator for MockOperator {
    fn network_identifier(&self) -> String {
        self.id.clone()
    }

    async fn ensure_global_indexing_rule(&self) -> IndexerResult<()> {
        self.global_rule_ensured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn indexing_rules(&self, _merge_global: bool) -> IndexerResult<Vec<IndexingRule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn fetch_poi_disputes(
        &self,
        status: DisputeStatus,
        min_closed_epoch: u64,
    ) -> IndexerResult<Vec<PoiDispute>> {
        Ok(self
            .stored_disputes
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.status == status && d.closed_epoch >= min_closed_epoch)
            .cloned()
            .collect())
    }

    async fn store_poi_disputes(&self, disputes: &[PoiDispute]) -> IndexerResult<Vec<PoiDispute>> {
        let mut stored = self.stored_disputes.lock().unwrap();
        for dispute in disputes {
            let exists = stored.iter().any(|d| {
                d.allocation_id == dispute.allocation_id
                    && d.protocol_network == dispute.protocol_network
            });
            if !exists {
                stored.push(dispute.clone());
            }
        }
        Ok(disputes.to_vec())
    }

    async fn create_allocation(
        &self,
        decision: &AllocationDecision,
        _last_closed: Option<&Allocation>,
    ) -> IndexerResult<()> {
        self.created.lock().unwrap().push(decision.clone());
        Ok(())
    }

    async fn close_eligible_allocations(
        &self,
        decision: &AllocationDecision,
        active: &[Allocation],
        _epoch: u64,
    ) -> IndexerResult<()> {
        self.closed
            .lock()
            .unwrap()
            .push((decision.clone(), active.to_vec()));
        Ok(())
    }

    async fn refresh_expired_allocations(
        &self,
        decision: &AllocationDecision,
        expired: &[Allocation],
    ) -> IndexerResult<()> {
        self.refreshed
            .lock()
            .unwrap()
            .push((decision.clone(), expired.to_vec()));
        Ok(())
    }
}

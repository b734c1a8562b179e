//! Proof-of-indexing dispute identification
//!
//! Cross-checks the POIs of recently closed allocations against reference
//! POIs produced by the local indexing node for the same indexer and
//! blocks. Matching POIs are recorded as `valid`; diverging POIs become
//! `potential` disputes; if a reference POI could not be produced the
//! allocation is recorded as `reference_unavailable` instead.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use indexer_core::types::{
    Allocation, DisputeStatus, Poi, PoiDispute, RewardsPool,
};
use indexer_core::{IndexerError, IndexerResult};

use crate::adapters::{GraphNode, Network, Operator};

/// Outcome counts of one dispute identification run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisputeSummary {
    pub potential: usize,
    pub valid: usize,
    pub reference_unavailable: usize,
}

/// Identify and persist potential POI disputes
///
/// Idempotent: allocations already recorded as `potential` or `valid` for
/// this epoch window are skipped, and the store itself is keyed by
/// `(allocation id, protocol network)`.
pub async fn identify_potential_disputes(
    disputable_allocations: &[Allocation],
    disputable_epoch: u64,
    operator: &dyn Operator,
    network: &dyn Network,
    graph_node: &dyn GraphNode,
) -> IndexerResult<DisputeSummary> {
    let network_identifier = operator.network_identifier();

    // Allocations processed in an earlier run.
    let mut already_processed = HashSet::new();
    for status in [DisputeStatus::Potential, DisputeStatus::Valid] {
        for dispute in operator.fetch_poi_disputes(status, disputable_epoch).await? {
            already_processed.insert(dispute.allocation_id);
        }
    }

    let new_allocations: Vec<&Allocation> = disputable_allocations
        .iter()
        .filter(|a| !already_processed.contains(&a.id))
        .collect();
    if new_allocations.is_empty() {
        debug!(
            network = %network_identifier,
            "no new disputable allocations"
        );
        return Ok(DisputeSummary::default());
    }

    // Group into rewards pools by (deployment, closed epoch, block hash)
    // and fill each pool with reference POIs.
    let mut pools: BTreeMap<[u8; 32], RewardsPool> = BTreeMap::new();
    for allocation in &new_allocations {
        if allocation.closed_at_epoch_start_block_hash.is_none() {
            continue;
        }
        let pool = RewardsPool::from_allocation(allocation);
        pools.entry(pool.key()).or_insert(pool);
    }

    for pool in pools.values_mut() {
        let closed_hash = match pool.closed_at_epoch_start_block_hash.clone() {
            Some(hash) => hash,
            None => continue,
        };
        let closed_block = network.block(&closed_hash).await?;
        pool.closed_at_epoch_start_block_number = Some(closed_block.number);
        pool.reference_poi = graph_node
            .proof_of_indexing(
                &pool.subgraph_deployment,
                &closed_block,
                &pool.allocation_indexer,
            )
            .await?;

        if let Some(previous_hash) = pool.previous_epoch_start_block_hash.clone() {
            let previous_block = network.block(&previous_hash).await?;
            pool.previous_epoch_start_block_number = Some(previous_block.number);
            pool.reference_previous_poi = graph_node
                .proof_of_indexing(
                    &pool.subgraph_deployment,
                    &previous_block,
                    &pool.allocation_indexer,
                )
                .await?;
        }
    }

    // Classify every new allocation against its pool.
    let mut disputes = Vec::with_capacity(new_allocations.len());
    let mut summary = DisputeSummary::default();
    for allocation in &new_allocations {
        let key = RewardsPool::from_allocation(allocation).key();
        let pool = pools
            .get(&key)
            .ok_or_else(|| IndexerError::MissingRewardsPool(allocation.id.to_hex()))?;

        let status = classify(allocation.poi, pool);
        match status {
            DisputeStatus::Valid => summary.valid += 1,
            DisputeStatus::Potential => summary.potential += 1,
            DisputeStatus::ReferenceUnavailable => summary.reference_unavailable += 1,
        }

        disputes.push(PoiDispute {
            allocation_id: allocation.id,
            subgraph_deployment_id: allocation.subgraph_deployment,
            allocation_indexer: allocation.indexer,
            allocation_amount: allocation.allocated_tokens,
            allocation_proof: allocation.poi.unwrap_or(Poi::new([0u8; 32])),
            closed_epoch: allocation.closed_at_epoch.unwrap_or(0),
            closed_epoch_reference_proof: pool.reference_poi,
            closed_epoch_start_block_hash: pool
                .closed_at_epoch_start_block_hash
                .clone()
                .unwrap_or_default(),
            closed_epoch_start_block_number: pool.closed_at_epoch_start_block_number.unwrap_or(0),
            previous_epoch_reference_proof: pool.reference_previous_poi,
            previous_epoch_start_block_hash: pool
                .previous_epoch_start_block_hash
                .clone()
                .unwrap_or_default(),
            previous_epoch_start_block_number: pool
                .previous_epoch_start_block_number
                .unwrap_or(0),
            status,
            protocol_network: network_identifier.clone(),
        });
    }

    operator.store_poi_disputes(&disputes).await?;

    info!(
        network = %network_identifier,
        potential_disputes = summary.potential,
        valid_allocations = summary.valid,
        reference_unavailable = summary.reference_unavailable,
        "POI dispute monitoring complete"
    );

    Ok(summary)
}

fn classify(poi: Option<Poi>, pool: &RewardsPool) -> DisputeStatus {
    let matches_reference = match poi {
        Some(poi) => {
            pool.reference_poi == Some(poi) || pool.reference_previous_poi == Some(poi)
        }
        None => false,
    };
    if matches_reference {
        DisputeStatus::Valid
    } else if pool.reference_poi.is_none() || pool.reference_previous_poi.is_none() {
        DisputeStatus::ReferenceUnavailable
    } else {
        DisputeStatus::Potential
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkSpecification;
    use crate::testing::{mock_allocation, MockGraphNode, MockNetwork, MockOperator};
    use indexer_core::types::{AllocationStatus, BlockPointer, DeploymentId};

    const CLOSED_HASH: &str = "0xc10c";
    const PREVIOUS_HASH: &str = "0xp4e5";

    fn closed_allocation(id_byte: u8, deployment: DeploymentId, poi: Option<Poi>) -> Allocation {
        let mut allocation = mock_allocation(id_byte, deployment, 90);
        allocation.status = AllocationStatus::Closed;
        allocation.closed_at_epoch = Some(100);
        allocation.closed_at_epoch_start_block_hash = Some(CLOSED_HASH.to_string());
        allocation.previous_epoch_start_block_hash = Some(PREVIOUS_HASH.to_string());
        allocation.poi = poi;
        allocation
    }

    fn network_with_blocks() -> MockNetwork {
        let network = MockNetwork::new(NetworkSpecification::new("eip155:1"));
        network.blocks.lock().unwrap().insert(
            CLOSED_HASH.to_string(),
            BlockPointer {
                number: 7_200_000,
                hash: CLOSED_HASH.to_string(),
            },
        );
        network.blocks.lock().unwrap().insert(
            PREVIOUS_HASH.to_string(),
            BlockPointer {
                number: 7_192_800,
                hash: PREVIOUS_HASH.to_string(),
            },
        );
        network
    }

    fn graph_node_with_references(
        deployment: DeploymentId,
        reference: Poi,
        previous: Poi,
    ) -> MockGraphNode {
        let graph_node = MockGraphNode::default();
        graph_node
            .pois
            .lock()
            .unwrap()
            .insert((deployment, CLOSED_HASH.to_string()), reference);
        graph_node
            .pois
            .lock()
            .unwrap()
            .insert((deployment, PREVIOUS_HASH.to_string()), previous);
        graph_node
    }

    #[tokio::test]
    async fn test_matching_previous_reference_is_valid() {
        let deployment = DeploymentId::new([1u8; 32]);
        let reference = Poi::new([0xAA; 32]);
        let previous = Poi::new([0xBB; 32]);
        let graph_node = graph_node_with_references(deployment, reference, previous);
        let network = network_with_blocks();
        let operator = MockOperator::new("eip155:1");

        let allocations = vec![closed_allocation(1, deployment, Some(previous))];
        let summary =
            identify_potential_disputes(&allocations, 99, &operator, &network, &graph_node)
                .await
                .unwrap();

        assert_eq!(summary.valid, 1);
        assert_eq!(summary.potential, 0);
        let stored = operator.stored_disputes.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, DisputeStatus::Valid);
        assert_eq!(stored[0].closed_epoch_start_block_number, 7_200_000);
    }

    #[tokio::test]
    async fn test_diverging_poi_is_potential() {
        let deployment = DeploymentId::new([1u8; 32]);
        let graph_node = graph_node_with_references(
            deployment,
            Poi::new([0xAA; 32]),
            Poi::new([0xBB; 32]),
        );
        let network = network_with_blocks();
        let operator = MockOperator::new("eip155:1");

        let allocations = vec![closed_allocation(1, deployment, Some(Poi::new([0xCC; 32])))];
        let summary =
            identify_potential_disputes(&allocations, 99, &operator, &network, &graph_node)
                .await
                .unwrap();

        assert_eq!(summary.potential, 1);
        assert_eq!(
            operator.stored_disputes.lock().unwrap()[0].status,
            DisputeStatus::Potential
        );
    }

    #[tokio::test]
    async fn test_missing_reference_is_reference_unavailable() {
        let deployment = DeploymentId::new([1u8; 32]);
        // Only the close-epoch reference exists; the previous one is missing.
        let graph_node = MockGraphNode::default();
        graph_node
            .pois
            .lock()
            .unwrap()
            .insert((deployment, CLOSED_HASH.to_string()), Poi::new([0xAA; 32]));
        let network = network_with_blocks();
        let operator = MockOperator::new("eip155:1");

        let allocations = vec![closed_allocation(1, deployment, Some(Poi::new([0xCC; 32])))];
        let summary =
            identify_potential_disputes(&allocations, 99, &operator, &network, &graph_node)
                .await
                .unwrap();

        assert_eq!(summary.reference_unavailable, 1);
        assert_eq!(
            operator.stored_disputes.lock().unwrap()[0].status,
            DisputeStatus::ReferenceUnavailable
        );
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let deployment = DeploymentId::new([1u8; 32]);
        let graph_node = graph_node_with_references(
            deployment,
            Poi::new([0xAA; 32]),
            Poi::new([0xBB; 32]),
        );
        let network = network_with_blocks();
        let operator = MockOperator::new("eip155:1");

        let allocations = vec![closed_allocation(1, deployment, Some(Poi::new([0xCC; 32])))];
        let first =
            identify_potential_disputes(&allocations, 99, &operator, &network, &graph_node)
                .await
                .unwrap();
        assert_eq!(first.potential, 1);

        let second =
            identify_potential_disputes(&allocations, 99, &operator, &network, &graph_node)
                .await
                .unwrap();
        assert_eq!(second, DisputeSummary::default());
        assert_eq!(operator.stored_disputes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_allocation_without_close_block_is_fatal() {
        let deployment = DeploymentId::new([1u8; 32]);
        let graph_node = MockGraphNode::default();
        let network = network_with_blocks();
        let operator = MockOperator::new("eip155:1");

        let mut allocation = closed_allocation(1, deployment, None);
        allocation.closed_at_epoch_start_block_hash = None;

        let result =
            identify_potential_disputes(&[allocation], 99, &operator, &network, &graph_node).await;
        assert!(matches!(result, Err(IndexerError::MissingRewardsPool(_))));
    }
}

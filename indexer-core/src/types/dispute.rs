//! Proof-of-indexing disputes and rewards pools
//!
//! Recently closed allocations are grouped into rewards pools keyed by
//! `(deployment, closed epoch, epoch start block hash)` and their POIs are
//! cross-checked against reference POIs produced by the local indexing
//! node. Disputes are persisted append-only, keyed by
//! `(allocation id, protocol network)`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::allocation::{Address, Allocation, Poi};
use super::deployment::DeploymentId;
use rust_decimal::Decimal;

/// Dispute classification after cross-checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// The allocation's POI matches one of the reference POIs
    Valid,
    /// The POI diverges from both references
    Potential,
    /// Cross-checking was inconclusive: a reference POI is missing
    ReferenceUnavailable,
}

/// A persisted proof-of-indexing dispute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiDispute {
    pub allocation_id: Address,
    pub subgraph_deployment_id: DeploymentId,
    pub allocation_indexer: Address,
    pub allocation_amount: Decimal,
    /// The POI the allocation was closed with
    pub allocation_proof: Poi,
    pub closed_epoch: u64,
    pub closed_epoch_reference_proof: Option<Poi>,
    pub closed_epoch_start_block_hash: String,
    pub closed_epoch_start_block_number: u64,
    pub previous_epoch_reference_proof: Option<Poi>,
    pub previous_epoch_start_block_hash: String,
    pub previous_epoch_start_block_number: u64,
    pub status: DisputeStatus,
    pub protocol_network: String,
}

/// Reference POIs for the allocations of one `(deployment, epoch)` group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardsPool {
    pub subgraph_deployment: DeploymentId,
    pub closed_at_epoch: u64,
    pub closed_at_epoch_start_block_hash: Option<String>,
    pub closed_at_epoch_start_block_number: Option<u64>,
    pub previous_epoch_start_block_hash: Option<String>,
    pub previous_epoch_start_block_number: Option<u64>,
    /// The indexer whose reference POIs this pool carries
    pub allocation_indexer: Address,
    pub reference_poi: Option<Poi>,
    pub reference_previous_poi: Option<Poi>,
}

impl RewardsPool {
    /// Seed a pool from a closed allocation; reference POIs and block
    /// numbers are filled in by the dispute identifier.
    pub fn from_allocation(allocation: &Allocation) -> Self {
        Self {
            subgraph_deployment: allocation.subgraph_deployment,
            closed_at_epoch: allocation.closed_at_epoch.unwrap_or(0),
            closed_at_epoch_start_block_hash: allocation.closed_at_epoch_start_block_hash.clone(),
            closed_at_epoch_start_block_number: None,
            previous_epoch_start_block_hash: allocation.previous_epoch_start_block_hash.clone(),
            previous_epoch_start_block_number: None,
            allocation_indexer: allocation.indexer,
            reference_poi: None,
            reference_previous_poi: None,
        }
    }

    /// Stable structural key: `(deployment, closed epoch, start block hash)`
    pub fn key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.subgraph_deployment.as_bytes());
        hasher.update(self.closed_at_epoch.to_be_bytes());
        if let Some(hash) = &self.closed_at_epoch_start_block_hash {
            hasher.update(hash.as_bytes());
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::allocation::AllocationStatus;

    fn allocation(deployment_byte: u8, epoch: u64) -> Allocation {
        Allocation {
            id: Address::new([1u8; 20]),
            indexer: Address::new([2u8; 20]),
            subgraph_deployment: DeploymentId::new([deployment_byte; 32]),
            allocated_tokens: Decimal::ZERO,
            created_at_epoch: epoch - 10,
            closed_at_epoch: Some(epoch),
            closed_at_epoch_start_block_hash: Some("0xaa".to_string()),
            previous_epoch_start_block_hash: Some("0xbb".to_string()),
            poi: None,
            status: AllocationStatus::Closed,
        }
    }

    #[test]
    fn test_pool_key_is_structural() {
        let a = RewardsPool::from_allocation(&allocation(1, 100));
        let mut b = RewardsPool::from_allocation(&allocation(1, 100));
        // Reference POIs do not participate in the key.
        b.reference_poi = Some(Poi::new([9u8; 32]));
        assert_eq!(a.key(), b.key());

        let other_epoch = RewardsPool::from_allocation(&allocation(1, 101));
        assert_ne!(a.key(), other_epoch.key());

        let other_deployment = RewardsPool::from_allocation(&allocation(2, 100));
        assert_ne!(a.key(), other_deployment.key());
    }
}

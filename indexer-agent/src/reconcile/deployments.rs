//! Deployment reconciliation
//!
//! Diffs the deployments the indexing node is running against the target
//! set derived from rules and on-chain data, then applies the difference
//! through a bounded worker pool. Deployments backing a still-eligible
//! allocation are never removed, even when no rule targets them anymore.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use indexer_core::types::{Allocation, DeploymentId};
use indexer_core::IndexerResult;

use crate::adapters::GraphNode;

/// Prefix for subgraph names assigned by the agent
const DEPLOYMENT_NAME_PREFIX: &str = "indexer-agent";

/// The planned difference between active and target deployments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentChanges {
    pub deploy: Vec<DeploymentId>,
    pub remove: Vec<DeploymentId>,
}

impl DeploymentChanges {
    pub fn is_empty(&self) -> bool {
        self.deploy.is_empty() && self.remove.is_empty()
    }
}

/// Name a deployment is indexed under: the agent prefix plus the tail of
/// the IPFS rendering, enough to stay readable and collision-free.
pub fn deployment_name(deployment: &DeploymentId) -> String {
    let ipfs = deployment.ipfs_hash();
    let tail = &ipfs[ipfs.len() - 10..];
    format!("{}/{}", DEPLOYMENT_NAME_PREFIX, tail)
}

/// Compute which deployments to add and which to remove
///
/// Both inputs are deduplicated by bytes. A deployment is removed only if
/// it is neither targeted nor backing an eligible allocation.
pub fn plan_deployment_changes(
    active: &[DeploymentId],
    target: &[DeploymentId],
    eligible_allocations: &[Allocation],
) -> DeploymentChanges {
    let active: BTreeSet<DeploymentId> = active.iter().copied().collect();
    let target: BTreeSet<DeploymentId> = target.iter().copied().collect();
    let eligible: BTreeSet<DeploymentId> = eligible_allocations
        .iter()
        .map(|a| a.subgraph_deployment)
        .collect();

    let deploy = target.difference(&active).copied().collect();
    let remove = active
        .iter()
        .filter(|d| !target.contains(d) && !eligible.contains(d))
        .copied()
        .collect();

    DeploymentChanges { deploy, remove }
}

/// Reconcile the indexing node with the target deployment set
///
/// Changes are applied through a worker pool of `concurrency` tasks;
/// per-deployment failures are logged and do not fail the cycle. Returns
/// once the pool has drained.
pub async fn reconcile_deployments(
    graph_node: &dyn GraphNode,
    active: &[DeploymentId],
    target: &[DeploymentId],
    eligible_allocations: &[Allocation],
    concurrency: usize,
) -> IndexerResult<DeploymentChanges> {
    let changes = plan_deployment_changes(active, target, eligible_allocations);

    if changes.is_empty() {
        debug!("deployments in sync with target");
        return Ok(changes);
    }

    info!(
        deploy = changes.deploy.len(),
        remove = changes.remove.len(),
        "reconciling deployments"
    );

    enum Change {
        Ensure(DeploymentId),
        Remove(DeploymentId),
    }

    let work = changes
        .deploy
        .iter()
        .map(|d| Change::Ensure(*d))
        .chain(changes.remove.iter().map(|d| Change::Remove(*d)))
        .collect::<Vec<Change>>();

    stream::iter(work)
        .for_each_concurrent(concurrency, |change| async move {
            match change {
                Change::Ensure(deployment) => {
                    let name = deployment_name(&deployment);
                    // IPFS retrieval may block for a long time; failures
                    // here resolve on a later cycle.
                    if let Err(e) = graph_node.ensure(&name, &deployment).await {
                        warn!(deployment = %deployment, error = %e, "failed to deploy");
                    }
                }
                Change::Remove(deployment) => {
                    if let Err(e) = graph_node.remove(&deployment).await {
                        warn!(deployment = %deployment, error = %e, "failed to remove");
                    }
                }
            }
        })
        .await;

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_allocation, MockGraphNode};

    fn deployment(byte: u8) -> DeploymentId {
        DeploymentId::new([byte; 32])
    }

    #[test]
    fn test_plan_diffs_active_and_target() {
        let active = vec![deployment(1), deployment(2)];
        let target = vec![deployment(2), deployment(3)];

        let changes = plan_deployment_changes(&active, &target, &[]);
        assert_eq!(changes.deploy, vec![deployment(3)]);
        assert_eq!(changes.remove, vec![deployment(1)]);
    }

    #[test]
    fn test_eligible_allocations_block_removal() {
        // active = [D1, D2], target = [D1], eligible allocation on D2.
        let active = vec![deployment(1), deployment(2)];
        let target = vec![deployment(1)];
        let eligible = vec![mock_allocation(9, deployment(2), 100)];

        let changes = plan_deployment_changes(&active, &target, &eligible);
        assert!(changes.deploy.is_empty());
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn test_plan_dedups_by_bytes() {
        let active = vec![deployment(1), deployment(1)];
        let target = vec![deployment(2), deployment(2)];

        let changes = plan_deployment_changes(&active, &target, &[]);
        assert_eq!(changes.deploy, vec![deployment(2)]);
        assert_eq!(changes.remove, vec![deployment(1)]);
    }

    #[test]
    fn test_deployment_name_uses_ipfs_tail() {
        let id = deployment(7);
        let name = deployment_name(&id);
        let ipfs = id.ipfs_hash();
        assert_eq!(name, format!("indexer-agent/{}", &ipfs[ipfs.len() - 10..]));
    }

    #[tokio::test]
    async fn test_reconcile_applies_changes() {
        let graph_node = MockGraphNode::with_deployments(vec![deployment(1)]);
        let target = vec![deployment(2)];

        let changes = reconcile_deployments(&graph_node, &[deployment(1)], &target, &[], 10)
            .await
            .unwrap();

        assert_eq!(changes.deploy, vec![deployment(2)]);
        assert_eq!(changes.remove, vec![deployment(1)]);
        let ensured = graph_node.ensured.lock().unwrap();
        assert_eq!(ensured.len(), 1);
        assert_eq!(ensured[0].1, deployment(2));
        assert_eq!(*graph_node.removed.lock().unwrap(), vec![deployment(1)]);
    }
}

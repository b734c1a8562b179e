//! Allocation action reconciliation
//!
//! Decides, per deployment, whether to open, close, or refresh
//! allocations, and executes the decisions through the operator. Networks
//! in manual allocation management are left untouched. Allocation state is
//! re-read from the network immediately before acting, since the snapshot
//! that triggered the cycle may be minutes old.

use std::cmp::max;
use tracing::{debug, warn};

use indexer_core::types::{Allocation, AllocationDecision, AllocationStatus};
use indexer_core::{IndexerErrorCode, IndexerResult};

use crate::adapters::NetworkAndOperator;
use crate::config::AllocationManagementMode;
use crate::multi_networks::{MultiNetworks, NetworkMapped};

/// Counts of allocation actions taken in one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSummary {
    pub created: usize,
    pub closed: usize,
    pub refreshed: usize,
}

impl ActionSummary {
    fn add(&mut self, other: ActionSummary) {
        self.created += other.created;
        self.closed += other.closed;
        self.refreshed += other.refreshed;
    }
}

/// Reconcile allocation actions across all networks
pub async fn reconcile_actions(
    networks: &MultiNetworks<NetworkAndOperator>,
    decisions: NetworkMapped<Vec<AllocationDecision>>,
    active_allocations: NetworkMapped<Vec<Allocation>>,
    epochs: NetworkMapped<u64>,
    max_allocation_epochs: NetworkMapped<u64>,
) -> IndexerResult<ActionSummary> {
    let mut decisions = decisions;

    // Networks in manual mode take no actions at all.
    for (id, item) in networks.iter() {
        let mode = item.network.specification().allocation_management;
        if mode != AllocationManagementMode::Manual {
            continue;
        }
        if let Some(network_decisions) = decisions.get_mut(id) {
            if !network_decisions.is_empty() {
                warn!(
                    network = %id,
                    decisions = network_decisions.len(),
                    "allocation management is manual; skipping allocation actions"
                );
                network_decisions.clear();
            }
        }
    }
    if decisions.values().all(|d| d.is_empty()) {
        return Ok(ActionSummary::default());
    }

    // Never allocate towards the network subgraph unless opted in.
    for (id, item) in networks.iter() {
        let spec = item.network.specification();
        if spec.allocate_on_network_subgraph {
            continue;
        }
        let network_subgraph = match item.network.network_subgraph_deployment() {
            Some(deployment) => deployment,
            None => continue,
        };
        if let Some(network_decisions) = decisions.get_mut(id) {
            for decision in network_decisions
                .iter_mut()
                .filter(|d| d.deployment == network_subgraph && d.to_allocate)
            {
                debug!(
                    network = %id,
                    deployment = %decision.deployment,
                    "not allocating towards the network subgraph"
                );
                decision.to_allocate = false;
            }
        }
    }

    let zipped = networks.zip4(decisions, active_allocations, epochs, max_allocation_epochs)?;
    let summaries = networks
        .map_network_mapped(
            zipped,
            |item, (decisions, active, epoch, max_epochs)| async move {
                debug!(
                    network = %item.network.specification().network_identifier,
                    decisions = decisions.len(),
                    active_allocations = active.len(),
                    epoch,
                    "reconciling allocation actions"
                );
                let mut summary = ActionSummary::default();
                for decision in &decisions {
                    summary.add(
                        reconcile_deployment_allocations(item, decision, epoch, max_epochs)
                            .await?,
                    );
                }
                Ok(summary)
            },
        )
        .await?;

    let mut total = ActionSummary::default();
    for summary in summaries.values() {
        total.add(*summary);
    }
    Ok(total)
}

/// Act on a single allocation decision
async fn reconcile_deployment_allocations(
    item: &NetworkAndOperator,
    decision: &AllocationDecision,
    epoch: u64,
    max_allocation_epochs: u64,
) -> IndexerResult<ActionSummary> {
    let mut summary = ActionSummary::default();

    // Freshness guard: act on current allocation state, not the snapshot
    // that triggered the cycle.
    let active = item.monitor.allocations(AllocationStatus::Active).await?;
    let matching: Vec<Allocation> = active
        .into_iter()
        .filter(|a| a.subgraph_deployment == decision.deployment)
        .collect();

    if !decision.to_allocate {
        item.operator
            .close_eligible_allocations(decision, &matching, epoch)
            .await?;
        summary.closed += matching.len();
        return Ok(summary);
    }

    if matching.is_empty() {
        let last_closed = item
            .monitor
            .closed_allocations(&decision.deployment)
            .await?
            .into_iter()
            .next();
        item.operator
            .create_allocation(decision, last_closed.as_ref())
            .await?;
        summary.created += 1;
        return Ok(summary);
    }

    let desired_lifetime = decision
        .rule_match
        .rule
        .as_ref()
        .and_then(|rule| rule.allocation_lifetime)
        .unwrap_or_else(|| max(1, max_allocation_epochs.saturating_sub(1)));

    let mut expired = Vec::new();
    for allocation in matching
        .into_iter()
        .filter(|a| epoch >= a.created_at_epoch + desired_lifetime)
    {
        // Cross-check against the chain before refreshing; an allocation
        // closed elsewhere must not be reopened. When the check itself
        // fails, assume the allocation is still open.
        match item.network.allocation_state(&allocation.id).await {
            Ok(state) if state.closed_at_epoch != 0 => {
                debug!(
                    allocation = %allocation.id,
                    closed_at_epoch = state.closed_at_epoch,
                    "allocation already closed on chain; skipping refresh"
                );
            }
            Ok(_) => expired.push(allocation),
            Err(e) => {
                warn!(
                    code = %IndexerErrorCode::IE006,
                    allocation = %allocation.id,
                    error = %e,
                    "failed to cross-check allocation state; treating it as open"
                );
                expired.push(allocation);
            }
        }
    }

    if !expired.is_empty() {
        summary.refreshed += expired.len();
        item.operator
            .refresh_expired_allocations(decision, &expired)
            .await?;
    }

    Ok(summary)
}

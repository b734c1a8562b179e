//! Agent Metrics
//!
//! Counters and gauges for the reconciliation loop, with a Prometheus
//! text export. Counters are cumulative across the process lifetime;
//! gauges reflect the most recent completed cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Metrics collector for the reconciliation loop
#[derive(Default)]
pub struct AgentMetrics {
    /// Reconciliation cycles started
    reconcile_cycles: AtomicU64,
    /// Cycles that aborted with a step-scoped failure
    reconcile_failures: AtomicU64,
    /// Deployments handed to the indexing node
    deployments_added: AtomicU64,
    /// Deployments removed from the indexing node
    deployments_removed: AtomicU64,
    /// Allocations opened
    allocations_created: AtomicU64,
    /// Allocations closed
    allocations_closed: AtomicU64,
    /// Allocations refreshed after expiry
    allocations_refreshed: AtomicU64,
    /// POI disputes stored as potential
    disputes_potential: AtomicU64,
    /// Allocations cross-checked as valid
    disputes_valid: AtomicU64,
    /// Rebate claim batches submitted
    rebate_claims: AtomicU64,
    /// Errors quarantined at eventual boundaries
    eventual_errors: AtomicU64,
    /// Last observed epoch per network
    epochs: RwLock<BTreeMap<String, u64>>,
    /// Deployment set sizes from the last cycle
    active_deployments: AtomicU64,
    target_deployments: AtomicU64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_started(&self) {
        self.reconcile_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_failed(&self) {
        self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deployments_changed(&self, added: usize, removed: usize) {
        self.deployments_added
            .fetch_add(added as u64, Ordering::Relaxed);
        self.deployments_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn allocation_actions(&self, created: usize, closed: usize, refreshed: usize) {
        self.allocations_created
            .fetch_add(created as u64, Ordering::Relaxed);
        self.allocations_closed
            .fetch_add(closed as u64, Ordering::Relaxed);
        self.allocations_refreshed
            .fetch_add(refreshed as u64, Ordering::Relaxed);
    }

    pub fn disputes_identified(&self, potential: usize, valid: usize) {
        self.disputes_potential
            .fetch_add(potential as u64, Ordering::Relaxed);
        self.disputes_valid
            .fetch_add(valid as u64, Ordering::Relaxed);
    }

    pub fn rebates_claimed(&self) {
        self.rebate_claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eventual_error(&self) {
        self.eventual_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn set_epoch(&self, network: &str, epoch: u64) {
        self.epochs
            .write()
            .await
            .insert(network.to_string(), epoch);
    }

    pub fn set_deployment_counts(&self, active: usize, target: usize) {
        self.active_deployments
            .store(active as u64, Ordering::Relaxed);
        self.target_deployments
            .store(target as u64, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all metrics
    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconcile_cycles: self.reconcile_cycles.load(Ordering::Relaxed),
            reconcile_failures: self.reconcile_failures.load(Ordering::Relaxed),
            deployments_added: self.deployments_added.load(Ordering::Relaxed),
            deployments_removed: self.deployments_removed.load(Ordering::Relaxed),
            allocations_created: self.allocations_created.load(Ordering::Relaxed),
            allocations_closed: self.allocations_closed.load(Ordering::Relaxed),
            allocations_refreshed: self.allocations_refreshed.load(Ordering::Relaxed),
            disputes_potential: self.disputes_potential.load(Ordering::Relaxed),
            disputes_valid: self.disputes_valid.load(Ordering::Relaxed),
            rebate_claims: self.rebate_claims.load(Ordering::Relaxed),
            eventual_errors: self.eventual_errors.load(Ordering::Relaxed),
            epochs: self.epochs.read().await.clone(),
            active_deployments: self.active_deployments.load(Ordering::Relaxed),
            target_deployments: self.target_deployments.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format
    pub async fn prometheus_export(&self) -> String {
        let snapshot = self.snapshot().await;
        let mut output = String::new();

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!(
            "indexer_agent_reconcile_cycles_total",
            "Reconciliation cycles started",
            "counter",
            snapshot.reconcile_cycles
        );
        metric!(
            "indexer_agent_reconcile_failures_total",
            "Reconciliation cycles that failed",
            "counter",
            snapshot.reconcile_failures
        );
        metric!(
            "indexer_agent_deployments_added_total",
            "Deployments handed to the indexing node",
            "counter",
            snapshot.deployments_added
        );
        metric!(
            "indexer_agent_deployments_removed_total",
            "Deployments removed from the indexing node",
            "counter",
            snapshot.deployments_removed
        );
        metric!(
            "indexer_agent_allocations_created_total",
            "Allocations opened",
            "counter",
            snapshot.allocations_created
        );
        metric!(
            "indexer_agent_allocations_closed_total",
            "Allocations closed",
            "counter",
            snapshot.allocations_closed
        );
        metric!(
            "indexer_agent_allocations_refreshed_total",
            "Allocations refreshed after expiry",
            "counter",
            snapshot.allocations_refreshed
        );
        metric!(
            "indexer_agent_disputes_potential_total",
            "POI disputes stored as potential",
            "counter",
            snapshot.disputes_potential
        );
        metric!(
            "indexer_agent_disputes_valid_total",
            "Allocations cross-checked as valid",
            "counter",
            snapshot.disputes_valid
        );
        metric!(
            "indexer_agent_rebate_claims_total",
            "Rebate claim batches submitted",
            "counter",
            snapshot.rebate_claims
        );
        metric!(
            "indexer_agent_eventual_errors_total",
            "Errors quarantined at eventual boundaries",
            "counter",
            snapshot.eventual_errors
        );
        metric!(
            "indexer_agent_active_deployments",
            "Deployments on the indexing node at the last cycle",
            "gauge",
            snapshot.active_deployments
        );
        metric!(
            "indexer_agent_target_deployments",
            "Target deployments at the last cycle",
            "gauge",
            snapshot.target_deployments
        );

        output.push_str(
            "# HELP indexer_agent_current_epoch Last observed epoch per network\n\
             # TYPE indexer_agent_current_epoch gauge\n",
        );
        for (network, epoch) in &snapshot.epochs {
            output.push_str(&format!(
                "indexer_agent_current_epoch{{network=\"{}\"}} {}\n",
                network, epoch
            ));
        }

        output
    }
}

/// Complete metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub reconcile_cycles: u64,
    pub reconcile_failures: u64,
    pub deployments_added: u64,
    pub deployments_removed: u64,
    pub allocations_created: u64,
    pub allocations_closed: u64,
    pub allocations_refreshed: u64,
    pub disputes_potential: u64,
    pub disputes_valid: u64,
    pub rebate_claims: u64,
    pub eventual_errors: u64,
    pub epochs: BTreeMap<String, u64>,
    pub active_deployments: u64,
    pub target_deployments: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_accumulate() {
        let metrics = AgentMetrics::new();
        metrics.cycle_started();
        metrics.cycle_started();
        metrics.deployments_changed(3, 1);
        metrics.allocation_actions(1, 2, 0);

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.reconcile_cycles, 2);
        assert_eq!(snapshot.deployments_added, 3);
        assert_eq!(snapshot.deployments_removed, 1);
        assert_eq!(snapshot.allocations_created, 1);
        assert_eq!(snapshot.allocations_closed, 2);
    }

    #[tokio::test]
    async fn test_prometheus_export_contains_epochs() {
        let metrics = AgentMetrics::new();
        metrics.set_epoch("eip155:1", 712).await;
        metrics.cycle_started();

        let output = metrics.prometheus_export().await;
        assert!(output.contains("indexer_agent_reconcile_cycles_total 1"));
        assert!(output.contains("indexer_agent_current_epoch{network=\"eip155:1\"} 712"));
    }
}

//! The indexer agent
//!
//! Wires timers, network monitors, operators, and the indexing node into
//! the eventual graph, and hosts the reconciliation pipeline that runs on
//! every joined snapshot: claim rebates, identify POI disputes, reconcile
//! deployments, reconcile allocation actions.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use indexer_core::types::{
    Allocation, AllocationDecision, AllocationStatus, DeploymentId, IdentifierKind, IndexingRule,
    SubgraphId,
};
use indexer_core::{IndexerError, IndexerErrorCode, IndexerResult};

use crate::adapters::{GraphNode, NetworkAndOperator};
use crate::config::AgentConfig;
use crate::disputes::identify_potential_disputes;
use crate::eventual::{join2, join3, timer, PipeHandle};
use crate::evaluate::evaluate_deployments;
use crate::metrics::AgentMetrics;
use crate::multi_networks::{MultiNetworks, NetworkMapped};
use crate::reconcile::{deployment_name, reconcile_actions, reconcile_deployments};
use crate::rules::{normalize_rules, previous_version_buffer_secs};

/// Everything one reconciliation cycle consumes
#[derive(Clone, PartialEq)]
struct ReconcileSnapshot {
    current_epochs: NetworkMapped<u64>,
    max_allocation_epochs: NetworkMapped<u64>,
    active_deployments: Vec<DeploymentId>,
    target_deployments: Vec<DeploymentId>,
    active_allocations: NetworkMapped<Vec<Allocation>>,
    decisions: NetworkMapped<Vec<AllocationDecision>>,
    recently_closed: Vec<Allocation>,
    claimable: NetworkMapped<Vec<Allocation>>,
    disputable: NetworkMapped<Vec<Allocation>>,
}

/// The reconciliation engine
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    graph_node: Arc<dyn GraphNode>,
    networks: Arc<MultiNetworks<NetworkAndOperator>>,
    metrics: Arc<AgentMetrics>,
}

/// Handle to a running agent; dropping it stops the reconciliation loop
pub struct AgentHandle {
    _pipe: PipeHandle,
    metrics: Arc<AgentMetrics>,
}

impl AgentHandle {
    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }
}

impl Agent {
    /// Create an agent over the given networks
    ///
    /// Every network/operator pair must agree on its network identifier
    /// and identifiers must be distinct; either violation is a fatal
    /// configuration error.
    pub fn new(
        config: AgentConfig,
        graph_node: Arc<dyn GraphNode>,
        networks: Vec<NetworkAndOperator>,
    ) -> IndexerResult<Self> {
        for pair in &networks {
            pair.network_identifier()?;
        }
        let networks = MultiNetworks::new(networks, |pair| {
            pair.network.specification().network_identifier.clone()
        })?;

        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                graph_node,
                networks: Arc::new(networks),
                metrics: Arc::new(AgentMetrics::new()),
            }),
        })
    }

    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.inner.metrics
    }

    /// Run the startup sequence and launch the reconciliation loop
    pub async fn start(&self) -> IndexerResult<AgentHandle> {
        let inner = &self.inner;

        // The indexing node must be reachable before anything else runs.
        inner.graph_node.connect().await?;

        inner
            .networks
            .map(|id, item| {
                let id = id.to_string();
                async move {
                    item.operator.ensure_global_indexing_rule().await?;
                    debug!(network = %id, "global indexing rule ensured");
                    Ok(())
                }
            })
            .await?;

        // Index every configured network subgraph and verify the indexing
        // node serves it from the chain this network expects.
        for (id, item) in inner.networks.iter() {
            let deployment = match item.network.network_subgraph_deployment() {
                Some(deployment) => deployment,
                None => continue,
            };
            inner
                .graph_node
                .ensure(&deployment_name(&deployment), &deployment)
                .await?;
            if let Some(chain) = inner.graph_node.indexing_network(&deployment).await? {
                let spec = item.network.specification();
                if !spec.matches_chain(&chain) {
                    return Err(IndexerError::NetworkIdentityMismatch {
                        expected: spec.network_identifier.clone(),
                        actual: chain,
                    });
                }
            }
            info!(network = %id, deployment = %deployment, "network subgraph ensured");
        }

        inner
            .networks
            .map(|id, item| {
                let id = id.to_string();
                async move {
                    item.network.register().await?;
                    info!(network = %id, "indexer registered");
                    Ok(())
                }
            })
            .await?;

        let pipe = self.build_reconcile_pipe();
        info!(networks = inner.networks.len(), "indexer agent started");

        Ok(AgentHandle {
            _pipe: pipe,
            metrics: inner.metrics.clone(),
        })
    }

    /// Build the eventual graph and the terminal reconciliation pipe
    fn build_reconcile_pipe(&self) -> PipeHandle {
        let inner = self.inner.clone();
        let intervals = &inner.config.intervals;

        let current_epochs = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.epoch_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move { item.monitor.current_epoch_number().await })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch current epoch"),
            )
        };

        let max_allocation_epochs = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.epoch_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move { item.network.max_allocation_epochs().await })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch max allocation epochs"),
            )
        };

        let channel_dispute_epochs = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.epoch_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move { item.network.channel_dispute_epochs().await })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch channel dispute epochs"),
            )
        };

        let indexing_rules = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.indexing_rules_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move { refresh_network_rules(item).await })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to refresh indexing rules"),
            )
        };

        let active_deployments = {
            let graph_node = inner.graph_node.clone();
            timer(Duration::from_secs(intervals.active_deployments_secs)).try_map(
                move |_| {
                    let graph_node = graph_node.clone();
                    async move { graph_node.subgraph_deployments().await }
                },
                on_eventual_error(&inner, "failed to list active deployments"),
            )
        };

        let network_deployments = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.network_deployments_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move { item.monitor.subgraph_deployments().await })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch network deployments"),
            )
        };

        let active_allocations = {
            let networks = inner.networks.clone();
            timer(Duration::from_secs(intervals.active_allocations_secs)).try_map(
                move |_| {
                    let networks = networks.clone();
                    async move {
                        networks
                            .map(|_, item| async move {
                                item.monitor.allocations(AllocationStatus::Active).await
                            })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch active allocations"),
            )
        };

        let decisions = {
            let networks = inner.networks.clone();
            join2(&indexing_rules, &network_deployments).try_map(
                move |(rules, deployments)| {
                    let networks = networks.clone();
                    async move {
                        let zipped = networks.zip(rules, deployments)?;
                        Ok(zipped
                            .into_iter()
                            .map(|(id, (rules, deployments))| {
                                let decisions = if rules.is_empty() {
                                    Vec::new()
                                } else {
                                    evaluate_deployments(&deployments, &rules)
                                };
                                (id, decisions)
                            })
                            .collect::<NetworkMapped<Vec<AllocationDecision>>>())
                    }
                },
                on_eventual_error(&inner, "failed to evaluate deployments"),
            )
        };

        let target_deployments = {
            let offchain = inner.config.offchain_deployments.clone();
            join3(
                &timer(Duration::from_secs(intervals.target_deployments_secs)),
                &decisions,
                &indexing_rules,
            )
            .map(move |(_, decisions, rules)| {
                let offchain = offchain.clone();
                async move { compute_target_deployments(&decisions, &rules, &offchain) }
            })
        };

        let recently_closed = {
            let networks = inner.networks.clone();
            join2(&current_epochs, &active_allocations).try_map(
                move |(epochs, _active)| {
                    let networks = networks.clone();
                    async move {
                        let by_network = networks
                            .map_network_mapped(epochs, |item, epoch| async move {
                                item.monitor.recently_closed_allocations(epoch, 1).await
                            })
                            .await?;
                        Ok(by_network
                            .into_values()
                            .flatten()
                            .collect::<Vec<Allocation>>())
                    }
                },
                on_eventual_error(&inner, "failed to fetch recently closed allocations"),
            )
        };

        let claimable = {
            let networks = inner.networks.clone();
            join2(&current_epochs, &channel_dispute_epochs).try_map(
                move |(epochs, dispute_epochs)| {
                    let networks = networks.clone();
                    async move {
                        let zipped = networks.zip(epochs, dispute_epochs)?;
                        networks
                            .map_network_mapped(zipped, |item, (epoch, dispute_epochs)| async move {
                                item.monitor
                                    .claimable_allocations(epoch.saturating_sub(dispute_epochs))
                                    .await
                            })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch claimable allocations"),
            )
        };

        let disputable = {
            let networks = inner.networks.clone();
            join2(&current_epochs, &active_deployments).try_map(
                move |(epochs, deployments)| {
                    let networks = networks.clone();
                    async move {
                        let deployments = Arc::new(deployments);
                        networks
                            .map_network_mapped(epochs, |item, epoch| {
                                let deployments = deployments.clone();
                                async move {
                                    item.monitor
                                        .disputable_allocations(epoch, &deployments, 0)
                                        .await
                                }
                            })
                            .await
                    }
                },
                on_eventual_error(&inner, "failed to fetch disputable allocations"),
            )
        };

        let snapshots = join2(
            &timer(Duration::from_secs(intervals.reconcile_secs)),
            &join3(
                &join3(&current_epochs, &max_allocation_epochs, &active_deployments),
                &join3(&target_deployments, &active_allocations, &decisions),
                &join3(&recently_closed, &claimable, &disputable),
            ),
        )
        .map(|(tick, (a, b, c))| async move {
            let (current_epochs, max_allocation_epochs, active_deployments) = a;
            let (target_deployments, active_allocations, decisions) = b;
            let (recently_closed, claimable, disputable) = c;
            // The tick keeps consecutive snapshots distinct, so a cycle
            // runs every reconcile period even when nothing changed.
            (
                tick,
                ReconcileSnapshot {
                    current_epochs,
                    max_allocation_epochs,
                    active_deployments,
                    target_deployments,
                    active_allocations,
                    decisions,
                    recently_closed,
                    claimable,
                    disputable,
                },
            )
        });

        let pipe_inner = inner.clone();
        snapshots.pipe(move |(_, snapshot)| {
            let inner = pipe_inner.clone();
            async move { inner.reconcile(snapshot).await }
        })
    }
}

impl AgentInner {
    /// One reconciliation cycle, steps strictly in order
    async fn reconcile(&self, snapshot: ReconcileSnapshot) {
        self.metrics.cycle_started();
        for (network, epoch) in &snapshot.current_epochs {
            self.metrics.set_epoch(network, *epoch).await;
        }

        if let Err(e) = self.claim_rebate_rewards(snapshot.claimable.clone()).await {
            warn!(
                code = %e.code(),
                error = %e,
                "failed to claim rebate rewards"
            );
        }

        if let Err(e) = self.identify_disputes(&snapshot).await {
            warn!(
                code = %IndexerErrorCode::IE007,
                error = %e,
                "failed POI dispute monitoring"
            );
        }

        match self.reconcile_deployments_step(&snapshot).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    code = %IndexerErrorCode::IE005,
                    error = %e,
                    "failed to reconcile deployments; skipping allocation actions this cycle"
                );
                self.metrics.cycle_failed();
                return;
            }
        }

        match reconcile_actions(
            &self.networks,
            snapshot.decisions.clone(),
            snapshot.active_allocations.clone(),
            snapshot.current_epochs.clone(),
            snapshot.max_allocation_epochs.clone(),
        )
        .await
        {
            Ok(summary) => {
                self.metrics
                    .allocation_actions(summary.created, summary.closed, summary.refreshed);
            }
            Err(e) => {
                warn!(
                    code = %IndexerErrorCode::IE005,
                    error = %e,
                    "failed to reconcile allocation actions"
                );
                self.metrics.cycle_failed();
            }
        }
    }

    async fn claim_rebate_rewards(
        &self,
        claimable: NetworkMapped<Vec<Allocation>>,
    ) -> IndexerResult<()> {
        let metrics = &self.metrics;
        self.networks
            .map_network_mapped(claimable, |item, allocations| async move {
                if allocations.is_empty() {
                    return Ok(());
                }
                info!(
                    network = %item.network.specification().network_identifier,
                    count = allocations.len(),
                    "claiming rebate rewards"
                );
                item.network.claim_rebate_rewards(&allocations).await?;
                metrics.rebates_claimed();
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn identify_disputes(&self, snapshot: &ReconcileSnapshot) -> IndexerResult<()> {
        let graph_node = &self.graph_node;
        let metrics = &self.metrics;
        let zipped = self.networks.zip(
            snapshot.current_epochs.clone(),
            snapshot.disputable.clone(),
        )?;
        self.networks
            .map_network_mapped(zipped, |item, (epoch, disputable)| async move {
                let spec = item.network.specification();
                let disputable_epoch = epoch.saturating_sub(spec.poi_disputable_epochs);
                let summary = identify_potential_disputes(
                    &disputable,
                    disputable_epoch,
                    item.operator.as_ref(),
                    item.network.as_ref(),
                    graph_node.as_ref(),
                )
                .await?;
                metrics.disputes_identified(summary.potential, summary.valid);
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn reconcile_deployments_step(&self, snapshot: &ReconcileSnapshot) -> IndexerResult<()> {
        // The target always includes every configured network subgraph and
        // the static offchain list, whatever the rules say.
        let mut target = snapshot.target_deployments.clone();
        for (_, item) in self.networks.iter() {
            if let Some(deployment) = item.network.network_subgraph_deployment() {
                target.push(deployment);
            }
        }
        target.extend(self.config.offchain_deployments.iter().copied());

        // Deployments backing recently closed or still-active allocations
        // stay eligible and must not be removed.
        let mut eligible = snapshot.recently_closed.clone();
        eligible.extend(snapshot.active_allocations.values().flatten().cloned());

        let changes = reconcile_deployments(
            self.graph_node.as_ref(),
            &snapshot.active_deployments,
            &target,
            &eligible,
            self.config.deployment_concurrency,
        )
        .await?;

        self.metrics
            .deployments_changed(changes.deploy.len(), changes.remove.len());
        self.metrics
            .set_deployment_counts(snapshot.active_deployments.len(), target.len());
        Ok(())
    }
}

/// Re-fetch and normalize one network's indexing rules
async fn refresh_network_rules(item: &NetworkAndOperator) -> IndexerResult<Vec<IndexingRule>> {
    let rules = item.operator.indexing_rules(true).await?;

    let subgraph_ids: Vec<SubgraphId> = rules
        .iter()
        .filter(|r| r.identifier_kind == IdentifierKind::Subgraph)
        .map(|r| SubgraphId::new(r.identifier.clone()))
        .collect();
    if subgraph_ids.is_empty() {
        return Ok(rules);
    }

    let subgraphs = item.monitor.subgraphs(&subgraph_ids).await?;
    let epoch_length = item.network.epoch_length().await?;
    let buffer_secs = previous_version_buffer_secs(epoch_length);
    let now_secs = chrono::Utc::now().timestamp();
    Ok(normalize_rules(&rules, &subgraphs, buffer_secs, now_secs))
}

/// The union that defines the target deployment set: positive decisions,
/// offchain rules, and the static offchain list, deduplicated by bytes.
fn compute_target_deployments(
    decisions: &NetworkMapped<Vec<AllocationDecision>>,
    rules: &NetworkMapped<Vec<IndexingRule>>,
    static_offchain: &[DeploymentId],
) -> Vec<DeploymentId> {
    let mut target = BTreeSet::new();

    for decision in decisions.values().flatten() {
        if decision.to_allocate {
            target.insert(decision.deployment);
        }
    }

    for rule in rules.values().flatten() {
        if rule.decision_basis == indexer_core::types::DecisionBasis::Offchain {
            match DeploymentId::parse(&rule.identifier) {
                Ok(deployment) => {
                    target.insert(deployment);
                }
                Err(e) => {
                    debug!(
                        identifier = %rule.identifier,
                        error = %e,
                        "offchain rule identifier is not a deployment"
                    );
                }
            }
        }
    }

    target.extend(static_offchain.iter().copied());
    target.into_iter().collect()
}

/// Error handler shared by the eventuals: count and log, keep the
/// previous value.
fn on_eventual_error(
    inner: &Arc<AgentInner>,
    message: &'static str,
) -> impl Fn(IndexerError) + Send + 'static {
    let metrics = inner.metrics.clone();
    move |e| {
        metrics.eventual_error();
        warn!(code = %e.code(), error = %e, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::types::{DecisionBasis, RuleMatch};

    fn deployment(byte: u8) -> DeploymentId {
        DeploymentId::new([byte; 32])
    }

    fn positive_decision(deployment: DeploymentId) -> AllocationDecision {
        AllocationDecision {
            deployment,
            to_allocate: true,
            rule_match: RuleMatch {
                rule: None,
                reason: "rules".to_string(),
            },
            protocol_network: "eip155:1".to_string(),
        }
    }

    #[test]
    fn test_target_union_dedups_by_bytes() {
        let mut decisions = NetworkMapped::new();
        decisions.insert(
            "eip155:1".to_string(),
            vec![positive_decision(deployment(1))],
        );

        let mut offchain_rule = IndexingRule::global("eip155:1");
        offchain_rule.identifier = deployment(2).ipfs_hash();
        offchain_rule.identifier_kind = IdentifierKind::Deployment;
        offchain_rule.decision_basis = DecisionBasis::Offchain;
        let mut rules = NetworkMapped::new();
        rules.insert("eip155:1".to_string(), vec![offchain_rule]);

        // The static list overlaps with a decision; the union dedups.
        let static_offchain = vec![deployment(1), deployment(3)];

        let target = compute_target_deployments(&decisions, &rules, &static_offchain);
        assert_eq!(target, vec![deployment(1), deployment(2), deployment(3)]);
    }

    #[test]
    fn test_negative_decisions_are_not_targets() {
        let mut decision = positive_decision(deployment(1));
        decision.to_allocate = false;
        let mut decisions = NetworkMapped::new();
        decisions.insert("eip155:1".to_string(), vec![decision]);

        let target = compute_target_deployments(&decisions, &NetworkMapped::new(), &[]);
        assert!(target.is_empty());
    }
}

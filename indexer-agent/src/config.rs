//! Agent Configuration
//!
//! Configuration for the indexing node connection, the reconciliation
//! cadences, and per-network behavior. Supports loading from environment
//! variables with an INDEXER_AGENT_ prefix.

use serde::{Deserialize, Serialize};
use std::env;

use indexer_core::types::DeploymentId;
use indexer_core::{IndexerError, IndexerResult};

/// How allocation lifecycle actions are executed for a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationManagementMode {
    /// The agent opens, refreshes, and closes allocations on its own
    Auto,
    /// Actions are queued for operator approval
    Oversight,
    /// The agent takes no allocation actions at all
    Manual,
}

impl Default for AllocationManagementMode {
    fn default() -> Self {
        Self::Auto
    }
}

impl AllocationManagementMode {
    /// Parse from string (for environment variables)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "oversight" => Some(Self::Oversight),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Indexing node (graph-node) endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeConfig {
    /// Indexing status API endpoint
    pub status_url: String,
    /// Admin JSON-RPC endpoint
    pub admin_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for GraphNodeConfig {
    fn default() -> Self {
        Self {
            status_url: "http://127.0.0.1:8030/graphql".to_string(),
            admin_url: "http://127.0.0.1:8020".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Per-network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpecification {
    /// CAIP-2 network identifier, e.g. `eip155:1`
    pub network_identifier: String,
    #[serde(default)]
    pub allocation_management: AllocationManagementMode,
    /// How many epochs back POIs are eligible for dispute checking
    #[serde(default = "default_poi_disputable_epochs")]
    pub poi_disputable_epochs: u64,
    /// Whether to allocate towards the network's own meta-subgraph
    #[serde(default)]
    pub allocate_on_network_subgraph: bool,
    /// The network's own meta-subgraph deployment, if it should be indexed
    #[serde(default)]
    pub network_subgraph_deployment: Option<DeploymentId>,
}

fn default_poi_disputable_epochs() -> u64 {
    1
}

impl NetworkSpecification {
    pub fn new(network_identifier: impl Into<String>) -> Self {
        Self {
            network_identifier: network_identifier.into(),
            allocation_management: AllocationManagementMode::Auto,
            poi_disputable_epochs: 1,
            allocate_on_network_subgraph: false,
            network_subgraph_deployment: None,
        }
    }

    /// Whether a chain name reported by the indexing node matches this
    /// network. Accepts the identifier itself or its common alias.
    pub fn matches_chain(&self, chain: &str) -> bool {
        if chain == self.network_identifier {
            return true;
        }
        matches!(
            (self.network_identifier.as_str(), chain),
            ("eip155:1", "mainnet")
                | ("eip155:5", "goerli")
                | ("eip155:11155111", "sepolia")
                | ("eip155:42161", "arbitrum-one")
                | ("eip155:421614", "arbitrum-sepolia")
        )
    }
}

/// Reconciliation cadences, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshIntervals {
    #[serde(default = "default_rules_interval")]
    pub indexing_rules_secs: u64,
    #[serde(default = "default_active_deployments_interval")]
    pub active_deployments_secs: u64,
    #[serde(default = "default_active_allocations_interval")]
    pub active_allocations_secs: u64,
    #[serde(default = "default_network_deployments_interval")]
    pub network_deployments_secs: u64,
    #[serde(default = "default_epoch_interval")]
    pub epoch_secs: u64,
    #[serde(default = "default_target_deployments_interval")]
    pub target_deployments_secs: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_secs: u64,
}

fn default_rules_interval() -> u64 {
    20
}

fn default_active_deployments_interval() -> u64 {
    60
}

fn default_active_allocations_interval() -> u64 {
    120
}

fn default_network_deployments_interval() -> u64 {
    240
}

fn default_epoch_interval() -> u64 {
    600
}

fn default_target_deployments_interval() -> u64 {
    120
}

fn default_reconcile_interval() -> u64 {
    240
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            indexing_rules_secs: 20,
            active_deployments_secs: 60,
            active_allocations_secs: 120,
            network_deployments_secs: 240,
            epoch_secs: 600,
            target_deployments_secs: 120,
            reconcile_secs: 240,
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub graph_node: GraphNodeConfig,
    /// Deployments to index without allocating, irrespective of rules
    #[serde(default)]
    pub offchain_deployments: Vec<DeploymentId>,
    #[serde(default)]
    pub intervals: RefreshIntervals,
    /// Worker pool size for deploy/remove actions
    #[serde(default = "default_deployment_concurrency")]
    pub deployment_concurrency: usize,
}

fn default_deployment_concurrency() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            graph_node: GraphNodeConfig::default(),
            offchain_deployments: Vec::new(),
            intervals: RefreshIntervals::default(),
            deployment_concurrency: 10,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - INDEXER_AGENT_STATUS_URL: indexing status API endpoint
    /// - INDEXER_AGENT_ADMIN_URL: admin JSON-RPC endpoint
    /// - INDEXER_AGENT_TIMEOUT: request timeout in seconds
    /// - INDEXER_AGENT_OFFCHAIN_DEPLOYMENTS: comma-separated deployment ids
    /// - INDEXER_AGENT_DEPLOYMENT_CONCURRENCY: deploy/remove worker pool size
    pub fn from_env() -> IndexerResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("INDEXER_AGENT_STATUS_URL") {
            config.graph_node.status_url = url;
        }
        if let Ok(url) = env::var("INDEXER_AGENT_ADMIN_URL") {
            config.graph_node.admin_url = url;
        }
        if let Ok(timeout) = env::var("INDEXER_AGENT_TIMEOUT") {
            config.graph_node.timeout_secs = timeout
                .parse()
                .map_err(|_| IndexerError::Configuration(format!("invalid timeout: {}", timeout)))?;
        }
        if let Ok(list) = env::var("INDEXER_AGENT_OFFCHAIN_DEPLOYMENTS") {
            config.offchain_deployments = parse_deployment_list(&list)?;
        }
        if let Ok(concurrency) = env::var("INDEXER_AGENT_DEPLOYMENT_CONCURRENCY") {
            config.deployment_concurrency = concurrency.parse().map_err(|_| {
                IndexerError::Configuration(format!("invalid concurrency: {}", concurrency))
            })?;
        }

        Ok(config)
    }

    /// Create a development configuration with fast cadences
    pub fn development() -> Self {
        Self {
            graph_node: GraphNodeConfig::default(),
            offchain_deployments: Vec::new(),
            intervals: RefreshIntervals {
                indexing_rules_secs: 2,
                active_deployments_secs: 2,
                active_allocations_secs: 2,
                network_deployments_secs: 2,
                epoch_secs: 5,
                target_deployments_secs: 2,
                reconcile_secs: 5,
            },
            deployment_concurrency: 2,
        }
    }
}

/// Parse a comma-separated deployment list, deduplicating by bytes
fn parse_deployment_list(list: &str) -> IndexerResult<Vec<DeploymentId>> {
    let mut out = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id = DeploymentId::parse(entry)?;
        if !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_management_parsing() {
        assert_eq!(
            AllocationManagementMode::from_str("AUTO"),
            Some(AllocationManagementMode::Auto)
        );
        assert_eq!(
            AllocationManagementMode::from_str("oversight"),
            Some(AllocationManagementMode::Oversight)
        );
        assert_eq!(AllocationManagementMode::from_str("other"), None);
    }

    #[test]
    fn test_network_chain_matching() {
        let spec = NetworkSpecification::new("eip155:1");
        assert!(spec.matches_chain("mainnet"));
        assert!(spec.matches_chain("eip155:1"));
        assert!(!spec.matches_chain("goerli"));
    }

    #[test]
    fn test_parse_deployment_list_dedups() {
        let id = DeploymentId::new([3u8; 32]);
        let list = format!("{}, {}", id.ipfs_hash(), id.bytes32());
        let parsed = parse_deployment_list(&list).unwrap();
        assert_eq!(parsed, vec![id]);
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.deployment_concurrency, 10);
        assert_eq!(config.intervals.indexing_rules_secs, 20);
        assert_eq!(config.intervals.reconcile_secs, 240);
    }
}

//! Indexer Agent - Reconciliation Engine
//!
//! A long-running control loop that keeps three worlds converged: the
//! subgraph deployments running on the indexing node it manages, the
//! on-chain allocations staked towards those deployments, and the
//! operator's indexing rules plus offchain deployment lists.
//!
//! # Architecture
//!
//! - **Eventuals**: timers feed asynchronous derivations whose latest
//!   values are joined into reconciliation snapshots
//! - **MultiNetworks**: the same logic fans out independently per
//!   protocol network
//! - **Reconcilers**: one diff for deployments on the indexing node, one
//!   decision tree for allocation open/close/refresh actions
//! - **Dispute identifier**: cross-checks POIs of recently closed
//!   allocations against locally produced reference POIs
//!
//! External services (indexing node, network monitors, contracts, the
//! operator store) sit behind traits in [`adapters`]; the agent recovers
//! from their failures at eventual boundaries and keeps the previous
//! state until the next successful refresh.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod disputes;
pub mod eventual;
pub mod evaluate;
pub mod graph_node;
pub mod metrics;
pub mod multi_networks;
pub mod reconcile;
pub mod rules;
pub mod testing;

pub use adapters::{GraphNode, Network, NetworkAndOperator, NetworkMonitor, Operator};
pub use agent::{Agent, AgentHandle};
pub use config::{AgentConfig, AllocationManagementMode, GraphNodeConfig, NetworkSpecification};
pub use eventual::{join2, join3, join4, timer, Eventual, EventualWriter, Tick};
pub use graph_node::GraphNodeClient;
pub use metrics::AgentMetrics;
pub use multi_networks::{MultiNetworks, NetworkMapped};

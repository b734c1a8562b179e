//! Graph Node Client
//!
//! HTTP adapter to the indexing node: the indexing status API (GraphQL)
//! for reads and the admin JSON-RPC surface for deploy/remove operations.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use indexer_core::types::{Address, BlockPointer, DeploymentId, Poi};
use indexer_core::{IndexerError, IndexerResult};

use crate::adapters::GraphNode;
use crate::config::GraphNodeConfig;

/// Node id deployments are reassigned to when removed
const REMOVED_NODE_ID: &str = "removed";

/// HTTP client for the indexing node
pub struct GraphNodeClient {
    client: Client,
    config: GraphNodeConfig,
    request_id: AtomicU64,
}

/// JSON-RPC response envelope (admin surface)
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// GraphQL response envelope (status surface)
#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IndexingStatusesData {
    #[serde(rename = "indexingStatuses")]
    indexing_statuses: Vec<IndexingStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexingStatus {
    subgraph: String,
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    chains: Vec<ChainStatus>,
}

#[derive(Debug, Deserialize)]
struct ChainStatus {
    network: String,
}

#[derive(Debug, Deserialize)]
struct ProofOfIndexingData {
    #[serde(rename = "proofOfIndexing")]
    proof_of_indexing: Option<String>,
}

impl GraphNodeClient {
    pub fn new(config: GraphNodeConfig) -> IndexerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexerError::GraphNodeConnection(e.to_string()))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(0),
        })
    }

    /// Call the admin JSON-RPC surface
    async fn admin_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> IndexerResult<T> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "graph-node admin call");

        let response = self
            .client
            .post(&self.config.admin_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexerError::GraphNodeRequest(format!("{}: {}", method, e)))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| IndexerError::GraphNodeRequest(format!("{}: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(IndexerError::GraphNodeRequest(format!(
                "{} failed with code {}: {}",
                method, error.code, error.message
            )));
        }
        body.result
            .ok_or_else(|| IndexerError::GraphNodeRequest(format!("{}: empty result", method)))
    }

    /// Query the indexing status API
    async fn status_query<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> IndexerResult<T> {
        let response = self
            .client
            .post(&self.config.status_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| IndexerError::GraphNodeRequest(e.to_string()))?;

        let body: GraphqlResponse<T> = response
            .json()
            .await
            .map_err(|e| IndexerError::GraphNodeRequest(e.to_string()))?;

        if let Some(errors) = body.errors {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(IndexerError::GraphNodeRequest(messages.join("; ")));
        }
        body.data
            .ok_or_else(|| IndexerError::GraphNodeRequest("empty response".to_string()))
    }

    async fn indexing_statuses(
        &self,
        deployments: Option<&[DeploymentId]>,
    ) -> IndexerResult<Vec<IndexingStatus>> {
        let query = r#"
            query statuses($subgraphs: [String!]) {
                indexingStatuses(subgraphs: $subgraphs) {
                    subgraph
                    node
                    chains { network }
                }
            }
        "#;
        let subgraphs = deployments.map(|ids| {
            ids.iter()
                .map(|id| id.ipfs_hash())
                .collect::<Vec<String>>()
        });
        let data: IndexingStatusesData = self
            .status_query(query, json!({ "subgraphs": subgraphs }))
            .await?;
        Ok(data.indexing_statuses)
    }
}

#[async_trait]
impl GraphNode for GraphNodeClient {
    async fn connect(&self) -> IndexerResult<()> {
        self.indexing_statuses(Some(&[]))
            .await
            .map_err(|e| IndexerError::GraphNodeConnection(e.to_string()))?;
        info!(status_url = %self.config.status_url, "connected to indexing node");
        Ok(())
    }

    async fn subgraph_deployments(&self) -> IndexerResult<Vec<DeploymentId>> {
        let statuses = self.indexing_statuses(None).await?;
        let mut out = Vec::new();
        for status in statuses {
            if status.node.as_deref() == Some(REMOVED_NODE_ID) {
                continue;
            }
            let id = DeploymentId::parse(&status.subgraph)?;
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    async fn ensure(&self, name: &str, deployment: &DeploymentId) -> IndexerResult<()> {
        // Creating the name is idempotent from the agent's point of view:
        // a name that already exists is fine.
        let create: Result<serde_json::Value, _> =
            self.admin_call("subgraph_create", json!({ "name": name })).await;
        if let Err(e) = create {
            debug!(name, error = %e, "subgraph_create skipped");
        }

        let _: serde_json::Value = self
            .admin_call(
                "subgraph_deploy",
                json!({ "name": name, "ipfs_hash": deployment.ipfs_hash() }),
            )
            .await?;

        info!(name, deployment = %deployment, "deployment ensured");
        Ok(())
    }

    async fn remove(&self, deployment: &DeploymentId) -> IndexerResult<()> {
        let _: serde_json::Value = self
            .admin_call(
                "subgraph_reassign",
                json!({
                    "ipfs_hash": deployment.ipfs_hash(),
                    "node_id": REMOVED_NODE_ID,
                }),
            )
            .await?;

        info!(deployment = %deployment, "deployment removed");
        Ok(())
    }

    async fn proof_of_indexing(
        &self,
        deployment: &DeploymentId,
        block: &BlockPointer,
        indexer: &Address,
    ) -> IndexerResult<Option<Poi>> {
        let query = r#"
            query poi($subgraph: String!, $blockNumber: Int!, $blockHash: String!, $indexer: String!) {
                proofOfIndexing(
                    subgraph: $subgraph,
                    blockNumber: $blockNumber,
                    blockHash: $blockHash,
                    indexer: $indexer
                )
            }
        "#;
        let data: ProofOfIndexingData = self
            .status_query(
                query,
                json!({
                    "subgraph": deployment.ipfs_hash(),
                    "blockNumber": block.number,
                    "blockHash": block.hash,
                    "indexer": indexer.to_hex(),
                }),
            )
            .await?;
        data.proof_of_indexing
            .map(|hex| Poi::from_hex(&hex))
            .transpose()
    }

    async fn indexing_network(&self, deployment: &DeploymentId) -> IndexerResult<Option<String>> {
        let statuses = self.indexing_statuses(Some(&[*deployment])).await?;
        Ok(statuses
            .into_iter()
            .next()
            .and_then(|status| status.chains.into_iter().next())
            .map(|chain| chain.network))
    }
}

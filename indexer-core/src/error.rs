//! Indexer Error Types
//!
//! Error definitions shared by the agent and its adapters. Every error maps
//! to a stable machine-readable code for log correlation and metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes for indexer operations
///
/// Codes are logged alongside the human-readable message so operators can
/// alert on specific failure classes without parsing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexerErrorCode {
    /// Failed to connect to the indexing node
    IE001,
    /// Indexing node reports a different chain than the network expects
    IE002,
    /// Failed to query or normalize indexing rules
    IE003,
    /// Failed to claim rebate rewards
    IE004,
    /// Failed to reconcile deployments or allocation actions
    IE005,
    /// Failed to cross-check allocation status on chain
    IE006,
    /// Failed to monitor proof-of-indexing disputes
    IE007,
    /// Failed to persist proof-of-indexing disputes
    IE008,
    /// Invalid configuration
    IE009,
    /// Network fan-out received misaligned per-network data
    IE010,
}

impl IndexerErrorCode {
    /// The code as it appears in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IE001 => "IE001",
            Self::IE002 => "IE002",
            Self::IE003 => "IE003",
            Self::IE004 => "IE004",
            Self::IE005 => "IE005",
            Self::IE006 => "IE006",
            Self::IE007 => "IE007",
            Self::IE008 => "IE008",
            Self::IE009 => "IE009",
            Self::IE010 => "IE010",
        }
    }

    /// Short operator-facing explanation
    pub fn explanation(&self) -> &'static str {
        match self {
            Self::IE001 => "Failed to connect to indexing node",
            Self::IE002 => "Indexing node chain does not match network identifier",
            Self::IE003 => "Failed to query indexing rules",
            Self::IE004 => "Failed to claim rebate rewards",
            Self::IE005 => "Failed to reconcile indexer and network",
            Self::IE006 => "Failed to cross-check allocation state",
            Self::IE007 => "Failed to monitor proof-of-indexing disputes",
            Self::IE008 => "Failed to store proof-of-indexing disputes",
            Self::IE009 => "Invalid configuration",
            Self::IE010 => "Misaligned per-network data",
        }
    }
}

impl fmt::Display for IndexerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Indexer agent error
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Indexing node connection failure
    #[error("indexing node connection failed: {0}")]
    GraphNodeConnection(String),

    /// Indexing node request failure (status or admin surface)
    #[error("indexing node request failed: {0}")]
    GraphNodeRequest(String),

    /// Contract or provider call failure
    #[error("contract call failed: {0}")]
    ContractCall(String),

    /// Network subgraph or monitoring query failure
    #[error("network query failed: {0}")]
    NetworkQuery(String),

    /// Rule or dispute store failure
    #[error("store operation failed: {0}")]
    Store(String),

    /// Transaction submission failure
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The indexing node reports a different chain than configured
    #[error("network identity mismatch: expected {expected}, indexing node reports {actual}")]
    NetworkIdentityMismatch { expected: String, actual: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Per-network maps passed to the fan-out do not cover the same networks
    #[error("network mismatch: {0}")]
    NetworkMismatch(String),

    /// Invalid deployment identifier
    #[error("invalid deployment id: {0}")]
    InvalidDeployment(String),

    /// Invalid address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid proof of indexing
    #[error("invalid proof of indexing: {0}")]
    InvalidProof(String),

    /// A disputable allocation was not grouped into a rewards pool
    #[error("no rewards pool for allocation {0}")]
    MissingRewardsPool(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexerError {
    /// Map the error to its stable code
    pub fn code(&self) -> IndexerErrorCode {
        match self {
            Self::GraphNodeConnection(_) => IndexerErrorCode::IE001,
            Self::GraphNodeRequest(_) => IndexerErrorCode::IE001,
            Self::NetworkIdentityMismatch { .. } => IndexerErrorCode::IE002,
            Self::NetworkQuery(_) => IndexerErrorCode::IE003,
            Self::Transaction(_) => IndexerErrorCode::IE004,
            Self::ContractCall(_) => IndexerErrorCode::IE006,
            Self::MissingRewardsPool(_) => IndexerErrorCode::IE007,
            Self::Store(_) => IndexerErrorCode::IE008,
            Self::Configuration(_)
            | Self::InvalidDeployment(_)
            | Self::InvalidAddress(_)
            | Self::InvalidProof(_)
            | Self::Serialization(_) => IndexerErrorCode::IE009,
            Self::NetworkMismatch(_) => IndexerErrorCode::IE010,
        }
    }
}

/// Result type alias for indexer operations
pub type IndexerResult<T> = Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(IndexerErrorCode::IE005.to_string(), "IE005");
        assert_eq!(
            IndexerErrorCode::IE005.explanation(),
            "Failed to reconcile indexer and network"
        );
    }

    #[test]
    fn test_error_maps_to_code() {
        let err = IndexerError::NetworkMismatch("missing eip155:1".to_string());
        assert_eq!(err.code(), IndexerErrorCode::IE010);

        let err = IndexerError::ContractCall("getAllocation reverted".to_string());
        assert_eq!(err.code(), IndexerErrorCode::IE006);
    }
}

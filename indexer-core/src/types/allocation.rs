//! Allocations and allocation decisions
//!
//! An allocation is an on-chain staked commitment by an indexer to index a
//! specific deployment. Identity is the allocation's on-chain address.

use rust_decimal::Decimal;
use serde::{de, ser, Deserialize, Serialize};
use std::fmt;

use super::deployment::DeploymentId;
use super::rule::IndexingRule;
use crate::error::IndexerError;

/// 20-byte on-chain address (indexers and allocation ids)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse a `0x`-prefixed hex address
    pub fn from_hex(s: &str) -> Result<Self, IndexerError> {
        let stripped = s.trim_start_matches("0x");
        let bytes = hex::decode(stripped)
            .map_err(|e| IndexerError::InvalidAddress(format!("{}: {}", s, e)))?;
        if bytes.len() != 20 {
            return Err(IndexerError::InvalidAddress(format!(
                "expected 20 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl ser::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> de::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Allocation identifiers are on-chain addresses
pub type AllocationId = Address;

/// 32-byte proof of indexing
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Poi(pub [u8; 32]);

impl Poi {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a `0x`-prefixed hex proof
    pub fn from_hex(s: &str) -> Result<Self, IndexerError> {
        let stripped = s.trim_start_matches("0x");
        let bytes =
            hex::decode(stripped).map_err(|e| IndexerError::InvalidProof(format!("{}: {}", s, e)))?;
        if bytes.len() != 32 {
            return Err(IndexerError::InvalidProof(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Poi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Poi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Poi({}...)", &self.to_hex()[..10])
    }
}

impl ser::Serialize for Poi {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> de::Deserialize<'de> for Poi {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// On-chain allocation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Active,
    Closed,
    Finalized,
    Claimed,
}

/// An on-chain allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// On-chain allocation address; the allocation's identity
    pub id: AllocationId,
    /// The indexer that opened the allocation
    pub indexer: Address,
    /// The deployment the allocation commits to
    pub subgraph_deployment: DeploymentId,
    /// Staked tokens
    pub allocated_tokens: Decimal,
    /// Epoch the allocation was created in
    pub created_at_epoch: u64,
    /// Epoch the allocation was closed in, if closed
    pub closed_at_epoch: Option<u64>,
    /// Hash of the start block of the closing epoch, if closed
    pub closed_at_epoch_start_block_hash: Option<String>,
    /// Hash of the start block of the epoch before the closing epoch
    pub previous_epoch_start_block_hash: Option<String>,
    /// Proof of indexing presented at close, if any
    pub poi: Option<Poi>,
    pub status: AllocationStatus,
}

/// Why an allocation decision was made
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// The matched rule, if any
    pub rule: Option<IndexingRule>,
    /// Short reason string, e.g. `always`, `never`, `rules`, `none`
    pub reason: String,
}

/// The evaluator's verdict for one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationDecision {
    pub deployment: DeploymentId,
    pub to_allocate: bool,
    pub rule_match: RuleMatch,
    pub protocol_network: String,
}

/// A deployment as reported by the network subgraph, with curation and
/// staking totals the evaluator matches rule thresholds against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphDeployment {
    pub id: DeploymentId,
    pub deny: bool,
    pub signalled_tokens: Decimal,
    pub staked_tokens: Decimal,
    pub query_fees_amount: Decimal,
    pub protocol_network: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_hex("0x3f7b9b2c5a650ca1e2c8f90eb0d05e1f5a9b2c3d").unwrap();
        assert_eq!(addr.to_hex(), "0x3f7b9b2c5a650ca1e2c8f90eb0d05e1f5a9b2c3d");
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_poi_equality_is_by_bytes() {
        let a = Poi::new([7u8; 32]);
        let b = Poi::from_hex(&a.to_hex()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Poi::new([8u8; 32]));
    }
}

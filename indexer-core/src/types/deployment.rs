//! Subgraph deployment identifiers
//!
//! A deployment id is a 32-byte content hash with two textual renderings:
//! the `0x`-prefixed hex form used on chain, and the base58 multihash form
//! (`Qm...`) used by IPFS. Equality and hashing are by bytes.

use serde::{de, ser, Deserialize, Serialize};
use std::fmt;

use crate::error::IndexerError;

/// Multihash prefix for sha2-256 with 32-byte digests
const MULTIHASH_PREFIX: [u8; 2] = [0x12, 0x20];

/// 32-byte subgraph deployment identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(pub [u8; 32]);

impl DeploymentId {
    /// Create a deployment id from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse either rendering: `0x`-prefixed hex or base58 IPFS hash
    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        if s.starts_with("0x") || s.len() == 64 {
            Self::from_hex(s)
        } else {
            Self::from_ipfs_hash(s)
        }
    }

    /// Parse the on-chain hex rendering (with or without `0x` prefix)
    pub fn from_hex(s: &str) -> Result<Self, IndexerError> {
        let stripped = s.trim_start_matches("0x");
        let bytes = hex::decode(stripped)
            .map_err(|e| IndexerError::InvalidDeployment(format!("{}: {}", s, e)))?;
        if bytes.len() != 32 {
            return Err(IndexerError::InvalidDeployment(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Parse the base58 IPFS rendering (`Qm...`)
    pub fn from_ipfs_hash(s: &str) -> Result<Self, IndexerError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| IndexerError::InvalidDeployment(format!("{}: {}", s, e)))?;
        if bytes.len() != 34 || bytes[..2] != MULTIHASH_PREFIX {
            return Err(IndexerError::InvalidDeployment(format!(
                "not a sha2-256 multihash: {}",
                s
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[2..]);
        Ok(Self(arr))
    }

    /// The `0x`-prefixed hex rendering used on chain
    pub fn bytes32(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The base58 multihash rendering used by IPFS
    pub fn ipfs_hash(&self) -> String {
        let mut buf = Vec::with_capacity(34);
        buf.extend_from_slice(&MULTIHASH_PREFIX);
        buf.extend_from_slice(&self.0);
        bs58::encode(buf).into_string()
    }

    /// The underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ipfs_hash())
    }
}

impl fmt::Debug for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeploymentId({})", self.ipfs_hash())
    }
}

impl ser::Serialize for DeploymentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.ipfs_hash())
    }
}

impl<'de> de::Deserialize<'de> for DeploymentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// A block number and hash pair, as returned by providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPointer {
    /// Block number (height)
    pub number: u64,
    /// Block hash, `0x`-prefixed hex
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Qm hash and bytes32 of the same deployment, from the hosted network.
    const IPFS: &str = "QmXMgpFvEasmTZigzwxeJm3SJYUfqW4xJX5JYk9Mv29cnz";
    const HEX: &str = "0x85fd24fc3e5e90b75502b7e2d26e6e193a86d59a164a7e293dbfff5ed856d4c7";

    #[test]
    fn test_parse_hex_and_ipfs_agree() {
        let from_hex = DeploymentId::parse(HEX).unwrap();
        let from_ipfs = DeploymentId::parse(IPFS).unwrap();
        assert_eq!(from_hex, from_ipfs);
        assert_eq!(from_hex.bytes32(), HEX);
        assert_eq!(from_hex.ipfs_hash(), IPFS);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(DeploymentId::from_hex("0x1234").is_err());
        assert!(DeploymentId::from_ipfs_hash("QmInvalid!!").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = DeploymentId::parse(IPFS).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", IPFS));
        let back: DeploymentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}

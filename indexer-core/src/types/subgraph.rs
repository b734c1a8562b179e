//! Subgraphs and their version history
//!
//! A subgraph is a named on-chain object pointing at a sequence of
//! deployment versions. Versions are integer-indexed from 0; the entry with
//! `version == version_count - 1` is the latest.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::deployment::DeploymentId;

/// Opaque on-chain subgraph identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubgraphId(pub String);

impl SubgraphId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubgraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One version of a subgraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphVersion {
    /// Version index, 0-based
    pub version: u32,
    /// Creation time, seconds since the Unix epoch
    pub created_at: i64,
    /// The deployment this version points at
    pub deployment: DeploymentId,
}

/// A subgraph with its version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgraph {
    pub id: SubgraphId,
    pub version_count: u32,
    pub versions: Vec<SubgraphVersion>,
}

impl Subgraph {
    /// The latest version, if present in the history
    pub fn latest_version(&self) -> Option<&SubgraphVersion> {
        let latest = self.version_count.checked_sub(1)?;
        self.versions.iter().find(|v| v.version == latest)
    }

    /// The version immediately before the latest, if present
    pub fn previous_version(&self) -> Option<&SubgraphVersion> {
        let previous = self.version_count.checked_sub(2)?;
        self.versions.iter().find(|v| v.version == previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(byte: u8) -> DeploymentId {
        DeploymentId::new([byte; 32])
    }

    fn subgraph() -> Subgraph {
        Subgraph {
            id: SubgraphId::new("0xab12-0"),
            version_count: 2,
            versions: vec![
                SubgraphVersion {
                    version: 0,
                    created_at: 1_000,
                    deployment: deployment(1),
                },
                SubgraphVersion {
                    version: 1,
                    created_at: 2_000,
                    deployment: deployment(2),
                },
            ],
        }
    }

    #[test]
    fn test_latest_and_previous_version() {
        let sg = subgraph();
        assert_eq!(sg.latest_version().unwrap().deployment, deployment(2));
        assert_eq!(sg.previous_version().unwrap().deployment, deployment(1));
    }

    #[test]
    fn test_single_version_has_no_previous() {
        let mut sg = subgraph();
        sg.version_count = 1;
        sg.versions.truncate(1);
        assert_eq!(sg.latest_version().unwrap().deployment, deployment(1));
        assert!(sg.previous_version().is_none());
    }
}

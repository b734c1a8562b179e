//! Rule normalization
//!
//! Rules authored against a subgraph are rewritten to target deployments
//! before evaluation: the subgraph's latest version becomes the rule's
//! identifier, and if the latest version is younger than the buffer window
//! a copy targeting the previous version is appended, so the previous
//! deployment keeps being served while consumers migrate.
//!
//! The transform is pure: the input is left untouched and a new list is
//! returned, so earlier snapshots held by other derivations stay immutable.

use indexer_core::types::{IdentifierKind, IndexingRule, Subgraph};

/// Assumed seconds per block when deriving the buffer from epoch length
pub const SECONDS_PER_BLOCK: u64 = 15;

/// Epochs of previous-version support when deriving the buffer
pub const PREVIOUS_VERSION_BUFFER_EPOCHS: u64 = 100;

/// The buffer window during which a subgraph's previous version keeps an
/// indexing rule: `epoch_length × 15 s/block × 100 epochs`.
pub fn previous_version_buffer_secs(epoch_length: u64) -> u64 {
    epoch_length * SECONDS_PER_BLOCK * PREVIOUS_VERSION_BUFFER_EPOCHS
}

/// Rewrite subgraph-identified rules to deployment-identified rules
///
/// For each rule whose identifier names a subgraph:
/// - if the subgraph is unknown, the rule is kept unchanged;
/// - otherwise the rule is rewritten to target the latest version's
///   deployment, unless another rule already targets it;
/// - if the latest version was created within the last `buffer_secs`
///   seconds and a previous version exists, a copy targeting the previous
///   deployment is appended, unless another rule already targets it.
///
/// `now_secs` is the current time in whole seconds since the Unix epoch.
pub fn normalize_rules(
    rules: &[IndexingRule],
    subgraphs: &[Subgraph],
    buffer_secs: u64,
    now_secs: i64,
) -> Vec<IndexingRule> {
    let mut out: Vec<IndexingRule> = rules.to_vec();

    for index in 0..out.len() {
        if out[index].identifier_kind != IdentifierKind::Subgraph {
            continue;
        }
        let subgraph = match subgraphs.iter().find(|s| s.id.as_str() == out[index].identifier) {
            Some(subgraph) => subgraph,
            None => continue,
        };
        let latest = match subgraph.latest_version() {
            Some(latest) => latest,
            None => continue,
        };

        let latest_identifier = latest.deployment.ipfs_hash();
        if !targets_identifier(&out, &out[index].protocol_network, &latest_identifier) {
            out[index].identifier = latest_identifier;
            out[index].identifier_kind = IdentifierKind::Deployment;
        }

        let within_buffer = latest.created_at > now_secs.saturating_sub(buffer_secs as i64);
        if !within_buffer {
            continue;
        }
        if let Some(previous) = subgraph.previous_version() {
            let previous_identifier = previous.deployment.ipfs_hash();
            if !targets_identifier(&out, &out[index].protocol_network, &previous_identifier) {
                let mut copy = out[index].clone();
                copy.identifier = previous_identifier;
                copy.identifier_kind = IdentifierKind::Deployment;
                out.push(copy);
            }
        }
    }

    out
}

fn targets_identifier(rules: &[IndexingRule], network: &str, identifier: &str) -> bool {
    rules
        .iter()
        .any(|r| r.protocol_network == network && r.identifier == identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::types::{DeploymentId, SubgraphId, SubgraphVersion};

    const NOW: i64 = 1_700_000_000;

    fn deployment(byte: u8) -> DeploymentId {
        DeploymentId::new([byte; 32])
    }

    fn subgraph_rule(id: &str) -> IndexingRule {
        let mut rule = IndexingRule::global("eip155:1");
        rule.identifier = id.to_string();
        rule.identifier_kind = IdentifierKind::Subgraph;
        rule
    }

    fn two_version_subgraph(id: &str, latest_created_at: i64) -> Subgraph {
        Subgraph {
            id: SubgraphId::new(id),
            version_count: 2,
            versions: vec![
                SubgraphVersion {
                    version: 0,
                    created_at: 1_000,
                    deployment: deployment(1),
                },
                SubgraphVersion {
                    version: 1,
                    created_at: latest_created_at,
                    deployment: deployment(2),
                },
            ],
        }
    }

    #[test]
    fn test_rewrites_to_latest_and_appends_previous() {
        let rules = vec![subgraph_rule("0xSG")];
        let subgraphs = vec![two_version_subgraph("0xSG", NOW - 10)];

        let normalized = normalize_rules(&rules, &subgraphs, 3600, NOW);

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].identifier, deployment(2).ipfs_hash());
        assert_eq!(normalized[0].identifier_kind, IdentifierKind::Deployment);
        assert_eq!(normalized[1].identifier, deployment(1).ipfs_hash());
        assert_eq!(normalized[1].identifier_kind, IdentifierKind::Deployment);
    }

    #[test]
    fn test_old_latest_version_gets_no_previous_copy() {
        let rules = vec![subgraph_rule("0xSG")];
        let subgraphs = vec![two_version_subgraph("0xSG", NOW - 10_000)];

        let normalized = normalize_rules(&rules, &subgraphs, 3600, NOW);

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].identifier, deployment(2).ipfs_hash());
    }

    #[test]
    fn test_unknown_subgraph_left_unchanged() {
        let rules = vec![subgraph_rule("0xMISSING")];
        let normalized = normalize_rules(&rules, &[], 3600, NOW);

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].identifier, "0xMISSING");
        assert_eq!(normalized[0].identifier_kind, IdentifierKind::Subgraph);
    }

    #[test]
    fn test_no_duplicate_identifiers_produced() {
        let mut existing = IndexingRule::global("eip155:1");
        existing.identifier = deployment(1).ipfs_hash();
        existing.identifier_kind = IdentifierKind::Deployment;

        let rules = vec![existing, subgraph_rule("0xSG")];
        let subgraphs = vec![two_version_subgraph("0xSG", NOW - 10)];

        let normalized = normalize_rules(&rules, &subgraphs, 3600, NOW);

        // The previous version already has a rule, so no copy is appended.
        assert_eq!(normalized.len(), 2);
        let count = normalized
            .iter()
            .filter(|r| r.identifier == deployment(1).ipfs_hash())
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let rules = vec![subgraph_rule("0xSG")];
        let subgraphs = vec![two_version_subgraph("0xSG", NOW - 10)];

        let _ = normalize_rules(&rules, &subgraphs, 3600, NOW);

        assert_eq!(rules[0].identifier, "0xSG");
        assert_eq!(rules[0].identifier_kind, IdentifierKind::Subgraph);
    }

    #[test]
    fn test_buffer_derivation() {
        assert_eq!(previous_version_buffer_secs(7200), 7200 * 15 * 100);
    }
}

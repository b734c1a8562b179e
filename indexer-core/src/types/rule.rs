//! Indexing rules
//!
//! A rule declares whether and how a deployment (or a whole subgraph, or
//! the network as a whole) should be indexed and allocated towards. There
//! is exactly one rule per `(protocol_network, identifier)`. The rule with
//! the `global` identifier supplies per-field defaults for every other
//! rule of the same network.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of the per-network global rule
pub const GLOBAL_IDENTIFIER: &str = "global";

/// What kind of object a rule's identifier names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// The per-network default rule
    Global,
    /// A specific deployment (hex or IPFS rendering)
    Deployment,
    /// A subgraph; normalized to its deployment versions before evaluation
    Subgraph,
}

/// How the decision for a matching deployment is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBasis {
    /// Allocate iff the rule's thresholds are met
    Rules,
    /// Always allocate
    Always,
    /// Never allocate
    Never,
    /// Index without allocating; unioned into the target set directly
    Offchain,
}

/// An indexing rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingRule {
    /// Deployment id, subgraph id, or `global`
    pub identifier: String,
    pub identifier_kind: IdentifierKind,
    pub decision_basis: DecisionBasis,
    /// Tokens to stake per allocation
    pub allocation_amount: Option<Decimal>,
    /// Allocation lifetime in epochs; defaults to the protocol maximum
    pub allocation_lifetime: Option<u64>,
    /// Number of parallel allocations to keep open
    pub parallel_allocations: Option<u32>,
    /// Signal thresholds for `rules`-based decisions
    pub min_signal: Option<Decimal>,
    pub max_signal: Option<Decimal>,
    /// Stake threshold for `rules`-based decisions
    pub min_stake: Option<Decimal>,
    /// Query fee threshold for `rules`-based decisions
    pub min_average_query_fees: Option<Decimal>,
    pub protocol_network: String,
}

impl IndexingRule {
    /// A bare global rule for a network, with no thresholds set
    pub fn global(protocol_network: impl Into<String>) -> Self {
        Self {
            identifier: GLOBAL_IDENTIFIER.to_string(),
            identifier_kind: IdentifierKind::Global,
            decision_basis: DecisionBasis::Rules,
            allocation_amount: None,
            allocation_lifetime: None,
            parallel_allocations: None,
            min_signal: None,
            max_signal: None,
            min_stake: None,
            min_average_query_fees: None,
            protocol_network: protocol_network.into(),
        }
    }

    /// Merge this rule over the network's global rule: fields this rule
    /// leaves unset take the global value, fields it sets win.
    pub fn merged_with_global(&self, global: &IndexingRule) -> IndexingRule {
        IndexingRule {
            identifier: self.identifier.clone(),
            identifier_kind: self.identifier_kind,
            decision_basis: self.decision_basis,
            allocation_amount: self.allocation_amount.or(global.allocation_amount),
            allocation_lifetime: self.allocation_lifetime.or(global.allocation_lifetime),
            parallel_allocations: self.parallel_allocations.or(global.parallel_allocations),
            min_signal: self.min_signal.or(global.min_signal),
            max_signal: self.max_signal.or(global.max_signal),
            min_stake: self.min_stake.or(global.min_stake),
            min_average_query_fees: self
                .min_average_query_fees
                .or(global.min_average_query_fees),
            protocol_network: self.protocol_network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_merge_rule_fields_win_over_global() {
        let mut global = IndexingRule::global("eip155:1");
        global.allocation_amount = Some(Decimal::new(100, 0));
        global.min_signal = Some(Decimal::new(50, 0));

        let mut rule = IndexingRule::global("eip155:1");
        rule.identifier = "QmDeployment".to_string();
        rule.identifier_kind = IdentifierKind::Deployment;
        rule.allocation_amount = Some(Decimal::new(200, 0));

        let merged = rule.merged_with_global(&global);
        assert_eq!(merged.allocation_amount, Some(Decimal::new(200, 0)));
        assert_eq!(merged.min_signal, Some(Decimal::new(50, 0)));
        assert_eq!(merged.identifier, "QmDeployment");
    }
}

//! Deployment evaluation
//!
//! Pure decision logic: given the deployments visible on a network and the
//! normalized indexing rules, produce one allocation decision per
//! deployment. Deployment-specific rules take precedence over the global
//! rule; threshold checks only apply to `rules`-based decisions.

use indexer_core::types::{
    AllocationDecision, DecisionBasis, IdentifierKind, IndexingRule, RuleMatch, SubgraphDeployment,
};

/// Evaluate every deployment against the rules
///
/// Returns exactly one decision per deployment. `offchain` rules never
/// produce `to_allocate = true` here; the agent unions those deployments
/// into the target set directly.
pub fn evaluate_deployments(
    deployments: &[SubgraphDeployment],
    rules: &[IndexingRule],
) -> Vec<AllocationDecision> {
    deployments
        .iter()
        .map(|deployment| evaluate_deployment(deployment, rules))
        .collect()
}

fn evaluate_deployment(
    deployment: &SubgraphDeployment,
    rules: &[IndexingRule],
) -> AllocationDecision {
    let global = rules
        .iter()
        .find(|r| r.identifier_kind == IdentifierKind::Global);
    let specific = rules.iter().find(|r| {
        r.identifier_kind == IdentifierKind::Deployment
            && (r.identifier == deployment.id.ipfs_hash()
                || r.identifier == deployment.id.bytes32())
    });

    let rule = match (specific, global) {
        (Some(specific), Some(global)) => Some(specific.merged_with_global(global)),
        (Some(specific), None) => Some(specific.clone()),
        (None, Some(global)) => Some(global.clone()),
        (None, None) => None,
    };

    let (to_allocate, reason) = match &rule {
        None => (false, "none".to_string()),
        Some(rule) => match rule.decision_basis {
            DecisionBasis::Always => (true, "always".to_string()),
            DecisionBasis::Never => (false, "never".to_string()),
            DecisionBasis::Offchain => (false, "offchain".to_string()),
            DecisionBasis::Rules => {
                if deployment.deny {
                    (false, "denied".to_string())
                } else if thresholds_met(deployment, rule) {
                    (true, "rules".to_string())
                } else {
                    (false, "rules".to_string())
                }
            }
        },
    };

    AllocationDecision {
        deployment: deployment.id,
        to_allocate,
        rule_match: RuleMatch { rule, reason },
        protocol_network: deployment.protocol_network.clone(),
    }
}

fn thresholds_met(deployment: &SubgraphDeployment, rule: &IndexingRule) -> bool {
    // A rule with no thresholds set matches nothing; the operator must
    // opt deployments in explicitly.
    if rule.min_signal.is_none()
        && rule.min_stake.is_none()
        && rule.min_average_query_fees.is_none()
    {
        return false;
    }

    let min_signal_met = rule
        .min_signal
        .map_or(false, |min| deployment.signalled_tokens >= min);
    let min_stake_met = rule
        .min_stake
        .map_or(false, |min| deployment.staked_tokens >= min);
    let min_fees_met = rule
        .min_average_query_fees
        .map_or(false, |min| deployment.query_fees_amount >= min);
    let max_signal_ok = rule
        .max_signal
        .map_or(true, |max| deployment.signalled_tokens <= max);

    (min_signal_met || min_stake_met || min_fees_met) && max_signal_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::types::DeploymentId;
    use rust_decimal::Decimal;

    fn deployment(byte: u8, signal: i64) -> SubgraphDeployment {
        SubgraphDeployment {
            id: DeploymentId::new([byte; 32]),
            deny: false,
            signalled_tokens: Decimal::new(signal, 0),
            staked_tokens: Decimal::ZERO,
            query_fees_amount: Decimal::ZERO,
            protocol_network: "eip155:1".to_string(),
        }
    }

    fn rule_for(deployment: &SubgraphDeployment, basis: DecisionBasis) -> IndexingRule {
        let mut rule = IndexingRule::global("eip155:1");
        rule.identifier = deployment.id.ipfs_hash();
        rule.identifier_kind = IdentifierKind::Deployment;
        rule.decision_basis = basis;
        rule
    }

    #[test]
    fn test_one_decision_per_deployment() {
        let deployments = vec![deployment(1, 0), deployment(2, 0), deployment(3, 0)];
        let decisions = evaluate_deployments(&deployments, &[]);
        assert_eq!(decisions.len(), 3);
        for (decision, deployment) in decisions.iter().zip(&deployments) {
            assert_eq!(decision.deployment, deployment.id);
            assert!(!decision.to_allocate);
            assert_eq!(decision.rule_match.reason, "none");
        }
    }

    #[test]
    fn test_never_rule_wins() {
        let d = deployment(1, 1_000_000);
        let rules = vec![rule_for(&d, DecisionBasis::Never)];
        let decisions = evaluate_deployments(&[d], &rules);
        assert!(!decisions[0].to_allocate);
        assert_eq!(decisions[0].rule_match.reason, "never");
    }

    #[test]
    fn test_always_rule_allocates() {
        let d = deployment(1, 0);
        let rules = vec![rule_for(&d, DecisionBasis::Always)];
        let decisions = evaluate_deployments(&[d], &rules);
        assert!(decisions[0].to_allocate);
    }

    #[test]
    fn test_offchain_rule_does_not_allocate() {
        let d = deployment(1, 0);
        let rules = vec![rule_for(&d, DecisionBasis::Offchain)];
        let decisions = evaluate_deployments(&[d], &rules);
        assert!(!decisions[0].to_allocate);
        assert_eq!(decisions[0].rule_match.reason, "offchain");
    }

    #[test]
    fn test_rules_basis_checks_signal_thresholds() {
        let low = deployment(1, 10);
        let high = deployment(2, 500);

        let mut global = IndexingRule::global("eip155:1");
        global.min_signal = Some(Decimal::new(100, 0));
        let rules = vec![global];

        let decisions = evaluate_deployments(&[low, high], &rules);
        assert!(!decisions[0].to_allocate);
        assert!(decisions[1].to_allocate);
    }

    #[test]
    fn test_max_signal_caps_allocation() {
        let d = deployment(1, 10_000);
        let mut global = IndexingRule::global("eip155:1");
        global.min_signal = Some(Decimal::new(100, 0));
        global.max_signal = Some(Decimal::new(5_000, 0));

        let decisions = evaluate_deployments(&[d], &[global]);
        assert!(!decisions[0].to_allocate);
    }

    #[test]
    fn test_specific_rule_overrides_global() {
        let d = deployment(1, 1_000_000);
        let mut global = IndexingRule::global("eip155:1");
        global.decision_basis = DecisionBasis::Always;
        let specific = rule_for(&d, DecisionBasis::Never);

        let decisions = evaluate_deployments(&[d], &[global, specific]);
        assert!(!decisions[0].to_allocate);
    }

    #[test]
    fn test_denied_deployment_never_allocates() {
        let mut d = deployment(1, 1_000_000);
        d.deny = true;
        let mut global = IndexingRule::global("eip155:1");
        global.min_signal = Some(Decimal::ZERO);

        let decisions = evaluate_deployments(&[d], &[global]);
        assert!(!decisions[0].to_allocate);
        assert_eq!(decisions[0].rule_match.reason, "denied");
    }
}

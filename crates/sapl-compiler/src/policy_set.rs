//! Policy-set compiler.
//!
//! Set-level definitions are compiled once into a scope shared by all
//! policies of the set. Each policy is gated by its own target and the
//! gated votes are combined with the set's algorithm.

use std::collections::HashSet;
use std::sync::Arc;

use sapl_core::ast::PolicySet;
use sapl_core::{CompileError, DefaultDecision, Outcome, VoterKind, VoterMetadata};

use crate::Result;
use crate::combining::compile_combination;
use crate::context::CompilationContext;
use crate::document::{CompiledDocument, compile_target};
use crate::expression::compile_expression;
use crate::policy::compile_policy;

pub fn compile_policy_set(set: &PolicySet, ctx: &mut CompilationContext) -> Result<CompiledDocument> {
    let mut names = HashSet::new();
    for policy in &set.policies {
        if !names.insert(policy.name.as_str()) {
            return Err(CompileError::name_collision(
                &policy.location,
                format!("Policy name '{}' is used more than once in set '{}'", policy.name, set.name),
            ));
        }
    }

    let target = compile_target(set.target.as_ref(), ctx)?;
    let voter = Arc::new(
        VoterMetadata::new(set.name.as_str(), VoterKind::PolicySet)
            .with_origin(ctx.pdp_id(), ctx.configuration_id())
            .with_ordinal(ctx.next_ordinal())
            .with_outcome(possible_outcome(set))
            .with_constraints(set.policies.iter().any(|policy| policy.has_constraints()))
            .with_algorithm(set.algorithm),
    );

    let body = ctx.scoped(|ctx| {
        for definition in &set.definitions {
            let value = compile_expression(&definition.expression, ctx)?;
            ctx.define_local(&definition.name, value, &definition.location)?;
        }
        let mut votes = Vec::with_capacity(set.policies.len());
        for policy in &set.policies {
            votes.push(compile_policy(policy, ctx)?.vote());
        }
        Ok(compile_combination(set.algorithm, voter.clone(), votes))
    })?;

    Ok(CompiledDocument { voter, target, body })
}

/// Every decision the set can end up with, including its default.
fn possible_outcome(set: &PolicySet) -> Option<Outcome> {
    let defaulted = match set.algorithm.default_decision {
        DefaultDecision::Deny => Some(Outcome::Deny),
        DefaultDecision::Permit => Some(Outcome::Permit),
        DefaultDecision::Abstain => None,
    };
    set.policies
        .iter()
        .map(|policy| Outcome::of(policy.entitlement.decision()))
        .fold(defaulted, Outcome::union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::tests::{compiler, eval_ctx, lit};
    use sapl_core::ast::{BinaryOperator, Entitlement, Expression, Policy, Step, ValueDefinition};
    use sapl_core::{CombiningAlgorithm, CompileErrorKind, Decision, Nature, SourceLocation, Value, Vote};
    use serde_json::json;

    fn set(algorithm: CombiningAlgorithm, policies: Vec<Policy>) -> PolicySet {
        PolicySet {
            name: "set".into(),
            algorithm,
            target: None,
            definitions: Vec::new(),
            policies,
            location: SourceLocation::default(),
        }
    }

    fn action_is(action: &str) -> Expression {
        Expression::binary(BinaryOperator::Equal, Expression::identifier("action"), lit(json!(action)))
    }

    fn decide(set: &PolicySet) -> Vote {
        let compiled = compile_policy_set(set, &mut compiler()).unwrap();
        compiled.vote().evaluate(&eval_ctx()).unwrap()
    }

    #[test]
    fn test_deny_overrides_within_set() {
        let set = set(
            CombiningAlgorithm::DENY_OVERRIDES,
            vec![
                Policy::new("allow", Entitlement::Permit),
                Policy::new("block", Entitlement::Deny).with_condition(action_is("read")),
            ],
        );
        let vote = decide(&set);
        assert_eq!(vote.decision(), Decision::Deny);
        assert_eq!(vote.contributing_votes.len(), 2);
        assert_eq!(vote.voter.algorithm, Some(CombiningAlgorithm::DENY_OVERRIDES));
    }

    #[test]
    fn test_policy_targets_gate_policies() {
        let set = set(
            CombiningAlgorithm::FIRST_APPLICABLE,
            vec![
                Policy::new("writers", Entitlement::Deny).with_target(action_is("write")),
                Policy::new("readers", Entitlement::Permit).with_target(action_is("read")),
            ],
        );
        let vote = decide(&set);
        assert_eq!(vote.decision(), Decision::Permit);
        assert_eq!(vote.contributing_votes[0].decision(), Decision::NotApplicable);
    }

    #[test]
    fn test_set_definitions_are_shared_by_policies() {
        let mut set = set(
            CombiningAlgorithm::PERMIT_OVERRIDES,
            vec![Policy::new("owner", Entitlement::Permit).with_condition(Expression::binary(
                BinaryOperator::Equal,
                Expression::path(Expression::identifier("subject"), vec![Step::key("name")]),
                Expression::identifier("owner"),
            ))],
        );
        set.definitions.push(ValueDefinition {
            name: "owner".into(),
            expression: Expression::path(Expression::identifier("resource"), vec![Step::key("owner")]),
            location: SourceLocation::default(),
        });
        assert_eq!(decide(&set).decision(), Decision::Permit);
    }

    #[test]
    fn test_duplicate_policy_names_are_rejected() {
        let set = set(
            CombiningAlgorithm::DENY_OVERRIDES,
            vec![Policy::new("p", Entitlement::Permit), Policy::new("p", Entitlement::Deny)],
        );
        let error = compile_policy_set(&set, &mut compiler()).unwrap_err();
        assert_eq!(error.kind, CompileErrorKind::NameCollision);
    }

    #[test]
    fn test_reserved_set_definition_is_rejected() {
        let mut set = set(CombiningAlgorithm::DENY_OVERRIDES, vec![]);
        set.definitions.push(ValueDefinition {
            name: "resource".into(),
            expression: lit(json!(1)),
            location: SourceLocation::default(),
        });
        let error = compile_policy_set(&set, &mut compiler()).unwrap_err();
        assert_eq!(error.kind, CompileErrorKind::ReservedIdentifier);
    }

    #[test]
    fn test_outcome_covers_policies_and_default() {
        let set = set(
            CombiningAlgorithm::DENY_UNLESS_PERMIT,
            vec![Policy::new("allow", Entitlement::Permit)],
        );
        let compiled = compile_policy_set(&set, &mut compiler()).unwrap();
        assert_eq!(compiled.voter.outcome, Some(Outcome::PermitOrDeny));
        assert_eq!(compiled.voter.kind, VoterKind::PolicySet);
    }

    #[test]
    fn test_empty_set_uses_default_decision() {
        let set = set(CombiningAlgorithm::PERMIT_UNLESS_DENY, vec![]);
        let compiled = compile_policy_set(&set, &mut compiler()).unwrap();
        assert_eq!(compiled.body.nature(), Nature::Value);
        let vote = compiled.vote().as_constant().cloned().unwrap();
        assert_eq!(vote.decision(), Decision::Permit);
        assert_eq!(vote.authorization_decision.resource, Value::UNDEFINED);
    }
}

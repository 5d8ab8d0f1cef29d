//! Policy compiler.
//!
//! The body is a lazy conjunction of its conditions, with value definitions
//! bound as locals for everything after them. Constraints (obligations,
//! advice and the resource transformation) are evaluated only once the body
//! holds.

use std::sync::Arc;

use sapl_core::ast::{BinaryOperator, Expression, Policy, Statement};
use sapl_core::{
    AttributeRecord, AuthorizationDecision, CompileError, Compiled, CompiledExpression, Nature, Outcome, Value,
    ValueMetadata, Vote, VoterKind, VoterMetadata,
};

use crate::Result;
use crate::context::CompilationContext;
use crate::document::{CompiledDocument, branch, compile_target};
use crate::expression::{compile_expression, compile_lazy};

pub fn compile_policy(policy: &Policy, ctx: &mut CompilationContext) -> Result<CompiledDocument> {
    let target = compile_target(policy.target.as_ref(), ctx)?;
    let voter = Arc::new(
        VoterMetadata::new(policy.name.as_str(), VoterKind::Policy)
            .with_origin(ctx.pdp_id(), ctx.configuration_id())
            .with_ordinal(ctx.next_ordinal())
            .with_outcome(Outcome::of(policy.entitlement.decision()))
            .with_constraints(policy.has_constraints()),
    );
    let body = ctx.scoped(|ctx| compile_body(policy, voter.clone(), ctx))?;
    Ok(CompiledDocument { voter, target, body })
}

fn compile_body(policy: &Policy, voter: Arc<VoterMetadata>, ctx: &mut CompilationContext) -> Result<Compiled<Vote>> {
    let mut applicability: CompiledExpression = Compiled::Constant(Value::TRUE);
    for statement in &policy.body {
        match statement {
            Statement::Definition(definition) => {
                let value = compile_expression(&definition.expression, ctx)?;
                // Stored compiled, not evaluated: every reference to a stream
                // variable opens its own subscription, so each one repeats
                // the attribute lookups behind it.
                ctx.define_local(&definition.name, value, &definition.location)?;
            }
            Statement::Condition { expression } => {
                let condition = compile_expression(expression, ctx)?;
                applicability = compile_lazy(BinaryOperator::And, applicability, condition, &expression.location);
            }
        }
    }

    let constraints = compile_constraints(policy, voter.clone(), ctx)?;
    let follow_up = constraints.nature();
    Ok(branch(applicability, follow_up, voter.clone(), move |value| {
        let trace = value.metadata().attribute_trace().to_vec();
        match value.as_bool() {
            Some(true) => with_trace(constraints.clone(), trace),
            Some(false) => Compiled::Constant(Vote::not_applicable(voter.clone()).with_attributes(trace)),
            None => {
                let error = if value.is_error() {
                    value.with_metadata(ValueMetadata::EMPTY)
                } else {
                    Value::error(format!(
                        "Body of '{}' must evaluate to a boolean, but got {}.",
                        voter.name,
                        value.type_name()
                    ))
                };
                Compiled::Constant(Vote::error(voter.clone(), error).with_attributes(trace))
            }
        }
    }))
}

/// Prepends the attributes the body consumed to the constraint vote.
fn with_trace(constraints: Compiled<Vote>, trace: Vec<AttributeRecord>) -> Compiled<Vote> {
    if trace.is_empty() {
        return constraints;
    }
    constraints.map(move |mut vote| {
        let mut attributes = trace.clone();
        for record in vote.contributing_attributes {
            if !attributes.contains(&record) {
                attributes.push(record);
            }
        }
        vote.contributing_attributes = attributes;
        vote
    })
}

// =============================================================================
// Constraints
// =============================================================================

fn compile_constraints(
    policy: &Policy,
    voter: Arc<VoterMetadata>,
    ctx: &mut CompilationContext,
) -> Result<Compiled<Vote>> {
    let obligations = compile_constraint_list(&policy.obligations, "Obligation", ctx)?;
    let advice = compile_constraint_list(&policy.advice, "Advice", ctx)?;
    let transformation = match &policy.transformation {
        Some(expression) => Some(compile_constraint(expression, "Transformation", ctx)?),
        None => None,
    };

    let obligation_count = obligations.len();
    let advice_count = advice.len();
    let transforms = transformation.is_some();
    let decision = policy.entitlement.decision();

    let mut parts = obligations;
    parts.extend(advice);
    parts.extend(transformation);

    Ok(Compiled::combine(parts, move |values| {
        let attributes = records_of(&values);
        if let Some(error) = values.iter().find(|value| value.is_error()) {
            return Vote::error(voter.clone(), error.clone().with_metadata(ValueMetadata::EMPTY))
                .with_attributes(attributes);
        }
        let mut values = values.into_iter().map(|value| value.with_metadata(ValueMetadata::EMPTY));
        let obligations: Vec<Value> = values.by_ref().take(obligation_count).collect();
        let advice: Vec<Value> = values.by_ref().take(advice_count).collect();
        let mut authorization = AuthorizationDecision::new(decision)
            .with_obligations(obligations.into_iter().filter(|v| !v.is_undefined()).collect())
            .with_advice(advice.into_iter().filter(|v| !v.is_undefined()).collect());
        if transforms && let Some(resource) = values.next() {
            authorization = authorization.with_resource(resource);
        }
        Vote::new(authorization, voter.clone()).with_attributes(attributes)
    }))
}

fn compile_constraint_list(
    expressions: &[Expression],
    what: &str,
    ctx: &mut CompilationContext,
) -> Result<Vec<CompiledExpression>> {
    expressions
        .iter()
        .map(|expression| compile_constraint(expression, what, ctx))
        .collect()
}

/// A constraint that can only ever be an error is rejected at compile time.
fn compile_constraint(expression: &Expression, what: &str, ctx: &mut CompilationContext) -> Result<CompiledExpression> {
    let compiled = compile_expression(expression, ctx)?;
    if compiled.nature() == Nature::Value
        && let Some(error) = compiled.as_constant().and_then(Value::as_error)
    {
        return Err(CompileError::at(
            &expression.location,
            format!("{what} always evaluates to an error: {}", error.message),
        ));
    }
    Ok(compiled)
}

fn records_of(values: &[Value]) -> Vec<AttributeRecord> {
    let mut records: Vec<AttributeRecord> = Vec::new();
    for value in values {
        for record in value.metadata().attribute_trace() {
            if !records.contains(record) {
                records.push(record.clone());
            }
        }
    }
    records
}

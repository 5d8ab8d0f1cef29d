//! Compiled documents.
//!
//! A document compiles to a target expression deciding applicability and a
//! body voter that is only consulted when the target holds. The decision
//! point evaluates targets itself to select documents; policy sets gate
//! their policies with [`CompiledDocument::vote`].

use std::sync::Arc;

use futures_util::stream::StreamExt;
use sapl_core::ast::{Document, DocumentElement, Expression};
use sapl_core::reactive::switch_map;
use sapl_core::{CompileError, Compiled, CompiledExpression, Nature, Value, Vote, VoterMetadata};
use tracing::debug;

use crate::Result;
use crate::context::CompilationContext;
use crate::expression::compile_expression;
use crate::{policy, policy_set};

#[derive(Clone)]
pub struct CompiledDocument {
    pub voter: Arc<VoterMetadata>,
    /// Constant `true` for documents without target.
    pub target: CompiledExpression,
    pub body: Compiled<Vote>,
}

impl CompiledDocument {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.voter.name
    }

    /// Applicability check for document selection: `Ok(true)` when the
    /// target holds, otherwise the vote standing in for the document.
    pub fn check_target(&self, value: &Value) -> std::result::Result<bool, Vote> {
        check_target(&self.voter, value)
    }

    /// The body gated by the target.
    pub fn vote(&self) -> Compiled<Vote> {
        let voter = self.voter.clone();
        let body = self.body.clone();
        let body_nature = body.nature();
        branch(self.target.clone(), body_nature, voter.clone(), move |value| match check_target(&voter, &value) {
            Ok(true) => body.clone(),
            Ok(false) => Compiled::Constant(Vote::not_applicable(voter.clone())),
            Err(vote) => Compiled::Constant(vote),
        })
    }
}

fn check_target(voter: &Arc<VoterMetadata>, value: &Value) -> std::result::Result<bool, Vote> {
    match value.as_bool() {
        Some(matches) => Ok(matches),
        None if value.is_error() => Err(Vote::error(voter.clone(), value.clone())),
        None => Err(Vote::error(
            voter.clone(),
            Value::error(format!(
                "Target of '{}' must evaluate to a boolean, but got {}.",
                voter.name,
                value.type_name()
            )),
        )),
    }
}

impl std::fmt::Debug for CompiledDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledDocument")
            .field("name", &self.voter.name)
            .field("target", &self.target.nature())
            .field("body", &self.body.nature())
            .finish()
    }
}

/// Compiles one document with its own import scope.
pub fn compile_document(document: &Document, ctx: &mut CompilationContext) -> Result<CompiledDocument> {
    ctx.enter_document(document)?;
    let compiled = match &document.element {
        DocumentElement::Policy(policy) => policy::compile_policy(policy, ctx)?,
        DocumentElement::PolicySet(set) => policy_set::compile_policy_set(set, ctx)?,
    };
    debug!(
        document = %compiled.name(),
        target = ?compiled.target.nature(),
        body = ?compiled.body.nature(),
        "Compiled document"
    );
    Ok(compiled)
}

/// Targets select documents before any attribute is fetched, so they must
/// not stream.
pub fn compile_target(target: Option<&Expression>, ctx: &mut CompilationContext) -> Result<CompiledExpression> {
    let Some(target) = target else {
        return Ok(Compiled::Constant(Value::TRUE));
    };
    let compiled = compile_expression(target, ctx)?;
    if compiled.nature() == Nature::Stream {
        return Err(CompileError::unsupported(
            &target.location,
            "Targets must not access attributes.",
        ));
    }
    Ok(compiled)
}

/// Picks the follow-up voter per result of `condition`. Follow-ups are only
/// evaluated for the results that select them; `follow_up` is the widest
/// nature any of them may have.
pub(crate) fn branch<F>(
    condition: CompiledExpression,
    follow_up: Nature,
    voter: Arc<VoterMetadata>,
    select: F,
) -> Compiled<Vote>
where
    F: Fn(Value) -> Compiled<Vote> + Send + Sync + 'static,
{
    match condition {
        Compiled::Constant(value) => select(value),
        Compiled::Pure(condition) if follow_up != Nature::Stream => Compiled::pure(move |ctx| {
            select(condition(ctx)).evaluate(ctx).unwrap_or_else(|| {
                Vote::error(voter.clone(), Value::error("Streaming voter in synchronous position."))
            })
        }),
        condition => {
            let select = Arc::new(select);
            Compiled::stream(move |ctx| {
                let select = select.clone();
                let ctx = ctx.clone();
                switch_map(condition.to_stream(&ctx), move |value| select(value).to_stream(&ctx)).boxed()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::tests::{compiler, eval_ctx, lit};
    use sapl_core::ast::{Entitlement, Import, Policy};
    use sapl_core::{Decision, VoterKind};
    use serde_json::json;

    fn voter() -> Arc<VoterMetadata> {
        Arc::new(VoterMetadata::new("doc", VoterKind::Policy))
    }

    #[test]
    fn test_document_without_target_always_applies() {
        let document = Document::policy(Policy::new("open", Entitlement::Permit));
        let compiled = compile_document(&document, &mut compiler()).unwrap();
        assert_eq!(compiled.target.as_constant(), Some(&Value::TRUE));
        assert_eq!(
            compiled.vote().as_constant().map(Vote::decision),
            Some(Decision::Permit)
        );
    }

    #[test]
    fn test_non_boolean_target_is_error_vote() {
        let document = CompiledDocument {
            voter: voter(),
            target: Compiled::Constant(Value::number(1)),
            body: Compiled::Constant(Vote::new(sapl_core::AuthorizationDecision::permit(), voter())),
        };
        let vote = document.vote().as_constant().cloned().unwrap();
        assert_eq!(vote.decision(), Decision::Indeterminate);
        assert_eq!(vote.errors().len(), 1);
    }

    #[test]
    fn test_pure_target_gates_body() {
        let target = Expression::binary(
            sapl_core::ast::BinaryOperator::Equal,
            Expression::identifier("action"),
            lit(json!("write")),
        );
        let document = Document::policy(Policy::new("writers", Entitlement::Deny).with_target(target));
        let compiled = compile_document(&document, &mut compiler()).unwrap();
        let vote = compiled.vote().evaluate(&eval_ctx()).unwrap();
        assert_eq!(vote.decision(), Decision::NotApplicable);
    }

    #[test]
    fn test_streaming_target_is_rejected() {
        let target = Expression::environment_attribute(sapl_core::ast::AttributeFinder::new("time.now"), false);
        let document = Document::policy(Policy::new("timed", Entitlement::Permit).with_target(target));
        let error = compile_document(&document, &mut compiler()).unwrap_err();
        assert_eq!(error.kind, sapl_core::CompileErrorKind::UnsupportedStep);
    }

    #[test]
    fn test_imports_are_scoped_to_their_document() {
        let document = Document::policy(
            Policy::new("p", Entitlement::Permit).with_obligation(Expression::call("inc", vec![lit(json!(1))])),
        )
        .with_import(Import::Function {
            library: "math".into(),
            function: "increment".into(),
            alias: Some("inc".into()),
        });
        let compiled = compile_document(&document, &mut compiler()).unwrap();
        let vote = compiled.vote().as_constant().cloned().unwrap();
        assert_eq!(vote.authorization_decision.obligations, vec![Value::number(2)]);
    }
}

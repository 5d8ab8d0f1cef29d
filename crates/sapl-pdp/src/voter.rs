//! PDP configurations and their compiled form.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sapl_compiler::{
    ATTRIBUTE_FINDER_OPTIONS, CompilationContext, CompiledDocument, SAPL_VARIABLE, compile_combination,
    compile_document, validate_pdp_algorithm,
};
use sapl_core::ast::Document;
use sapl_core::{
    AttributeBroker, AuthorizationSubscription, Clock, CombiningAlgorithm, CompileError, Compiled, DefaultDecision,
    EvaluationContext, FunctionBroker, ObjectMap, Outcome, TargetHit, Value, Vote, VoterKind, VoterMetadata,
};
use serde::{Deserialize, Serialize};

use crate::error::{PdpError, Result};

/// Externally supplied configuration of one decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdpConfiguration {
    pub pdp_id: String,
    pub configuration_id: String,
    pub algorithm: CombiningAlgorithm,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

impl PdpConfiguration {
    pub fn new(pdp_id: impl Into<String>, configuration_id: impl Into<String>, algorithm: CombiningAlgorithm) -> Self {
        Self {
            pdp_id: pdp_id.into(),
            configuration_id: configuration_id.into(),
            algorithm,
            documents: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Documents whose target matched, plus the target results of all documents.
pub struct Retrieval {
    pub votes: Vec<Compiled<Vote>>,
    pub coverage: Vec<TargetHit>,
}

/// A fully compiled configuration. Immutable once built.
pub struct CompiledPdpVoter {
    pub pdp_id: String,
    pub configuration_id: String,
    pub algorithm: CombiningAlgorithm,
    pub voter: Arc<VoterMetadata>,
    pub documents: Vec<CompiledDocument>,
    pub variables: Arc<ObjectMap>,
    function_broker: Arc<dyn FunctionBroker>,
    attribute_broker: Arc<dyn AttributeBroker>,
}

impl std::fmt::Debug for CompiledPdpVoter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPdpVoter")
            .field("pdp_id", &self.pdp_id)
            .field("configuration_id", &self.configuration_id)
            .field("algorithm", &self.algorithm.to_string())
            .field("documents", &self.documents)
            .finish()
    }
}

impl CompiledPdpVoter {
    /// Compiles every document of `configuration`. Any failure rejects the
    /// configuration as a whole.
    ///
    /// `attribute_defaults` becomes `SAPL.attributeFinderOptions` unless the
    /// configuration variables already define it.
    pub fn compile(
        configuration: &PdpConfiguration,
        function_broker: Arc<dyn FunctionBroker>,
        attribute_broker: Arc<dyn AttributeBroker>,
        attribute_defaults: &Value,
    ) -> Result<Self> {
        if configuration.pdp_id.trim().is_empty() {
            return Err(PdpError::configuration("pdpId must not be empty"));
        }
        validate_pdp_algorithm(configuration.algorithm)?;

        let mut ctx = CompilationContext::new(&configuration.pdp_id, &configuration.configuration_id)
            .with_function_broker(function_broker.clone());
        let mut names = HashSet::new();
        let mut documents = Vec::with_capacity(configuration.documents.len());
        for document in &configuration.documents {
            if !names.insert(document.name()) {
                return Err(CompileError::name_collision(
                    document.location(),
                    format!("Document name '{}' is used more than once", document.name()),
                )
                .into());
            }
            documents.push(compile_document(document, &mut ctx)?);
        }

        let voter = Arc::new(
            VoterMetadata::new(configuration.pdp_id.as_str(), VoterKind::Pdp)
                .with_origin(&configuration.pdp_id, &configuration.configuration_id)
                .with_algorithm(configuration.algorithm)
                .with_outcome(possible_outcome(configuration.algorithm, &documents))
                .with_constraints(documents.iter().any(|document| document.voter.has_constraints)),
        );

        Ok(Self {
            pdp_id: configuration.pdp_id.clone(),
            configuration_id: configuration.configuration_id.clone(),
            algorithm: configuration.algorithm,
            voter,
            documents,
            variables: Arc::new(with_attribute_defaults(&configuration.variables, attribute_defaults)),
            function_broker,
            attribute_broker,
        })
    }

    pub fn evaluation_context(
        &self,
        subscription: AuthorizationSubscription,
        subscription_id: &str,
        clock: Arc<dyn Clock>,
    ) -> EvaluationContext {
        EvaluationContext::builder(subscription)
            .pdp_id(&self.pdp_id)
            .configuration_id(&self.configuration_id)
            .subscription_id(subscription_id)
            .variables(self.variables.clone())
            .function_broker(self.function_broker.clone())
            .attribute_broker(self.attribute_broker.clone())
            .clock(clock)
            .build()
    }

    /// Evaluates every target against the subscription. A target that fails
    /// contributes an INDETERMINATE vote naming its document.
    pub fn retrieve(&self, ctx: &EvaluationContext) -> Retrieval {
        let mut votes = Vec::new();
        let mut coverage = Vec::with_capacity(self.documents.len());
        for document in &self.documents {
            let result = document.target.evaluate(ctx).unwrap_or_else(|| {
                Value::error(format!("Target of '{}' did not evaluate synchronously.", document.name()))
            });
            coverage.push(TargetHit {
                document_name: document.name().to_string(),
                ordinal: document.voter.ordinal,
                result: result.clone(),
            });
            match document.check_target(&result) {
                Ok(true) => votes.push(document.body.clone()),
                Ok(false) => {}
                Err(vote) => {
                    let vote = match result.as_error() {
                        Some(error) => Vote::error(
                            document.voter.clone(),
                            Value::error(format!(
                                "Retrieval of document '{}' failed: {}",
                                document.name(),
                                error.message
                            )),
                        ),
                        None => vote,
                    };
                    votes.push(Compiled::Constant(vote));
                }
            }
        }
        Retrieval { votes, coverage }
    }

    /// Combines the votes of matching documents with the configured
    /// algorithm.
    pub fn combine(&self, votes: Vec<Compiled<Vote>>) -> Compiled<Vote> {
        compile_combination(self.algorithm, self.voter.clone(), votes)
    }
}

fn possible_outcome(algorithm: CombiningAlgorithm, documents: &[CompiledDocument]) -> Option<Outcome> {
    let defaulted = match algorithm.default_decision {
        DefaultDecision::Deny => Some(Outcome::Deny),
        DefaultDecision::Permit => Some(Outcome::Permit),
        DefaultDecision::Abstain => None,
    };
    documents
        .iter()
        .map(|document| document.voter.outcome)
        .fold(defaulted, Outcome::union)
}

fn with_attribute_defaults(variables: &BTreeMap<String, Value>, defaults: &Value) -> ObjectMap {
    let mut merged: ObjectMap = variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    if defaults.is_undefined() {
        return merged;
    }
    match merged.get(SAPL_VARIABLE) {
        None => {
            merged.insert(
                SAPL_VARIABLE.to_string(),
                Value::object_from([(ATTRIBUTE_FINDER_OPTIONS, defaults.clone())]),
            );
        }
        Some(existing) => {
            if let Some(entries) = existing.as_object()
                && !entries.contains_key(ATTRIBUTE_FINDER_OPTIONS)
            {
                let mut entries = entries.clone();
                entries.insert(ATTRIBUTE_FINDER_OPTIONS.to_string(), defaults.clone());
                merged.insert(SAPL_VARIABLE.to_string(), Value::object(entries));
            }
        }
    }
    merged
}

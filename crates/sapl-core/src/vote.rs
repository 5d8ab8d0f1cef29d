//! Votes: raw output of policies, policy sets and combining algorithms.
//!
//! A vote carries the decision together with who produced it and which
//! sub-votes and attributes contributed. The decision point flattens it into
//! an [`AuthorizationDecision`] only at the very end.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::algorithm::CombiningAlgorithm;
use crate::decision::{AuthorizationDecision, Decision};
use crate::value::{AttributeRecord, ObjectMap, Value};

// =============================================================================
// Outcome
// =============================================================================

/// The decisions a voter is able to produce.
///
/// For an INDETERMINATE vote this states what the vote could have been, which
/// lets priority algorithms tell critical errors from irrelevant ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Permit,
    Deny,
    PermitOrDeny,
}

impl Outcome {
    pub fn of(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Permit => Some(Self::Permit),
            Decision::Deny => Some(Self::Deny),
            Decision::Indeterminate => Some(Self::PermitOrDeny),
            Decision::NotApplicable => None,
        }
    }

    /// True when this outcome could yield `decision`.
    pub fn includes(&self, decision: Decision) -> bool {
        matches!(
            (self, decision),
            (Self::Permit, Decision::Permit)
                | (Self::Deny, Decision::Deny)
                | (Self::PermitOrDeny, Decision::Permit | Decision::Deny)
        )
    }

    /// Least outcome covering both.
    pub fn union(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) if a == b => Some(a),
            _ => Some(Self::PermitOrDeny),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permit => "PERMIT",
            Self::Deny => "DENY",
            Self::PermitOrDeny => "PERMIT_OR_DENY",
        }
    }
}

// =============================================================================
// Voter Metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoterKind {
    Policy,
    PolicySet,
    Pdp,
}

/// Static description of a compiled voter, shared by all its votes.
#[derive(Debug, Clone, PartialEq)]
pub struct VoterMetadata {
    pub name: String,
    pub pdp_id: String,
    pub configuration_id: String,
    /// Position in document order; sorting by it makes combination
    /// independent of evaluation order.
    pub ordinal: usize,
    pub kind: VoterKind,
    pub outcome: Option<Outcome>,
    pub has_constraints: bool,
    pub algorithm: Option<CombiningAlgorithm>,
}

impl VoterMetadata {
    pub fn new(name: impl Into<String>, kind: VoterKind) -> Self {
        Self {
            name: name.into(),
            pdp_id: String::new(),
            configuration_id: String::new(),
            ordinal: 0,
            kind,
            outcome: None,
            has_constraints: false,
            algorithm: None,
        }
    }

    #[must_use]
    pub fn with_origin(mut self, pdp_id: impl Into<String>, configuration_id: impl Into<String>) -> Self {
        self.pdp_id = pdp_id.into();
        self.configuration_id = configuration_id.into();
        self
    }

    #[must_use]
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Option<Outcome>) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, has_constraints: bool) -> Self {
        self.has_constraints = has_constraints;
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: CombiningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
}

// =============================================================================
// Vote
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub authorization_decision: AuthorizationDecision,
    pub outcome: Option<Outcome>,
    pub voter: Arc<VoterMetadata>,
    pub contributing_votes: Vec<Vote>,
    pub contributing_attributes: Vec<AttributeRecord>,
}

impl Vote {
    pub fn new(authorization_decision: AuthorizationDecision, voter: Arc<VoterMetadata>) -> Self {
        let outcome = Outcome::of(authorization_decision.decision);
        Self {
            authorization_decision,
            outcome,
            voter,
            contributing_votes: Vec::new(),
            contributing_attributes: Vec::new(),
        }
    }

    pub fn not_applicable(voter: Arc<VoterMetadata>) -> Self {
        Self::new(AuthorizationDecision::not_applicable(), voter)
    }

    /// INDETERMINATE with the outcome the voter could have produced.
    pub fn indeterminate(voter: Arc<VoterMetadata>, outcome: Option<Outcome>, errors: Vec<Value>) -> Self {
        let mut vote = Self::new(AuthorizationDecision::indeterminate_with(errors), voter);
        vote.outcome = outcome.or(Some(Outcome::PermitOrDeny));
        vote
    }

    /// Shorthand for a single error, outcome taken from the voter.
    pub fn error(voter: Arc<VoterMetadata>, error: Value) -> Self {
        let outcome = voter.outcome;
        Self::indeterminate(voter, outcome, vec![error])
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Option<Outcome>) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn with_contributing_votes(mut self, votes: Vec<Vote>) -> Self {
        self.contributing_votes = votes;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Vec<AttributeRecord>) -> Self {
        self.contributing_attributes = attributes;
        self
    }

    #[must_use]
    pub fn decision(&self) -> Decision {
        self.authorization_decision.decision
    }

    #[must_use]
    pub fn errors(&self) -> &[Value] {
        &self.authorization_decision.errors
    }

    pub fn is_applicable(&self) -> bool {
        self.decision() != Decision::NotApplicable
    }

    pub fn to_authorization_decision(&self) -> AuthorizationDecision {
        self.authorization_decision.clone()
    }

    /// Every attribute record of this vote and all contributing votes.
    pub fn all_attributes(&self) -> Vec<AttributeRecord> {
        let mut records = self.contributing_attributes.clone();
        for vote in &self.contributing_votes {
            for record in vote.all_attributes() {
                if !records.contains(&record) {
                    records.push(record);
                }
            }
        }
        records
    }

    /// Tree rendering for reports and tooling.
    pub fn to_value(&self) -> Value {
        let mut entries = ObjectMap::new();
        entries.insert("voter".to_string(), Value::text(self.voter.name.as_str()));
        entries.insert("decision".to_string(), Value::text(self.decision().as_str()));
        if let Some(outcome) = self.outcome {
            entries.insert("outcome".to_string(), Value::text(outcome.as_str()));
        }
        if let Some(algorithm) = self.voter.algorithm {
            entries.insert("algorithm".to_string(), Value::text(algorithm.to_string()));
        }
        if !self.errors().is_empty() {
            entries.insert("errors".to_string(), Value::array(self.errors().to_vec()));
        }
        if !self.contributing_attributes.is_empty() {
            let attributes = self
                .contributing_attributes
                .iter()
                .map(|record| {
                    Value::object_from([
                        ("invocation", Value::text(record.invocation.to_string())),
                        ("value", record.value.clone()),
                        (
                            "timestamp",
                            record
                                .timestamp
                                .format(&Rfc3339)
                                .map(Value::text)
                                .unwrap_or_default(),
                        ),
                    ])
                })
                .collect();
            entries.insert("attributes".to_string(), Value::array(attributes));
        }
        if !self.contributing_votes.is_empty() {
            let votes = self.contributing_votes.iter().map(Vote::to_value).collect();
            entries.insert("votes".to_string(), Value::array(votes));
        }
        Value::object(entries)
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.voter.name, self.decision())
    }
}

/// A vote together with the instant it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedVote {
    pub vote: Vote,
    pub timestamp: OffsetDateTime,
}

impl TimestampedVote {
    pub fn new(vote: Vote, timestamp: OffsetDateTime) -> Self {
        Self { vote, timestamp }
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.to_string())
    }
}

/// Target evaluation result of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetHit {
    pub document_name: String,
    pub ordinal: usize,
    /// `true`, `false` or an error value.
    pub result: Value,
}

impl TargetHit {
    pub fn is_match(&self) -> bool {
        self.result.as_bool() == Some(true)
    }
}

/// A vote plus the targets evaluated while retrieving documents.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteWithCoverage {
    pub vote: Vote,
    pub coverage: Vec<TargetHit>,
}

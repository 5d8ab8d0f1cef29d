//! Combining-algorithm compilers.
//!
//! Every algorithm except FIRST evaluates all participating voters and folds
//! their votes after sorting them by document ordinal, so the result does not
//! depend on the order the voters were handed in. The fold is followed by the
//! finalisation step shared by all algorithms: default decision and error
//! handling of the [`CombiningAlgorithm`] descriptor.

pub mod first;
pub mod priority;
pub mod unanimous;
pub mod unique;

use std::sync::Arc;

use sapl_core::{
    AuthorizationDecision, CombiningAlgorithm, CompileError, Compiled, Decision, DefaultDecision, ErrorHandling,
    Outcome, Value, Vote, VoterMetadata, VotingMode,
};

use crate::Result;

/// Compiles the combination of `votes` under `algorithm`. The result has the
/// widest nature among the inputs.
pub fn compile_combination(
    algorithm: CombiningAlgorithm,
    voter: Arc<VoterMetadata>,
    votes: Vec<Compiled<Vote>>,
) -> Compiled<Vote> {
    if algorithm.voting_mode == VotingMode::First {
        return first::compile_first(algorithm, voter, votes);
    }
    Compiled::combine(votes, move |votes| combine_votes(algorithm, &voter, votes))
}

/// FIRST relies on document order, which configuration-level documents do
/// not have.
pub fn validate_pdp_algorithm(algorithm: CombiningAlgorithm) -> Result<()> {
    if algorithm.voting_mode == VotingMode::First {
        return Err(CompileError::invalid_configuration(format!(
            "'{algorithm}' is only allowed inside policy sets, documents of a configuration have no order"
        )));
    }
    Ok(())
}

/// Folds already evaluated votes. FIRST takes the first applicable vote of
/// the sorted input.
pub fn combine_votes(algorithm: CombiningAlgorithm, voter: &Arc<VoterMetadata>, mut votes: Vec<Vote>) -> Vote {
    votes.sort_by_key(|vote| vote.voter.ordinal);
    let tally = match algorithm.voting_mode {
        VotingMode::PriorityDeny => priority::tally(Decision::Deny, &votes),
        VotingMode::PriorityPermit => priority::tally(Decision::Permit, &votes),
        VotingMode::Unanimous => unanimous::tally(false, &votes),
        VotingMode::UnanimousStrict => unanimous::tally(true, &votes),
        VotingMode::Unique => unique::tally(&votes),
        VotingMode::First => first::tally(&votes),
    };
    finalize(algorithm, voter, tally, votes)
}

// =============================================================================
// Tally
// =============================================================================

/// Running result of a fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub decision: AuthorizationDecision,
    pub outcome: Option<Outcome>,
}

impl Tally {
    pub fn not_applicable() -> Self {
        Self {
            decision: AuthorizationDecision::not_applicable(),
            outcome: None,
        }
    }

    pub fn of(vote: &Vote) -> Self {
        Self {
            decision: vote.authorization_decision.clone(),
            outcome: vote.outcome,
        }
    }

    pub fn indeterminate(outcome: Option<Outcome>, errors: Vec<Value>) -> Self {
        Self {
            decision: AuthorizationDecision::indeterminate_with(errors),
            outcome: outcome.or(Some(Outcome::PermitOrDeny)),
        }
    }

    pub fn decision(&self) -> Decision {
        self.decision.decision
    }

    /// Appends constraints of an agreeing vote. Two resource transformations
    /// cannot be reconciled and turn the tally INDETERMINATE.
    pub fn merge_constraints(mut self, other: &AuthorizationDecision) -> Self {
        if self.decision.has_resource() && other.has_resource() {
            return Self::indeterminate(
                self.outcome,
                vec![Value::error(
                    "Transformation uncertainty: more than one policy transforms the resource.",
                )],
            );
        }
        self.decision.obligations.extend(other.obligations.iter().cloned());
        self.decision.advice.extend(other.advice.iter().cloned());
        self.decision.errors.extend(other.errors.iter().cloned());
        if other.has_resource() {
            self.decision.resource = other.resource.clone();
        }
        self
    }

    /// Merges two INDETERMINATE tallies.
    pub fn merge_errors(mut self, other: &AuthorizationDecision, outcome: Option<Outcome>) -> Self {
        self.decision.errors.extend(other.errors.iter().cloned());
        self.outcome = Outcome::union(self.outcome, outcome);
        self
    }
}

// =============================================================================
// Finalisation
// =============================================================================

fn finalize(algorithm: CombiningAlgorithm, voter: &Arc<VoterMetadata>, tally: Tally, votes: Vec<Vote>) -> Vote {
    let abstained = tally.decision() == Decision::Indeterminate && algorithm.error_handling == ErrorHandling::Abstain;
    let tally = if tally.decision() == Decision::NotApplicable || abstained {
        match algorithm.default_decision {
            DefaultDecision::Deny => Tally::of(&Vote::new(AuthorizationDecision::deny(), voter.clone())),
            DefaultDecision::Permit => Tally::of(&Vote::new(AuthorizationDecision::permit(), voter.clone())),
            DefaultDecision::Abstain => Tally::not_applicable(),
        }
    } else {
        tally
    };
    let mut vote = Vote::new(tally.decision, voter.clone()).with_contributing_votes(votes);
    vote.outcome = tally.outcome;
    vote
}

//! PRIORITY_DENY and PRIORITY_PERMIT.
//!
//! The priority decision wins over the opposite one. An INDETERMINATE vote
//! that could have been the priority decision is critical and blocks every
//! concrete result; any other INDETERMINATE loses to a concrete decision.

use sapl_core::{Decision, Outcome, Vote};

use super::Tally;

/// Strength of a tally, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Class {
    Abstain,
    Benign,
    Opposite,
    Priority,
    Critical,
}

fn classify(decision: Decision, outcome: Option<Outcome>, priority: Decision) -> Class {
    match decision {
        Decision::NotApplicable => Class::Abstain,
        Decision::Indeterminate if outcome.is_none_or(|o| o.includes(priority)) => Class::Critical,
        Decision::Indeterminate => Class::Benign,
        d if d == priority => Class::Priority,
        _ => Class::Opposite,
    }
}

pub fn tally(priority: Decision, votes: &[Vote]) -> Tally {
    votes
        .iter()
        .fold(Tally::not_applicable(), |acc, vote| merge(acc, vote, priority))
}

fn merge(acc: Tally, vote: &Vote, priority: Decision) -> Tally {
    let mine = classify(acc.decision(), acc.outcome, priority);
    let theirs = classify(vote.decision(), vote.outcome, priority);
    match (mine, theirs) {
        (_, Class::Abstain) => acc,
        (Class::Abstain, _) => Tally::of(vote),
        (Class::Critical, _) | (_, Class::Critical) => {
            let outcome = Outcome::union(acc.outcome, vote.outcome);
            let mut errors = if mine == Class::Critical {
                acc.decision.errors
            } else {
                Vec::new()
            };
            if theirs == Class::Critical {
                errors.extend(vote.errors().iter().cloned());
            }
            Tally::indeterminate(outcome, errors)
        }
        (Class::Benign, Class::Benign) => acc.merge_errors(&vote.authorization_decision, vote.outcome),
        (a, b) if a == b => acc.merge_constraints(&vote.authorization_decision),
        (a, b) if a > b => acc,
        _ => Tally::of(vote),
    }
}

//! UNIQUE: exactly one applicable vote decides.

use sapl_core::{Decision, Outcome, Value, Vote};

use super::Tally;

pub fn tally(votes: &[Vote]) -> Tally {
    let mut acc = Tally::not_applicable();
    for vote in votes {
        if acc.decision() == Decision::Indeterminate {
            break;
        }
        acc = merge(acc, vote);
    }
    acc
}

fn merge(acc: Tally, vote: &Vote) -> Tally {
    match (acc.decision(), vote.decision()) {
        (_, Decision::NotApplicable) => acc,
        (Decision::NotApplicable, _) | (_, Decision::Indeterminate) => Tally::of(vote),
        _ => Tally::indeterminate(
            Outcome::union(acc.outcome, vote.outcome),
            vec![Value::error(
                "Collision: more than one policy is applicable under a unique combining algorithm.",
            )],
        ),
    }
}

//! UNANIMOUS and UNANIMOUS_STRICT: all applicable votes must agree.
//!
//! Strict mode additionally requires every agreeing vote to carry the same
//! obligations, advice and resource; the plain mode merges them.

use sapl_core::{Decision, Outcome, Value, Vote};

use super::Tally;

pub fn tally(strict: bool, votes: &[Vote]) -> Tally {
    let mut acc = Tally::not_applicable();
    for vote in votes {
        if acc.decision() == Decision::Indeterminate {
            break;
        }
        acc = merge(acc, vote, strict);
    }
    acc
}

fn merge(acc: Tally, vote: &Vote, strict: bool) -> Tally {
    let other = &vote.authorization_decision;
    match (acc.decision(), vote.decision()) {
        (_, Decision::NotApplicable) => acc,
        (Decision::NotApplicable, _) | (_, Decision::Indeterminate) => Tally::of(vote),
        (mine, theirs) if mine != theirs => Tally::indeterminate(
            Some(Outcome::PermitOrDeny),
            vec![Value::error("Disagreement: applicable policies voted differently.")],
        ),
        _ if strict => {
            let same = acc.decision.obligations == other.obligations
                && acc.decision.advice == other.advice
                && acc.decision.resource == other.resource;
            if same {
                acc
            } else {
                Tally::indeterminate(
                    acc.outcome,
                    vec![Value::error(
                        "Strict unanimity requires identical obligations, advice and resource.",
                    )],
                )
            }
        }
        _ => acc.merge_constraints(other),
    }
}

//! FIRST: the first applicable vote in document order wins.
//!
//! Voters are evaluated one after another and only as far as needed. With
//! streaming voters every voter subscribes to its successor only while it
//! votes NOT_APPLICABLE, so a change further up the list cancels everything
//! below it.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use sapl_core::reactive::switch_map;
use sapl_core::{CombiningAlgorithm, Compiled, EvaluationContext, Nature, Vote, VoterMetadata};

use super::{Tally, combine_votes};

pub fn tally(votes: &[Vote]) -> Tally {
    votes
        .iter()
        .find(|vote| vote.is_applicable())
        .map_or_else(Tally::not_applicable, Tally::of)
}

pub fn compile_first(
    algorithm: CombiningAlgorithm,
    voter: Arc<VoterMetadata>,
    votes: Vec<Compiled<Vote>>,
) -> Compiled<Vote> {
    let nature = Nature::widest(votes.iter().map(Compiled::nature));
    let votes = Arc::new(votes);
    match nature {
        Nature::Value => {
            let evaluated = votes.iter().filter_map(Compiled::as_constant).cloned().collect();
            Compiled::Constant(combine_votes(algorithm, &voter, evaluated))
        }
        Nature::Pure => Compiled::pure(move |ctx| {
            let mut evaluated = Vec::new();
            for vote in votes.iter().filter_map(|vote| vote.evaluate(ctx)) {
                let applicable = vote.is_applicable();
                evaluated.push(vote);
                if applicable {
                    break;
                }
            }
            combine_votes(algorithm, &voter, evaluated)
        }),
        Nature::Stream => Compiled::stream(move |ctx| {
            chain(
                votes.clone(),
                0,
                Vec::new(),
                ctx.clone(),
                algorithm,
                voter.clone(),
            )
        }),
    }
}

fn chain(
    votes: Arc<Vec<Compiled<Vote>>>,
    index: usize,
    seen: Vec<Vote>,
    ctx: EvaluationContext,
    algorithm: CombiningAlgorithm,
    voter: Arc<VoterMetadata>,
) -> BoxStream<'static, Vote> {
    let Some(current) = votes.get(index) else {
        let vote = combine_votes(algorithm, &voter, seen);
        return stream::once(async move { vote }).boxed();
    };
    let source = current.to_stream(&ctx);
    switch_map(source, move |vote: Vote| {
        let mut seen = seen.clone();
        let applicable = vote.is_applicable();
        seen.push(vote);
        if applicable {
            let vote = combine_votes(algorithm, &voter, seen);
            stream::once(async move { vote }).boxed()
        } else {
            chain(votes.clone(), index + 1, seen, ctx.clone(), algorithm, voter.clone())
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combining::tests::{combined, deny, indeterminate, not_applicable, permit};
    use sapl_core::{AuthorizationSubscription, Decision, Outcome, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn ctx() -> EvaluationContext {
        EvaluationContext::builder(AuthorizationSubscription::new(Value::NULL, Value::NULL, Value::NULL)).build()
    }

    #[test]
    fn test_first_applicable_vote_wins() {
        let compiled = compile_first(
            CombiningAlgorithm::FIRST_APPLICABLE,
            combined("set"),
            vec![
                Compiled::Constant(not_applicable(0)),
                Compiled::Constant(deny(1)),
                Compiled::Constant(permit(2)),
            ],
        );
        let vote = compiled.as_constant().cloned().unwrap();
        assert_eq!(vote.decision(), Decision::Deny);
        assert_eq!(vote.contributing_votes.len(), 3);
    }

    #[test]
    fn test_indeterminate_is_applicable() {
        let vote = combine_votes(
            CombiningAlgorithm::FIRST_APPLICABLE,
            &combined("set"),
            vec![indeterminate(0, Outcome::Permit), permit(1)],
        );
        assert_eq!(vote.decision(), Decision::Indeterminate);
    }

    #[test]
    fn test_nothing_applicable_uses_default() {
        let vote = combine_votes(
            CombiningAlgorithm::FIRST_APPLICABLE,
            &combined("set"),
            vec![not_applicable(0)],
        );
        assert_eq!(vote.decision(), Decision::Deny);
    }

    #[test]
    fn test_pure_voters_after_the_winner_are_not_evaluated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let compiled = compile_first(
            CombiningAlgorithm::FIRST_APPLICABLE,
            combined("set"),
            vec![
                Compiled::pure(|_| permit(0)),
                Compiled::pure(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    deny(1)
                }),
            ],
        );
        let vote = compiled.evaluate(&ctx()).unwrap();
        assert_eq!(vote.decision(), Decision::Permit);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_voter_switches_to_successor_while_not_applicable() {
        let (tx, rx) = mpsc::unbounded_channel::<Vote>();
        let rx = Arc::new(std::sync::Mutex::new(Some(rx)));
        let head = Compiled::stream(move |_| {
            let mut rx = rx.lock().unwrap().take().unwrap();
            stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
        });
        let compiled = compile_first(
            CombiningAlgorithm::FIRST_APPLICABLE,
            combined("set"),
            vec![head, Compiled::Constant(deny(1))],
        );
        let mut decisions = compiled.to_stream(&ctx()).map(|vote| vote.decision());

        tx.send(not_applicable(0)).unwrap();
        assert_eq!(decisions.next().await, Some(Decision::Deny));
        tx.send(permit(0)).unwrap();
        assert_eq!(decisions.next().await, Some(Decision::Permit));
        drop(tx);
        assert_eq!(decisions.next().await, None);
    }
}

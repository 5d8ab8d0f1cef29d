//! Decision interceptors.
//!
//! Interceptors see every traced decision before it leaves the decision
//! point. They run in ascending priority, each receiving the output of the
//! previous one.

use std::fmt::Write as _;
use std::sync::Arc;

use sapl_core::{AuthorizationSubscription, Vote};
use tracing::info;

use crate::traced::TracedDecision;

pub trait VoteInterceptor: Send + Sync {
    /// Lower values run first.
    fn priority(&self) -> i32 {
        0
    }

    fn intercept(&self, decision: TracedDecision) -> TracedDecision;

    /// A decision stream was subscribed.
    fn on_subscribe(&self, _subscription_id: &str, _subscription: &AuthorizationSubscription) {}

    /// A decision stream was dropped.
    fn on_unsubscribe(&self, _subscription_id: &str) {}
}

/// Interceptors in execution order. Built once, never re-sorted.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Arc<Vec<Arc<dyn VoteInterceptor>>>,
}

impl InterceptorChain {
    pub fn new(mut interceptors: Vec<Arc<dyn VoteInterceptor>>) -> Self {
        interceptors.sort_by_key(|interceptor| interceptor.priority());
        Self {
            interceptors: Arc::new(interceptors),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn apply(&self, decision: TracedDecision) -> TracedDecision {
        self.interceptors
            .iter()
            .fold(decision, |decision, interceptor| interceptor.intercept(decision))
    }

    pub fn subscribed(&self, subscription_id: &str, subscription: &AuthorizationSubscription) {
        for interceptor in self.interceptors.iter() {
            interceptor.on_subscribe(subscription_id, subscription);
        }
    }

    pub fn unsubscribed(&self, subscription_id: &str) {
        for interceptor in self.interceptors.iter() {
            interceptor.on_unsubscribe(subscription_id);
        }
    }
}

// =============================================================================
// Reporting
// =============================================================================

/// Logs a textual report of every decision. Runs last so the report shows
/// what actually leaves the decision point.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportingInterceptor;

impl VoteInterceptor for ReportingInterceptor {
    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn intercept(&self, decision: TracedDecision) -> TracedDecision {
        info!(
            pdp_id = %decision.pdp_id,
            subscription_id = %decision.subscription_id,
            decision = %decision.vote.decision(),
            "{}",
            render_report(&decision)
        );
        decision
    }
}

pub fn render_report(traced: &TracedDecision) -> String {
    let decision = traced.authorization_decision();
    let mut report = String::new();
    let _ = writeln!(report, "--- SAPL decision report ---");
    let _ = writeln!(report, "Subscription: {}", traced.subscription.to_value());
    let _ = writeln!(report, "Decision    : {}", decision.decision);
    if !decision.obligations.is_empty() {
        let _ = writeln!(report, "Obligations : {}", list(&decision.obligations));
    }
    if !decision.advice.is_empty() {
        let _ = writeln!(report, "Advice      : {}", list(&decision.advice));
    }
    if decision.has_resource() {
        let _ = writeln!(report, "Resource    : {}", decision.resource);
    }
    let _ = writeln!(report, "Timestamp   : {}", traced.timestamp_rfc3339());
    let algorithm = traced
        .vote
        .voter
        .algorithm
        .map_or_else(|| "none".to_string(), |algorithm| algorithm.to_string());
    let _ = writeln!(report, "Algorithm   : {algorithm}");
    let matching = traced.coverage.iter().filter(|hit| hit.is_match()).count();
    let _ = writeln!(
        report,
        "Documents   : {} total, {} matching",
        traced.total_documents, matching
    );
    for hit in traced.retrieval_errors() {
        let _ = writeln!(report, "Retrieval error in '{}': {}", hit.document_name, hit.result);
    }
    for error in &decision.errors {
        let _ = writeln!(report, "Error       : {error}");
    }
    for vote in &traced.vote.contributing_votes {
        render_vote(&mut report, vote, 1);
    }
    report
}

fn render_vote(report: &mut String, vote: &Vote, depth: usize) {
    let _ = writeln!(report, "{}- {}", "  ".repeat(depth), vote);
    for attribute in &vote.contributing_attributes {
        let _ = writeln!(
            report,
            "{}  attribute {} = {}",
            "  ".repeat(depth),
            attribute.invocation,
            attribute.value
        );
    }
    for child in &vote.contributing_votes {
        render_vote(report, child, depth + 1);
    }
}

fn list(values: &[sapl_core::Value]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapl_core::{AuthorizationDecision, Decision, TargetHit, Value, VoterKind, VoterMetadata};
    use std::sync::Mutex;
    use time::OffsetDateTime;

    fn traced(decision: AuthorizationDecision) -> TracedDecision {
        let voter = Arc::new(VoterMetadata::new("default", VoterKind::Pdp));
        let child = Vote::new(
            AuthorizationDecision::permit(),
            Arc::new(VoterMetadata::new("readers", VoterKind::Policy)),
        );
        TracedDecision {
            pdp_id: "default".into(),
            configuration_id: "v1".into(),
            subscription_id: "sub-1".into(),
            subscription: AuthorizationSubscription::new("alice", "read", "doc"),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            vote: Vote::new(decision, voter).with_contributing_votes(vec![child]),
            coverage: vec![
                TargetHit {
                    document_name: "readers".into(),
                    ordinal: 0,
                    result: Value::TRUE,
                },
                TargetHit {
                    document_name: "broken".into(),
                    ordinal: 1,
                    result: Value::error("boom"),
                },
            ],
            total_documents: 2,
        }
    }

    /// Rewrites every decision to DENY.
    struct Deny;

    impl VoteInterceptor for Deny {
        fn priority(&self) -> i32 {
            10
        }

        fn intercept(&self, mut decision: TracedDecision) -> TracedDecision {
            decision.vote.authorization_decision.decision = Decision::Deny;
            decision
        }
    }

    /// Records the decision it sees and its lifecycle calls.
    struct Recorder {
        priority: i32,
        seen: Mutex<Vec<String>>,
    }

    impl VoteInterceptor for Recorder {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn intercept(&self, decision: TracedDecision) -> TracedDecision {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(decision.vote.decision().to_string());
            }
            decision
        }

        fn on_subscribe(&self, subscription_id: &str, _subscription: &AuthorizationSubscription) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(format!("subscribe {subscription_id}"));
            }
        }

        fn on_unsubscribe(&self, subscription_id: &str) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(format!("unsubscribe {subscription_id}"));
            }
        }
    }

    #[test]
    fn test_chain_runs_in_ascending_priority() {
        let early = Arc::new(Recorder {
            priority: -5,
            seen: Mutex::new(Vec::new()),
        });
        let late = Arc::new(Recorder {
            priority: 20,
            seen: Mutex::new(Vec::new()),
        });
        let chain = InterceptorChain::new(vec![late.clone(), Arc::new(Deny), early.clone()]);

        let result = chain.apply(traced(AuthorizationDecision::permit()));
        assert_eq!(result.vote.decision(), Decision::Deny);
        assert_eq!(*early.seen.lock().unwrap(), vec!["PERMIT"]);
        assert_eq!(*late.seen.lock().unwrap(), vec!["DENY"]);
    }

    #[test]
    fn test_lifecycle_hooks_reach_every_interceptor() {
        let recorder = Arc::new(Recorder {
            priority: 0,
            seen: Mutex::new(Vec::new()),
        });
        let chain = InterceptorChain::new(vec![recorder.clone()]);
        chain.subscribed("sub-1", &AuthorizationSubscription::new("a", "b", "c"));
        chain.unsubscribed("sub-1");
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["subscribe sub-1", "unsubscribe sub-1"]);
    }

    #[test]
    fn test_report_lists_decision_documents_and_votes() {
        let decision = AuthorizationDecision::permit().with_obligations(vec![Value::text("log")]);
        let report = render_report(&traced(decision));
        assert!(report.contains("Decision    : PERMIT"));
        assert!(report.contains("Obligations : \"log\"") || report.contains("Obligations : log"));
        assert!(report.contains("2 total, 1 matching"));
        assert!(report.contains("Retrieval error in 'broken'"));
        assert!(report.contains("readers -> PERMIT"));
    }

    #[test]
    fn test_reporting_interceptor_runs_last_and_passes_through() {
        assert_eq!(ReportingInterceptor.priority(), i32::MAX);
        let decision = traced(AuthorizationDecision::deny());
        assert_eq!(ReportingInterceptor.intercept(decision.clone()), decision);
    }
}

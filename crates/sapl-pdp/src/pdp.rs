//! The dynamic policy decision point.
//!
//! A decision stream follows the configuration register: every configuration
//! change replaces the running evaluation outright, and within one
//! configuration every attribute change recomputes the combined vote.

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use sapl_core::reactive::{distinct_until_changed, switch_map};
use sapl_core::{
    AttributeBroker, AuthorizationDecision, AuthorizationSubscription, Clock, FunctionBroker, SystemClock,
    TimestampedVote, Value, Vote, VoteWithCoverage,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PdpError, Result};
use crate::interceptor::{InterceptorChain, VoteInterceptor};
use crate::register::ConfigurationRegister;
use crate::settings::Settings;
use crate::traced::TracedDecision;
use crate::voter::{CompiledPdpVoter, Retrieval};

pub const DEFAULT_PDP_ID: &str = "default";

pub struct DynamicPolicyDecisionPoint {
    register: Arc<ConfigurationRegister>,
    default_pdp_id: String,
    interceptors: InterceptorChain,
    clock: Arc<dyn Clock>,
}

impl DynamicPolicyDecisionPoint {
    pub fn new(register: Arc<ConfigurationRegister>) -> Self {
        Self {
            register,
            default_pdp_id: DEFAULT_PDP_ID.to_string(),
            interceptors: InterceptorChain::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds the register from `settings` and wires both brokers into it.
    pub fn from_settings(
        settings: &Settings,
        function_broker: Arc<dyn FunctionBroker>,
        attribute_broker: Arc<dyn AttributeBroker>,
    ) -> Self {
        let register = ConfigurationRegister::new(function_broker, attribute_broker)
            .with_attribute_defaults(settings.attributes.to_options_value())
            .with_notification_capacity(settings.pdp.notification_capacity);
        Self::new(Arc::new(register)).with_default_pdp_id(settings.pdp.default_pdp_id.clone())
    }

    #[must_use]
    pub fn with_default_pdp_id(mut self, pdp_id: impl Into<String>) -> Self {
        self.default_pdp_id = pdp_id.into();
        self
    }

    /// Replaces the interceptor chain. The order is fixed here.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn VoteInterceptor>>) -> Self {
        self.interceptors = InterceptorChain::new(interceptors);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register(&self) -> &Arc<ConfigurationRegister> {
        &self.register
    }

    pub fn default_pdp_id(&self) -> &str {
        &self.default_pdp_id
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Decisions for `subscription` against the default pdp id.
    pub fn decide(&self, subscription: AuthorizationSubscription) -> BoxStream<'static, AuthorizationDecision> {
        self.decide_for(&self.default_pdp_id, subscription)
    }

    /// Decisions against `pdp_id`. Consecutive identical decisions are
    /// emitted once.
    pub fn decide_for(
        &self,
        pdp_id: &str,
        subscription: AuthorizationSubscription,
    ) -> BoxStream<'static, AuthorizationDecision> {
        let decisions = self
            .decide_traced(pdp_id, subscription)
            .map(|traced| traced.authorization_decision())
            .boxed();
        distinct_until_changed(decisions, |previous, next| previous == next)
    }

    pub fn gather_votes(&self, subscription: AuthorizationSubscription) -> BoxStream<'static, TimestampedVote> {
        self.decide_traced(&self.default_pdp_id, subscription)
            .map(|traced| traced.timestamped_vote())
            .boxed()
    }

    pub fn coverage_stream(&self, subscription: AuthorizationSubscription) -> BoxStream<'static, VoteWithCoverage> {
        self.decide_traced(&self.default_pdp_id, subscription)
            .map(|traced| traced.vote_with_coverage())
            .boxed()
    }

    /// Fully traced decisions after all interceptors ran.
    pub fn decide_traced(
        &self,
        pdp_id: &str,
        subscription: AuthorizationSubscription,
    ) -> BoxStream<'static, TracedDecision> {
        let subscription_id = Uuid::new_v4().to_string();
        let configurations = self.register.get_pdp_configurations(pdp_id);

        let evaluation = {
            let pdp_id = pdp_id.to_string();
            let subscription_id = subscription_id.clone();
            let subscription = subscription.clone();
            let clock = self.clock.clone();
            switch_map(configurations, move |configuration| match configuration {
                Some(voter) => {
                    debug!(
                        pdp_id = %pdp_id,
                        subscription_id = %subscription_id,
                        configuration_id = %voter.configuration_id,
                        "Evaluating subscription against configuration"
                    );
                    evaluate(voter, subscription.clone(), subscription_id.clone(), clock.clone())
                }
                None => {
                    let traced = TracedDecision::no_configuration(
                        &pdp_id,
                        &subscription_id,
                        subscription.clone(),
                        clock.now(),
                    );
                    stream::once(future::ready(traced)).boxed()
                }
            })
        };

        let interceptors = self.interceptors.clone();
        let decisions = evaluation.map(move |traced| interceptors.apply(traced)).boxed();
        self.with_lifecycle(subscription_id, &subscription, decisions)
    }

    /// Fires the subscribe hooks now and the unsubscribe hooks when the
    /// returned stream is dropped.
    fn with_lifecycle(
        &self,
        subscription_id: String,
        subscription: &AuthorizationSubscription,
        mut decisions: BoxStream<'static, TracedDecision>,
    ) -> BoxStream<'static, TracedDecision> {
        debug!(subscription_id = %subscription_id, "Decision stream subscribed");
        self.interceptors.subscribed(&subscription_id, subscription);
        let guard = Unsubscribe {
            interceptors: self.interceptors.clone(),
            subscription_id,
        };
        async_stream::stream! {
            let _guard = guard;
            while let Some(traced) = decisions.next().await {
                yield traced;
            }
        }
        .boxed()
    }

    // =========================================================================
    // One-shot
    // =========================================================================

    pub async fn decide_once(&self, subscription: AuthorizationSubscription) -> AuthorizationDecision {
        self.first_traced(subscription).await.authorization_decision()
    }

    pub async fn vote_once(&self, subscription: AuthorizationSubscription) -> TimestampedVote {
        self.first_traced(subscription).await.timestamped_vote()
    }

    async fn first_traced(&self, subscription: AuthorizationSubscription) -> TracedDecision {
        let mut decisions = self.decide_traced(&self.default_pdp_id, subscription.clone());
        match decisions.next().await {
            Some(traced) => traced,
            None => TracedDecision::no_configuration(&self.default_pdp_id, "", subscription, self.clock.now()),
        }
    }

    /// Synchronous decision from the current configuration.
    ///
    /// Constant and pure votes resolve without any stream. Only a vote that
    /// reads attributes blocks the calling thread until its first value.
    pub fn decide_once_blocking(&self, subscription: AuthorizationSubscription) -> AuthorizationDecision {
        self.decide_once_blocking_traced(subscription).authorization_decision()
    }

    pub fn decide_once_blocking_traced(&self, subscription: AuthorizationSubscription) -> TracedDecision {
        let subscription_id = Uuid::new_v4().to_string();
        let Some(voter) = self.register.get_current_configuration(&self.default_pdp_id) else {
            let traced =
                TracedDecision::no_configuration(&self.default_pdp_id, &subscription_id, subscription, self.clock.now());
            return self.interceptors.apply(traced);
        };

        let ctx = voter.evaluation_context(subscription.clone(), &subscription_id, self.clock.clone());
        let Retrieval { votes, coverage } = voter.retrieve(&ctx);
        let combined = voter.combine(votes);
        let vote = match combined.evaluate(&ctx) {
            Some(vote) => vote,
            None => match block_on_first(combined.to_stream(&ctx)) {
                Ok(Some(vote)) => vote,
                Ok(None) => Vote::error(
                    voter.voter.clone(),
                    Value::error("Decision stream completed without a decision."),
                ),
                Err(error) => Vote::error(voter.voter.clone(), Value::error(error.to_string())),
            },
        };

        let traced = TracedDecision {
            pdp_id: voter.pdp_id.clone(),
            configuration_id: voter.configuration_id.clone(),
            subscription_id,
            subscription,
            timestamp: self.clock.now(),
            vote,
            coverage,
            total_documents: voter.documents.len(),
        };
        self.interceptors.apply(traced)
    }
}

/// Evaluation of one configuration for one subscription.
fn evaluate(
    voter: Arc<CompiledPdpVoter>,
    subscription: AuthorizationSubscription,
    subscription_id: String,
    clock: Arc<dyn Clock>,
) -> BoxStream<'static, TracedDecision> {
    let ctx = voter.evaluation_context(subscription.clone(), &subscription_id, clock.clone());
    let Retrieval { votes, coverage } = voter.retrieve(&ctx);
    let combined = voter.combine(votes);
    combined
        .to_stream(&ctx)
        .map(move |vote| TracedDecision {
            pdp_id: voter.pdp_id.clone(),
            configuration_id: voter.configuration_id.clone(),
            subscription_id: subscription_id.clone(),
            subscription: subscription.clone(),
            timestamp: clock.now(),
            vote,
            coverage: coverage.clone(),
            total_documents: voter.documents.len(),
        })
        .boxed()
}

/// First item of `stream`, blocking the current thread.
///
/// Inside a multi-threaded runtime the worker is handed over with
/// `block_in_place`. Anywhere else the stream runs on a scoped thread with
/// its own runtime, since blocking inside a current-thread runtime would
/// deadlock it.
fn block_on_first<T: Send + 'static>(stream: BoxStream<'static, T>) -> Result<Option<T>> {
    if let Ok(handle) = Handle::try_current()
        && handle.runtime_flavor() == RuntimeFlavor::MultiThread
    {
        return Ok(tokio::task::block_in_place(|| handle.block_on(first(stream))));
    }
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| PdpError::runtime(format!("Failed to start decision runtime: {e}")))?;
                Ok(runtime.block_on(first(stream)))
            })
            .join()
            .map_err(|_| PdpError::runtime("Decision thread panicked"))?
    })
}

async fn first<T>(mut stream: BoxStream<'static, T>) -> Option<T> {
    stream.next().await
}

struct Unsubscribe {
    interceptors: InterceptorChain,
    subscription_id: String,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        debug!(subscription_id = %self.subscription_id, "Decision stream unsubscribed");
        self.interceptors.unsubscribed(&self.subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::StandardFunctionBroker;
    use crate::voter::PdpConfiguration;
    use crate::voter::tests::action_is;
    use assert_json_diff::assert_json_eq;
    use sapl_core::ast::{AttributeFinder, BinaryOperator, Document, Entitlement, Expression, Policy};
    use sapl_core::{
        AttributeFinderInvocation, CombiningAlgorithm, Decision, FixedClock, NoAttributeBroker, Nature,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    /// Emits whatever the test pushes into the channel.
    struct Pushed {
        receiver: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    }

    impl AttributeBroker for Pushed {
        fn attribute_stream(&self, _invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
            let receiver = self.receiver.lock().ok().and_then(|mut receiver| receiver.take());
            match receiver {
                Some(mut receiver) => stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed(),
                None => stream::empty().boxed(),
            }
        }
    }

    /// Emits the listed values one after another.
    struct Fixed(Vec<Value>);

    impl AttributeBroker for Fixed {
        fn attribute_stream(&self, _invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
            stream::iter(self.0.clone()).boxed()
        }
    }

    fn pdp_with(attribute_broker: Arc<dyn AttributeBroker>) -> DynamicPolicyDecisionPoint {
        let register = ConfigurationRegister::new(Arc::new(StandardFunctionBroker::new()), attribute_broker);
        DynamicPolicyDecisionPoint::new(Arc::new(register))
            .with_clock(Arc::new(FixedClock(OffsetDateTime::UNIX_EPOCH)))
    }

    fn pdp() -> DynamicPolicyDecisionPoint {
        pdp_with(Arc::new(NoAttributeBroker))
    }

    fn subscription(action: &str) -> AuthorizationSubscription {
        AuthorizationSubscription::new("alice", action, "doc")
    }

    fn configuration(configuration_id: &str, algorithm: CombiningAlgorithm) -> PdpConfiguration {
        PdpConfiguration::new(DEFAULT_PDP_ID, configuration_id, algorithm)
    }

    fn permit(name: &str) -> Document {
        Document::policy(Policy::new(name, Entitlement::Permit))
    }

    fn deny(name: &str) -> Document {
        Document::policy(Policy::new(name, Entitlement::Deny))
    }

    /// Permits once the environment clearance exceeds 3.
    fn cleared() -> Document {
        let clearance = Expression::environment_attribute(AttributeFinder::new("user.clearance"), false);
        Document::policy(Policy::new("cleared", Entitlement::Permit).with_condition(Expression::binary(
            BinaryOperator::Greater,
            clearance,
            Expression::literal(Value::number(3)),
        )))
    }

    #[tokio::test]
    async fn test_missing_configuration_is_indeterminate() {
        let pdp = pdp();
        let decision = pdp.decide_once(subscription("read")).await;
        assert_eq!(decision.decision, Decision::Indeterminate);
        assert!(!decision.errors.is_empty());

        let blocking = pdp.decide_once_blocking(subscription("read"));
        assert_eq!(blocking.decision, Decision::Indeterminate);
    }

    #[tokio::test]
    async fn test_deny_overrides_scenario() {
        let pdp = pdp();
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_OVERRIDES)
                    .with_document(permit("a"))
                    .with_document(deny("b"))
                    .with_document(permit("c")),
                true,
            )
            .unwrap();
        assert_eq!(pdp.decide_once(subscription("read")).await.decision, Decision::Deny);
    }

    #[tokio::test]
    async fn test_permit_unless_deny_without_applicable_documents_permits() {
        let pdp = pdp();
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::PERMIT_UNLESS_DENY).with_document(Document::policy(
                    Policy::new("writers", Entitlement::Deny).with_target(action_is("write")),
                )),
                true,
            )
            .unwrap();
        let decision = pdp.decide_once(subscription("read")).await;
        assert_json_eq!(
            decision.to_value().to_json(),
            json!({"decision": "PERMIT", "obligations": [], "advice": [], "errors": []})
        );
    }

    #[tokio::test]
    async fn test_configuration_change_replaces_running_evaluation() {
        let pdp = pdp();
        let mut decisions = pdp.decide(subscription("read"));
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Indeterminate);

        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(permit("open")),
                true,
            )
            .unwrap();
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Permit);

        pdp.register()
            .load_configuration(
                &configuration("v2", CombiningAlgorithm::PERMIT_UNLESS_DENY).with_document(deny("closed")),
                true,
            )
            .unwrap();
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Deny);

        pdp.register().remove_configuration(DEFAULT_PDP_ID);
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Indeterminate);
    }

    #[tokio::test]
    async fn test_attribute_change_recomputes_decision() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pdp = pdp_with(Arc::new(Pushed {
            receiver: Mutex::new(Some(receiver)),
        }));
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(cleared()),
                true,
            )
            .unwrap();

        let mut decisions = pdp.decide(subscription("read"));
        sender.send(Value::number(1)).unwrap();
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Deny);
        sender.send(Value::number(2)).unwrap();
        sender.send(Value::number(5)).unwrap();
        // The repeated DENY for clearance 2 is suppressed.
        assert_eq!(decisions.next().await.unwrap().decision, Decision::Permit);
    }

    #[tokio::test]
    async fn test_votes_and_coverage_streams() {
        let pdp = pdp();
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_OVERRIDES)
                    .with_document(Document::policy(
                        Policy::new("readers", Entitlement::Permit).with_target(action_is("read")),
                    ))
                    .with_document(Document::policy(
                        Policy::new("writers", Entitlement::Deny).with_target(action_is("write")),
                    )),
                true,
            )
            .unwrap();

        let vote = pdp.vote_once(subscription("read")).await;
        assert_eq!(vote.vote.decision(), Decision::Permit);
        assert_eq!(vote.timestamp, OffsetDateTime::UNIX_EPOCH);

        let coverage = pdp.coverage_stream(subscription("read")).next().await.unwrap();
        assert_eq!(coverage.coverage.len(), 2);
        assert_eq!(coverage.coverage.iter().filter(|hit| hit.is_match()).count(), 1);

        let gathered = pdp.gather_votes(subscription("write")).next().await.unwrap();
        assert_eq!(gathered.vote.decision(), Decision::Deny);
    }

    #[test]
    fn test_blocking_decision_without_attributes_needs_no_runtime() {
        let pdp = pdp();
        let config = configuration("v1", CombiningAlgorithm::DENY_OVERRIDES).with_document(Document::policy(
            Policy::new("readers", Entitlement::Permit).with_target(action_is("read")),
        ));
        pdp.register().load_configuration(&config, true).unwrap();
        let voter = pdp.register().get_current_configuration(DEFAULT_PDP_ID).unwrap();
        let ctx = voter.evaluation_context(subscription("read"), "check", Arc::new(SystemClock));
        assert_ne!(voter.combine(voter.retrieve(&ctx).votes).nature(), Nature::Stream);

        assert_eq!(pdp.decide_once_blocking(subscription("read")).decision, Decision::Permit);
        assert_eq!(pdp.decide_once_blocking(subscription("write")).decision, Decision::Deny);
    }

    #[test]
    fn test_blocking_decision_with_attributes_outside_runtime() {
        let pdp = pdp_with(Arc::new(Fixed(vec![Value::number(7)])));
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(cleared()),
                true,
            )
            .unwrap();
        let traced = pdp.decide_once_blocking_traced(subscription("read"));
        assert_eq!(traced.vote.decision(), Decision::Permit);
        assert_eq!(traced.vote.all_attributes().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_decision_with_attributes_inside_runtime() {
        let pdp = pdp_with(Arc::new(Fixed(vec![Value::number(1)])));
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(cleared()),
                true,
            )
            .unwrap();
        assert_eq!(pdp.decide_once_blocking(subscription("read")).decision, Decision::Deny);
    }

    #[tokio::test]
    async fn test_blocking_decision_inside_current_thread_runtime() {
        let pdp = pdp_with(Arc::new(Fixed(vec![Value::number(9)])));
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(cleared()),
                true,
            )
            .unwrap();
        assert_eq!(pdp.decide_once_blocking(subscription("read")).decision, Decision::Permit);
    }

    /// Adds an obligation and records lifecycle calls.
    struct Stamp {
        events: Mutex<Vec<String>>,
    }

    impl VoteInterceptor for Stamp {
        fn intercept(&self, mut traced: TracedDecision) -> TracedDecision {
            traced
                .vote
                .authorization_decision
                .obligations
                .push(Value::text("audited"));
            traced
        }

        fn on_subscribe(&self, _subscription_id: &str, _subscription: &AuthorizationSubscription) {
            if let Ok(mut events) = self.events.lock() {
                events.push("subscribe".into());
            }
        }

        fn on_unsubscribe(&self, _subscription_id: &str) {
            if let Ok(mut events) = self.events.lock() {
                events.push("unsubscribe".into());
            }
        }
    }

    #[tokio::test]
    async fn test_interceptors_rewrite_decisions_and_see_lifecycle() {
        let stamp = Arc::new(Stamp {
            events: Mutex::new(Vec::new()),
        });
        let pdp = pdp().with_interceptors(vec![stamp.clone(), Arc::new(crate::ReportingInterceptor)]);
        pdp.register()
            .load_configuration(
                &configuration("v1", CombiningAlgorithm::DENY_UNLESS_PERMIT).with_document(permit("open")),
                true,
            )
            .unwrap();

        let mut decisions = pdp.decide(subscription("read"));
        let decision = decisions.next().await.unwrap();
        assert_eq!(decision.obligations, vec![Value::text("audited")]);
        drop(decisions);
        assert_eq!(*stamp.events.lock().unwrap(), vec!["subscribe", "unsubscribe"]);

        let blocking = pdp.decide_once_blocking(subscription("read"));
        assert_eq!(blocking.obligations, vec![Value::text("audited")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_supply_attribute_defaults_and_pdp_id() {
        let mut settings = Settings::default();
        settings.pdp.default_pdp_id = "tenant".into();
        let pdp = DynamicPolicyDecisionPoint::from_settings(
            &settings,
            Arc::new(StandardFunctionBroker::new()),
            Arc::new(NoAttributeBroker),
        );
        assert_eq!(pdp.default_pdp_id(), "tenant");
        pdp.register()
            .load_configuration(
                &PdpConfiguration::new("tenant", "v1", CombiningAlgorithm::PERMIT_UNLESS_DENY),
                true,
            )
            .unwrap();
        let decision = tokio::time::timeout(Duration::from_secs(1), pdp.decide_once(subscription("read")))
            .await
            .unwrap();
        assert_eq!(decision.decision, Decision::Permit);
        assert!(pdp.register().get_current_configuration("tenant").is_some());
    }
}

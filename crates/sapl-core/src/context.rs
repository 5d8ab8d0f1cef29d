use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::broker::{AttributeBroker, Clock, FunctionBroker, NoAttributeBroker, NoFunctionBroker, SystemClock};
use crate::decision::AuthorizationSubscription;
use crate::value::{ObjectMap, Value};

/// Binding of `@` and `#` while evaluating conditions, filters and templates.
#[derive(Debug, Clone)]
pub struct RelativeBinding {
    pub value: Value,
    pub location: Value,
}

/// Immutable per-evaluation state.
///
/// Created once per decision evaluation. Relative bindings derive a new
/// context sharing everything else.
#[derive(Clone)]
pub struct EvaluationContext {
    pdp_id: Arc<str>,
    configuration_id: Arc<str>,
    subscription_id: Arc<str>,
    subscription: Arc<AuthorizationSubscription>,
    variables: Arc<ObjectMap>,
    function_broker: Arc<dyn FunctionBroker>,
    attribute_broker: Arc<dyn AttributeBroker>,
    clock: Arc<dyn Clock>,
    relative: Option<Arc<RelativeBinding>>,
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("pdp_id", &self.pdp_id)
            .field("configuration_id", &self.configuration_id)
            .field("subscription_id", &self.subscription_id)
            .field("subscription", &self.subscription)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    pub fn builder(subscription: AuthorizationSubscription) -> EvaluationContextBuilder {
        EvaluationContextBuilder {
            pdp_id: "default".into(),
            configuration_id: "none".into(),
            subscription_id: "none".into(),
            subscription: Arc::new(subscription),
            variables: Arc::new(ObjectMap::new()),
            function_broker: Arc::new(NoFunctionBroker),
            attribute_broker: Arc::new(NoAttributeBroker),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn pdp_id(&self) -> &str {
        &self.pdp_id
    }

    #[must_use]
    pub fn configuration_id(&self) -> &str {
        &self.configuration_id
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    #[must_use]
    pub fn subscription(&self) -> &AuthorizationSubscription {
        &self.subscription
    }

    #[must_use]
    pub fn variables(&self) -> &Arc<ObjectMap> {
        &self.variables
    }

    #[must_use]
    pub fn function_broker(&self) -> &Arc<dyn FunctionBroker> {
        &self.function_broker
    }

    #[must_use]
    pub fn attribute_broker(&self) -> &Arc<dyn AttributeBroker> {
        &self.attribute_broker
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Subscription element or configuration variable; `Undefined` if unbound.
    pub fn get(&self, name: &str) -> Value {
        if let Some(element) = self.subscription.element(name) {
            return element.clone();
        }
        self.variables.get(name).cloned().unwrap_or_default()
    }

    /// Value of `@`, `Undefined` outside a relative scope.
    pub fn relative_value(&self) -> Value {
        self.relative
            .as_ref()
            .map(|binding| binding.value.clone())
            .unwrap_or_default()
    }

    /// Value of `#`, `Undefined` outside a relative scope.
    pub fn relative_location(&self) -> Value {
        self.relative
            .as_ref()
            .map(|binding| binding.location.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn with_relative(&self, value: Value, location: Value) -> Self {
        let mut derived = self.clone();
        derived.relative = Some(Arc::new(RelativeBinding { value, location }));
        derived
    }
}

pub struct EvaluationContextBuilder {
    pdp_id: Arc<str>,
    configuration_id: Arc<str>,
    subscription_id: Arc<str>,
    subscription: Arc<AuthorizationSubscription>,
    variables: Arc<ObjectMap>,
    function_broker: Arc<dyn FunctionBroker>,
    attribute_broker: Arc<dyn AttributeBroker>,
    clock: Arc<dyn Clock>,
}

impl EvaluationContextBuilder {
    #[must_use]
    pub fn pdp_id(mut self, pdp_id: &str) -> Self {
        self.pdp_id = pdp_id.into();
        self
    }

    #[must_use]
    pub fn configuration_id(mut self, configuration_id: &str) -> Self {
        self.configuration_id = configuration_id.into();
        self
    }

    #[must_use]
    pub fn subscription_id(mut self, subscription_id: &str) -> Self {
        self.subscription_id = subscription_id.into();
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Arc<ObjectMap>) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn function_broker(mut self, broker: Arc<dyn FunctionBroker>) -> Self {
        self.function_broker = broker;
        self
    }

    #[must_use]
    pub fn attribute_broker(mut self, broker: Arc<dyn AttributeBroker>) -> Self {
        self.attribute_broker = broker;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> EvaluationContext {
        EvaluationContext {
            pdp_id: self.pdp_id,
            configuration_id: self.configuration_id,
            subscription_id: self.subscription_id,
            subscription: self.subscription,
            variables: self.variables,
            function_broker: self.function_broker,
            attribute_broker: self.attribute_broker,
            clock: self.clock,
            relative: None,
        }
    }
}

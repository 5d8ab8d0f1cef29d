//! Collaborator contracts: function broker, attribute broker and clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use time::OffsetDateTime;

use crate::value::{ObjectMap, Value};

// =============================================================================
// Function Broker
// =============================================================================

/// Synchronous function evaluation.
///
/// Unknown names and arity mismatches must come back as error values.
pub trait FunctionBroker: Send + Sync {
    fn evaluate(&self, name: &str, arguments: &[Value]) -> Value;
}

/// Broker without any functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFunctionBroker;

impl FunctionBroker for NoFunctionBroker {
    fn evaluate(&self, name: &str, _arguments: &[Value]) -> Value {
        Value::error(format!("Unknown function '{name}'."))
    }
}

// =============================================================================
// Attribute Broker
// =============================================================================

pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30000);
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_FRESH: bool = false;

/// Resolved lookup options of one attribute-finder invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeFinderOptions {
    pub initial_timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: Duration,
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Bypass any shared cached value.
    pub fresh: bool,
}

impl Default for AttributeFinderOptions {
    fn default() -> Self {
        Self {
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: DEFAULT_BACKOFF,
            retries: DEFAULT_RETRIES,
            fresh: DEFAULT_FRESH,
        }
    }
}

/// Everything an attribute broker needs to serve one lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFinderInvocation {
    pub configuration_id: String,
    pub attribute_name: String,
    /// `None` for environment attributes.
    pub entity: Option<Value>,
    pub arguments: Vec<Value>,
    pub variables: Arc<ObjectMap>,
    pub options: AttributeFinderOptions,
}

impl AttributeFinderInvocation {
    pub fn builder(
        configuration_id: impl Into<String>,
        attribute_name: impl Into<String>,
    ) -> AttributeFinderInvocationBuilder {
        AttributeFinderInvocationBuilder {
            invocation: AttributeFinderInvocation {
                configuration_id: configuration_id.into(),
                attribute_name: attribute_name.into(),
                entity: None,
                arguments: Vec::new(),
                variables: Arc::new(ObjectMap::new()),
                options: AttributeFinderOptions::default(),
            },
        }
    }

    /// Key identifying identical lookups, used for sharing cached values.
    pub fn cache_key(&self) -> String {
        let entity = self
            .entity
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let arguments: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
        format!(
            "{}|{}|{}|{}",
            self.configuration_id,
            self.attribute_name,
            entity,
            arguments.join(",")
        )
    }
}

impl fmt::Display for AttributeFinderInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{entity}.")?;
        }
        write!(f, "<{}", self.attribute_name)?;
        if !self.arguments.is_empty() {
            let arguments: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
            write!(f, "({})", arguments.join(", "))?;
        }
        f.write_str(">")
    }
}

pub struct AttributeFinderInvocationBuilder {
    invocation: AttributeFinderInvocation,
}

impl AttributeFinderInvocationBuilder {
    #[must_use]
    pub fn entity(mut self, entity: Option<Value>) -> Self {
        self.invocation.entity = entity;
        self
    }

    #[must_use]
    pub fn arguments(mut self, arguments: Vec<Value>) -> Self {
        self.invocation.arguments = arguments;
        self
    }

    #[must_use]
    pub fn variables(mut self, variables: Arc<ObjectMap>) -> Self {
        self.invocation.variables = variables;
        self
    }

    #[must_use]
    pub fn options(mut self, options: AttributeFinderOptions) -> Self {
        self.invocation.options = options;
        self
    }

    pub fn build(self) -> AttributeFinderInvocation {
        self.invocation
    }
}

/// Source of external attribute values.
///
/// The returned stream is dropped to cancel the lookup. Implementations
/// apply the timeout, retry and polling options of the invocation themselves.
pub trait AttributeBroker: Send + Sync {
    fn attribute_stream(&self, invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value>;
}

/// Broker that knows no attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttributeBroker;

impl AttributeBroker for NoAttributeBroker {
    fn attribute_stream(&self, invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
        let error = Value::error(format!(
            "No attribute finder registered for '{}'.",
            invocation.attribute_name
        ));
        stream::once(async move { error }).boxed()
    }
}

// =============================================================================
// Clock
// =============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock frozen at one instant, for reproducible evaluation.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = AttributeFinderOptions::default();
        assert_eq!(options.initial_timeout, Duration::from_secs(3));
        assert_eq!(options.poll_interval, Duration::from_secs(30));
        assert_eq!(options.backoff, Duration::from_secs(1));
        assert_eq!(options.retries, 3);
        assert!(!options.fresh);
    }

    #[test]
    fn test_cache_key_distinguishes_entity_and_arguments() {
        let a = AttributeFinderInvocation::builder("cfg", "user.role")
            .entity(Some(Value::text("alice")))
            .build();
        let b = AttributeFinderInvocation::builder("cfg", "user.role")
            .entity(Some(Value::text("bob")))
            .build();
        let c = AttributeFinderInvocation::builder("cfg", "user.role")
            .entity(Some(Value::text("alice")))
            .arguments(vec![Value::number(1)])
            .build();
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_invocation_display() {
        let invocation = AttributeFinderInvocation::builder("cfg", "time.now")
            .arguments(vec![Value::text("UTC")])
            .build();
        assert_eq!(invocation.to_string(), r#"<time.now("UTC")>"#);
    }

    #[tokio::test]
    async fn test_no_attribute_broker_emits_single_error() {
        let invocation = Arc::new(AttributeFinderInvocation::builder("cfg", "x.y").build());
        let values: Vec<Value> = NoAttributeBroker.attribute_stream(invocation).collect().await;
        assert_eq!(values.len(), 1);
        assert!(values[0].is_error());
    }
}

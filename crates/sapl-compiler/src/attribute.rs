//! Attribute-finder compiler.
//!
//! `<pip.attr(args)[options]>`, `entity.<pip.attr(args)[options]>` and their
//! head variants `|<...>` always compile to streams. Entity, options and
//! arguments are combined with latest-value semantics; every new combination
//! cancels the running lookup and starts a new one against the attribute
//! broker of the evaluation context.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use sapl_core::ast::AttributeFinder;
use sapl_core::broker::{
    DEFAULT_BACKOFF, DEFAULT_FRESH, DEFAULT_INITIAL_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_RETRIES,
};
use sapl_core::reactive::{combine_latest, switch_map};
use sapl_core::{
    AttributeFinderInvocation, AttributeFinderOptions, AttributeRecord, CompileError, Compiled, CompiledExpression,
    EvaluationContext, ObjectMap, SourceLocation, Value, ValueMetadata,
};

use crate::Result;
use crate::context::CompilationContext;
use crate::expression::compile_all;
use crate::expression::compile_expression;

/// Variable holding the engine-wide settings.
pub const SAPL_VARIABLE: &str = "SAPL";
/// Key of the global attribute-finder defaults inside [`SAPL_VARIABLE`].
pub const ATTRIBUTE_FINDER_OPTIONS: &str = "attributeFinderOptions";

pub const OPTION_INITIAL_TIMEOUT: &str = "initialTimeOutMs";
pub const OPTION_POLL_INTERVAL: &str = "pollIntervalMs";
pub const OPTION_BACKOFF: &str = "backoffMs";
pub const OPTION_RETRIES: &str = "retries";
pub const OPTION_FRESH: &str = "fresh";

/// Compiles an attribute finder. `entity` is `None` for environment
/// attributes and the compiled left-hand side for attribute steps.
pub fn compile_attribute(
    entity: Option<CompiledExpression>,
    finder: &AttributeFinder,
    head: bool,
    location: &SourceLocation,
    ctx: &mut CompilationContext,
) -> Result<CompiledExpression> {
    let step_form = entity.is_some();
    if let Some(entity) = &entity
        && let Some(constant) = entity.as_constant()
    {
        if constant.is_error() {
            return Ok(entity.clone());
        }
        if constant.is_undefined() {
            return Err(CompileError::at(
                location,
                format!("Attribute '{}' is accessed on an undefined value.", finder.name),
            ));
        }
    }

    let options = match &finder.options {
        Some(options) => compile_expression(options, ctx)?,
        None => Compiled::Constant(Value::empty_object()),
    };
    let arguments = compile_all(&finder.arguments, ctx)?;

    let mut sources = Vec::with_capacity(arguments.len() + 2);
    sources.push(entity.unwrap_or(Compiled::Constant(Value::UNDEFINED)));
    sources.push(options);
    sources.extend(arguments);
    let sources = Arc::new(sources);

    let finder = Arc::new(ResolvedFinder {
        name: ctx.resolve_name(&finder.name),
        step_form,
        location: location.clone(),
    });

    Ok(Compiled::stream(move |ctx| {
        let inputs: Vec<BoxStream<'static, Value>> = sources.iter().map(|source| source.to_stream(ctx)).collect();
        let finder = finder.clone();
        let ctx = ctx.clone();
        let lookups = switch_map(combine_latest(inputs).boxed(), move |values| {
            finder.invoke(&ctx, values)
        });
        if head {
            lookups.take(1).boxed()
        } else {
            lookups.boxed()
        }
    }))
}

struct ResolvedFinder {
    name: String,
    step_form: bool,
    location: SourceLocation,
}

impl ResolvedFinder {
    /// One broker lookup for a combination of `[entity, options, args...]`.
    fn invoke(&self, ctx: &EvaluationContext, values: Vec<Value>) -> BoxStream<'static, Value> {
        let mut values = values.into_iter();
        let entity = values.next().unwrap_or_default();
        let options = values.next().unwrap_or_default();
        let arguments: Vec<Value> = values.collect();

        if let Some(error) = std::iter::once(&entity)
            .chain(std::iter::once(&options))
            .chain(arguments.iter())
            .find(|value| value.is_error())
        {
            return single(error.clone());
        }
        if self.step_form && entity.is_undefined() {
            return single(Value::error_at(
                &self.location,
                format!("Attribute '{}' is accessed on an undefined value.", self.name),
            ));
        }

        let metadata = ValueMetadata::merge_all(std::iter::once(&entity).chain(arguments.iter()));
        let invocation = Arc::new(
            AttributeFinderInvocation::builder(ctx.configuration_id(), self.name.as_str())
                .entity(self.step_form.then(|| entity.clone().with_metadata(ValueMetadata::EMPTY)))
                .arguments(
                    arguments
                        .into_iter()
                        .map(|argument| argument.with_metadata(ValueMetadata::EMPTY))
                        .collect(),
                )
                .variables(ctx.variables().clone())
                .options(resolve_options(&options, ctx.variables()))
                .build(),
        );

        let clock_ctx = ctx.clone();
        let location = self.location.clone();
        ctx.attribute_broker()
            .attribute_stream(invocation.clone())
            .map(move |value| {
                let value = value.locate_error(&location);
                let record = AttributeRecord::new(invocation.clone(), value.clone(), clock_ctx.now(), Some(location.clone()));
                value.merge_metadata(&metadata).with_record(record)
            })
            .boxed()
    }
}

fn single(value: Value) -> BoxStream<'static, Value> {
    stream::once(async move { value }).boxed()
}

// =============================================================================
// Options
// =============================================================================

/// Resolves lookup options. Per field, an inline option wins over the global
/// default in `SAPL.attributeFinderOptions`, which wins over the built-in
/// default. A value of the wrong type is ignored at its level.
pub fn resolve_options(inline: &Value, variables: &ObjectMap) -> AttributeFinderOptions {
    let global = variables
        .get(SAPL_VARIABLE)
        .and_then(|sapl| sapl.get(ATTRIBUTE_FINDER_OPTIONS));
    let levels: Vec<&Value> = std::iter::once(inline).chain(global).collect();

    let millis = |key: &str, default: Duration| {
        levels
            .iter()
            .find_map(|level| level.get(key).and_then(Value::as_integer).and_then(|n| u64::try_from(n).ok()))
            .map_or(default, Duration::from_millis)
    };
    let retries = levels
        .iter()
        .find_map(|level| level.get(OPTION_RETRIES).and_then(Value::as_integer).and_then(|n| u32::try_from(n).ok()))
        .unwrap_or(DEFAULT_RETRIES);
    let fresh = levels
        .iter()
        .find_map(|level| level.get(OPTION_FRESH).and_then(Value::as_bool))
        .unwrap_or(DEFAULT_FRESH);

    AttributeFinderOptions {
        initial_timeout: millis(OPTION_INITIAL_TIMEOUT, DEFAULT_INITIAL_TIMEOUT),
        poll_interval: millis(OPTION_POLL_INTERVAL, DEFAULT_POLL_INTERVAL),
        backoff: millis(OPTION_BACKOFF, DEFAULT_BACKOFF),
        retries,
        fresh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::tests::{compiler, eval_ctx, lit, with_local};
    use sapl_core::ast::{BinaryOperator, Expression, Step};
    use sapl_core::{AttributeBroker, AuthorizationSubscription, CompileErrorKind, Nature};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Emits a fixed sequence per lookup and records every invocation.
    struct Recording {
        values: Vec<Value>,
        seen: Mutex<Vec<Arc<AttributeFinderInvocation>>>,
    }

    impl Recording {
        fn new(values: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                values,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl AttributeBroker for Recording {
        fn attribute_stream(&self, invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
            self.seen.lock().unwrap().push(invocation);
            stream::iter(self.values.clone()).boxed()
        }
    }

    /// Echoes the first argument once, then stays open until dropped.
    #[derive(Default)]
    struct LongLived {
        started: AtomicUsize,
        dropped: Arc<AtomicUsize>,
    }

    struct CountDrop(Arc<AtomicUsize>);

    impl Drop for CountDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AttributeBroker for LongLived {
        fn attribute_stream(&self, invocation: Arc<AttributeFinderInvocation>) -> BoxStream<'static, Value> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let first = invocation.arguments.first().cloned().unwrap_or_default();
            let guard = CountDrop(self.dropped.clone());
            stream::unfold((Some(first), guard), |(next, guard)| async move {
                match next {
                    Some(value) => Some((value, (None, guard))),
                    None => std::future::pending().await,
                }
            })
            .boxed()
        }
    }

    fn ctx_with(broker: Arc<Recording>, variables: serde_json::Value) -> EvaluationContext {
        let variables = match Value::from_json(&variables).as_object() {
            Some(map) => map.clone(),
            None => ObjectMap::new(),
        };
        EvaluationContext::builder(AuthorizationSubscription::new(
            Value::from_json(&json!({"name": "alice"})),
            "read",
            "doc",
        ))
        .configuration_id("cfg-1")
        .variables(Arc::new(variables))
        .attribute_broker(broker)
        .build()
    }

    async fn run(expression: &Expression, ctx: &EvaluationContext) -> Vec<Value> {
        let compiled = compile_expression(expression, &mut compiler()).unwrap();
        assert_eq!(compiled.nature(), Nature::Stream);
        compiled.to_stream(ctx).collect().await
    }

    #[tokio::test]
    async fn test_environment_attribute_streams_broker_values() {
        let broker = Recording::new(vec![Value::number(1), Value::number(2)]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let expression = Expression::environment_attribute(AttributeFinder::new("time.now"), false);

        let values = run(&expression, &ctx).await;
        assert_eq!(values, vec![Value::number(1), Value::number(2)]);

        let seen = broker.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].configuration_id, "cfg-1");
        assert!(seen[0].entity.is_none());
    }

    #[tokio::test]
    async fn test_new_argument_cancels_running_lookup() {
        let broker = Arc::new(LongLived::default());
        let ctx = EvaluationContext::builder(AuthorizationSubscription::new(Value::from("alice"), "read", "doc"))
            .attribute_broker(broker.clone())
            .build();

        let (sender, receiver) = mpsc::unbounded_channel::<Value>();
        let receiver = Mutex::new(Some(receiver));
        let ids = Compiled::stream(move |_| match receiver.lock().unwrap().take() {
            Some(receiver) => stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|value| (value, receiver))
            })
            .boxed(),
            None => stream::empty().boxed(),
        });
        let finder = AttributeFinder::new("user.level").with_arguments(vec![Expression::identifier("id")]);
        let compiled = with_local("id", ids, &Expression::environment_attribute(finder, false));
        let mut values = compiled.to_stream(&ctx);

        sender.send(Value::number(1)).unwrap();
        assert_eq!(values.next().await.and_then(|value| value.as_integer()), Some(1));
        assert_eq!(broker.started.load(Ordering::SeqCst), 1);
        assert_eq!(broker.dropped.load(Ordering::SeqCst), 0);

        sender.send(Value::number(2)).unwrap();
        assert_eq!(values.next().await.and_then(|value| value.as_integer()), Some(2));
        assert_eq!(broker.started.load(Ordering::SeqCst), 2);
        assert_eq!(broker.dropped.load(Ordering::SeqCst), 1);

        drop(values);
        assert_eq!(broker.dropped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_each_reference_to_a_stream_variable_looks_up_again() {
        let broker = Recording::new(vec![Value::text("gold")]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let level = compile_expression(
            &Expression::environment_attribute(AttributeFinder::new("user.level"), false),
            &mut compiler(),
        )
        .unwrap();
        let expression = Expression::binary(
            BinaryOperator::Equal,
            Expression::identifier("level"),
            Expression::identifier("level"),
        );
        let compiled = with_local("level", level, &expression);
        let values: Vec<Value> = compiled.to_stream(&ctx).collect().await;
        assert_eq!(values.last().and_then(Value::as_bool), Some(true));
        assert_eq!(broker.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_head_takes_first_value_only() {
        let broker = Recording::new(vec![Value::number(1), Value::number(2)]);
        let ctx = ctx_with(broker, json!({}));
        let expression = Expression::environment_attribute(AttributeFinder::new("time.now"), true);
        assert_eq!(run(&expression, &ctx).await, vec![Value::number(1)]);
    }

    #[tokio::test]
    async fn test_values_carry_attribute_provenance() {
        let broker = Recording::new(vec![Value::text("gold")]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let expression = Expression::path(
            Expression::identifier("subject"),
            vec![Step::attribute(AttributeFinder::new("user.level"), false)],
        );
        let values = run(&expression, &ctx).await;
        assert_eq!(values.len(), 1);
        let trace = values[0].metadata().attribute_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].invocation.attribute_name, "user.level");
        assert_eq!(
            broker.seen.lock().unwrap()[0].entity,
            Some(Value::from_json(&json!({"name": "alice"})))
        );
    }

    #[tokio::test]
    async fn test_error_argument_skips_lookup() {
        let broker = Recording::new(vec![Value::number(1)]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let finder = AttributeFinder::new("time.now").with_arguments(vec![Expression::call("test.fail", vec![])]);
        let values = run(&Expression::environment_attribute(finder, false), &ctx).await;
        assert_eq!(values.len(), 1);
        assert!(values[0].is_error());
        assert!(broker.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_undefined_entity_is_error() {
        let broker = Recording::new(vec![Value::number(1)]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let expression = Expression::path(
            Expression::path(Expression::identifier("subject"), vec![Step::key("missing")]),
            vec![Step::attribute(AttributeFinder::new("user.level"), false)],
        );
        let values = run(&expression, &ctx).await;
        assert!(values[0].is_error());
        assert!(broker.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_constant_undefined_entity_is_compile_error() {
        let expression = Expression::path(
            Expression::undefined(),
            vec![Step::attribute(AttributeFinder::new("user.level"), false)],
        );
        let error = compile_expression(&expression, &mut compiler()).unwrap_err();
        assert_eq!(error.kind, CompileErrorKind::Document);
    }

    #[test]
    fn test_constant_error_entity_stays_constant() {
        let expression = Expression::path(
            Expression::call("test.fail", vec![]),
            vec![Step::attribute(AttributeFinder::new("user.level"), false)],
        );
        let compiled = compile_expression(&expression, &mut compiler()).unwrap();
        assert!(compiled.is_constant_error());
        assert!(compiled.evaluate(&eval_ctx()).is_some());
    }

    #[test]
    fn test_option_precedence() {
        let variables = Value::from_json(&json!({
            "SAPL": {"attributeFinderOptions": {"retries": 10, "backoffMs": 50}}
        }));
        let variables = variables.as_object().cloned().unwrap_or_default();

        let options = resolve_options(&Value::from_json(&json!({"retries": 5})), &variables);
        assert_eq!(options.retries, 5);
        assert_eq!(options.backoff, Duration::from_millis(50));
        assert_eq!(options.initial_timeout, DEFAULT_INITIAL_TIMEOUT);

        let options = resolve_options(&Value::from_json(&json!({"retries": "many"})), &variables);
        assert_eq!(options.retries, 10);

        let options = resolve_options(&Value::empty_object(), &ObjectMap::new());
        assert_eq!(options, AttributeFinderOptions::default());
        assert_eq!(options.retries, 3);
    }

    #[tokio::test]
    async fn test_inline_options_reach_broker() {
        let broker = Recording::new(vec![Value::number(1)]);
        let ctx = ctx_with(broker.clone(), json!({}));
        let finder = AttributeFinder::new("time.now").with_options(lit(json!({"pollIntervalMs": 250, "fresh": true})));
        run(&Expression::environment_attribute(finder, false), &ctx).await;
        let seen = broker.seen.lock().unwrap();
        assert_eq!(seen[0].options.poll_interval, Duration::from_millis(250));
        assert!(seen[0].options.fresh);
    }
}

//! Expression compiler.
//!
//! Turns AST expressions into [`CompiledExpression`]s. Composition follows
//! [`Compiled::combine`], so the result always has the widest nature of its
//! parts. Literal-only sub-trees fold to constants, `&&` and `||` evaluate
//! their right operand only when needed, and function names are resolved
//! against the document imports here, once.

pub mod operators;
pub mod steps;

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use regex::Regex;
use sapl_core::ast::{BinaryOperator, Expression, ExpressionKind, Step, StepKind};
use sapl_core::reactive::switch_map;
use sapl_core::{
    CompileError, Compiled, CompiledExpression, EvaluationContext, Nature, ObjectMap, SourceLocation, Value,
    ValueMetadata,
};

use crate::context::CompilationContext;
use crate::{Result, attribute, filter};
use steps::StaticStep;

pub fn compile_expression(expression: &Expression, ctx: &mut CompilationContext) -> Result<CompiledExpression> {
    let location = &expression.location;
    match &expression.kind {
        ExpressionKind::Undefined => Ok(Compiled::Constant(Value::UNDEFINED)),
        ExpressionKind::Literal { value } => Ok(Compiled::Constant(value.clone())),
        ExpressionKind::Array { items } => {
            let parts = compile_all(items, ctx)?;
            Ok(Compiled::combine(parts, build_array))
        }
        ExpressionKind::Object { entries } => {
            let keys: Vec<String> = entries.iter().map(|entry| entry.key.clone()).collect();
            let parts = entries
                .iter()
                .map(|entry| compile_expression(&entry.value, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Compiled::combine(parts, move |values| build_object(&keys, values)))
        }
        ExpressionKind::Identifier { name } => Ok(compile_identifier(name, ctx)),
        ExpressionKind::RelativeValue => {
            require_relative(ctx, location, "@")?;
            Ok(Compiled::pure(EvaluationContext::relative_value))
        }
        ExpressionKind::RelativeLocation => {
            require_relative(ctx, location, "#")?;
            Ok(Compiled::pure(EvaluationContext::relative_location))
        }
        ExpressionKind::Unary { operator, operand } => {
            let operator = *operator;
            let location = location.clone();
            let operand = compile_expression(operand, ctx)?;
            Ok(operand.map(move |value| operators::unary(operator, value, &location)))
        }
        ExpressionKind::Binary {
            operator,
            left,
            right,
        } => {
            let left = compile_expression(left, ctx)?;
            let right = compile_expression(right, ctx)?;
            Ok(compile_binary(*operator, left, right, location))
        }
        ExpressionKind::FunctionCall { name, arguments } => {
            let qualified = ctx.resolve_name(name);
            let arguments = compile_all(arguments, ctx)?;
            Ok(compile_call(qualified, arguments, location, ctx))
        }
        ExpressionKind::Path { base, steps } => {
            let mut current = compile_expression(base, ctx)?;
            for step in steps {
                current = compile_step(current, step, ctx)?;
            }
            Ok(current)
        }
        ExpressionKind::Filter { base, filter } => {
            let base = compile_expression(base, ctx)?;
            filter::compile_filter(base, filter, location, ctx)
        }
        ExpressionKind::Subtemplate { base, template } => {
            let base = compile_expression(base, ctx)?;
            compile_subtemplate(base, template, location, ctx)
        }
        ExpressionKind::EnvironmentAttribute { finder, head } => {
            attribute::compile_attribute(None, finder, *head, location, ctx)
        }
    }
}

pub fn compile_all(expressions: &[Expression], ctx: &mut CompilationContext) -> Result<Vec<CompiledExpression>> {
    expressions
        .iter()
        .map(|expression| compile_expression(expression, ctx))
        .collect()
}

fn require_relative(ctx: &CompilationContext, location: &SourceLocation, symbol: &str) -> Result<()> {
    if ctx.relative_allowed() {
        Ok(())
    } else {
        Err(CompileError::unsupported(
            location,
            format!("'{symbol}' is only allowed in conditions, filter arguments and subtemplates."),
        ))
    }
}

// =============================================================================
// Containers
// =============================================================================

fn first_error(values: &[Value]) -> Option<Value> {
    values.iter().find(|value| value.is_error()).cloned()
}

/// Array from element values. `Undefined` elements are dropped.
fn build_array(values: Vec<Value>) -> Value {
    if let Some(error) = first_error(&values) {
        return error;
    }
    let metadata = ValueMetadata::merge_all(&values);
    let items = values.into_iter().filter(|value| !value.is_undefined()).collect();
    Value::array(items).with_metadata(metadata)
}

/// Object from field values. `Undefined` fields are dropped.
fn build_object(keys: &[String], values: Vec<Value>) -> Value {
    if let Some(error) = first_error(&values) {
        return error;
    }
    let metadata = ValueMetadata::merge_all(&values);
    let entries: ObjectMap = keys
        .iter()
        .cloned()
        .zip(values)
        .filter(|(_, value)| !value.is_undefined())
        .collect();
    Value::object(entries).with_metadata(metadata)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Local definitions are substituted; everything else is looked up in the
/// subscription and then in the configuration variables at evaluation time.
fn compile_identifier(name: &str, ctx: &CompilationContext) -> CompiledExpression {
    if let Some(local) = ctx.lookup_local(name) {
        return local.clone();
    }
    let name = name.to_string();
    Compiled::pure(move |ctx| ctx.get(&name))
}

// =============================================================================
// Operators
// =============================================================================

fn compile_binary(
    operator: BinaryOperator,
    left: CompiledExpression,
    right: CompiledExpression,
    location: &SourceLocation,
) -> CompiledExpression {
    match operator {
        BinaryOperator::And | BinaryOperator::Or => compile_lazy(operator, left, right, location),
        BinaryOperator::Regex => {
            let pattern = right.as_constant().and_then(Value::as_text).map(Regex::new);
            match pattern {
                Some(Ok(regex)) => left.map(move |value| {
                    if value.is_error() {
                        return value;
                    }
                    operators::regex_match(&regex, &value).merge_metadata(value.metadata())
                }),
                _ => compile_eager(operator, left, right, location),
            }
        }
        _ => compile_eager(operator, left, right, location),
    }
}

fn compile_eager(
    operator: BinaryOperator,
    left: CompiledExpression,
    right: CompiledExpression,
    location: &SourceLocation,
) -> CompiledExpression {
    let location = location.clone();
    Compiled::combine(vec![left, right], move |values| {
        let mut values = values.into_iter();
        let left = values.next().unwrap_or_default();
        let right = values.next().unwrap_or_default();
        operators::binary(operator, left, right, &location)
    })
}

/// Short-circuit evaluation of `&&` and `||`.
///
/// The right operand is never evaluated (or subscribed to) when the left one
/// decides the result, so errors on the untaken branch never surface.
pub(crate) fn compile_lazy(
    operator: BinaryOperator,
    left: CompiledExpression,
    right: CompiledExpression,
    location: &SourceLocation,
) -> CompiledExpression {
    let deciding = operator == BinaryOperator::Or;
    let location = Arc::new(location.clone());

    let decide_location = location.clone();
    let decide = Arc::new(move |left: &Value| -> Option<Value> {
        let checked = operators::require_boolean(left.clone(), operator, &decide_location);
        match checked.as_bool() {
            Some(b) if b != deciding => None,
            _ => Some(checked),
        }
    });
    let finish = Arc::new(move |left: &Value, right: Value| -> Value {
        operators::require_boolean(right, operator, &location).merge_metadata(left.metadata())
    });

    match left {
        Compiled::Constant(left) => match decide(&left) {
            Some(result) => Compiled::Constant(result),
            None => right.map(move |right| finish(&left, right)),
        },
        Compiled::Pure(left) if right.nature() != Nature::Stream => {
            let right = Arc::new(right);
            Compiled::pure(move |ctx| {
                let left = left(ctx);
                match decide(&left) {
                    Some(result) => result,
                    None => {
                        let right = right.evaluate(ctx).unwrap_or_default();
                        finish(&left, right)
                    }
                }
            })
        }
        left => {
            let left = Arc::new(left);
            let right = Arc::new(right);
            Compiled::stream(move |ctx| {
                let decide = decide.clone();
                let finish = finish.clone();
                let right = right.clone();
                let ctx_for_right = ctx.clone();
                switch_map(left.to_stream(ctx), move |left: Value| match decide(&left) {
                    Some(result) => stream::once(async move { result }).boxed(),
                    None => {
                        let finish = finish.clone();
                        right
                            .to_stream(&ctx_for_right)
                            .map(move |right| finish(&left, right))
                            .boxed()
                    }
                })
                .boxed()
            })
        }
    }
}

// =============================================================================
// Function calls
// =============================================================================

fn compile_call(
    qualified: String,
    arguments: Vec<CompiledExpression>,
    location: &SourceLocation,
    ctx: &CompilationContext,
) -> CompiledExpression {
    let location = location.clone();
    if arguments.iter().all(|argument| argument.nature() == Nature::Value)
        && let Some(folding) = ctx.folding_context()
    {
        let values = arguments.iter().filter_map(|a| a.as_constant().cloned()).collect();
        return Compiled::Constant(call_function(&folding, &qualified, values, &location));
    }
    Compiled::combine_with(arguments, move |ctx, values| {
        call_function(ctx, &qualified, values, &location)
    })
}

/// Error arguments propagate without calling the function.
pub fn call_function(ctx: &EvaluationContext, name: &str, arguments: Vec<Value>, location: &SourceLocation) -> Value {
    if let Some(error) = first_error(&arguments) {
        return error;
    }
    let metadata = ValueMetadata::merge_all(&arguments);
    ctx.function_broker()
        .evaluate(name, &arguments)
        .locate_error(location)
        .merge_metadata(&metadata)
}

// =============================================================================
// Paths
// =============================================================================

fn compile_step(current: CompiledExpression, step: &Step, ctx: &mut CompilationContext) -> Result<CompiledExpression> {
    let location = step.location.clone();
    let static_step = match &step.kind {
        StepKind::Condition { condition } => {
            let condition = compile_synchronous(condition, &location, ctx, "Conditions in path steps")?;
            return Ok(Compiled::combine_with(vec![current], move |ctx, values| {
                let value = values.into_iter().next().unwrap_or_default();
                steps::select_where(ctx, &value, &condition, &location)
            }));
        }
        StepKind::Expression { expression } => {
            let selector = compile_synchronous(expression, &location, ctx, "Expression steps")?;
            return Ok(Compiled::combine_with(vec![current], move |ctx, values| {
                let value = values.into_iter().next().unwrap_or_default();
                steps::select_computed(ctx, &value, &selector, &location)
            }));
        }
        StepKind::Attribute { finder, head } => {
            return attribute::compile_attribute(Some(current), finder, *head, &location, ctx);
        }
        other => static_step_of(other, &location)?,
    };
    Ok(current.map(move |value| steps::navigate(&value, &static_step, &location)))
}

/// Static counterpart of a step, or a compile error for the dynamic kinds.
pub fn static_step_of(kind: &StepKind, location: &SourceLocation) -> Result<StaticStep> {
    let step = match kind {
        StepKind::Key { key } | StepKind::EscapedKey { key } => StaticStep::Key(key.clone()),
        StepKind::Wildcard => StaticStep::Wildcard,
        StepKind::Index { index } => StaticStep::Index(*index),
        StepKind::Slice { from, to, step } => StaticStep::Slice {
            from: *from,
            to: *to,
            step: *step,
        },
        StepKind::IndexUnion { indices } => StaticStep::IndexUnion(indices.clone()),
        StepKind::AttributeUnion { keys } => StaticStep::AttributeUnion(keys.clone()),
        StepKind::RecursiveKey { key } => StaticStep::RecursiveKey(key.clone()),
        StepKind::RecursiveWildcard => StaticStep::RecursiveWildcard,
        StepKind::RecursiveIndex { index } => StaticStep::RecursiveIndex(*index),
        other => {
            return Err(CompileError::invariant(format!(
                "'{}' step has no static form (at {location})",
                other.name()
            )));
        }
    };
    Ok(step)
}

/// Compiles an expression evaluated with `@`/`#` bound. Streams are
/// rejected because such positions are evaluated synchronously per element.
pub fn compile_synchronous(
    expression: &Expression,
    location: &SourceLocation,
    ctx: &mut CompilationContext,
    what: &str,
) -> Result<CompiledExpression> {
    let compiled = ctx.relative(|ctx| compile_expression(expression, ctx))?;
    if compiled.nature() == Nature::Stream {
        return Err(CompileError::unsupported(
            location,
            format!("{what} must not access attributes."),
        ));
    }
    Ok(compiled)
}

// =============================================================================
// Subtemplates
// =============================================================================

fn compile_subtemplate(
    base: CompiledExpression,
    template: &Expression,
    location: &SourceLocation,
    ctx: &mut CompilationContext,
) -> Result<CompiledExpression> {
    let template = compile_synchronous(template, location, ctx, "Subtemplates")?;
    Ok(Compiled::combine_with(vec![base], move |ctx, values| {
        let value = values.into_iter().next().unwrap_or_default();
        apply_template(ctx, value, &template)
    }))
}

/// Arrays map the template over their elements, anything else is the
/// single binding of `@`.
fn apply_template(ctx: &EvaluationContext, value: Value, template: &CompiledExpression) -> Value {
    if value.is_error() || value.is_undefined() {
        return value;
    }
    let Some(items) = value.as_array() else {
        let result = steps::evaluate_relative(ctx, template, &value, Value::UNDEFINED);
        return result.merge_metadata(value.metadata());
    };
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let result = steps::evaluate_relative(ctx, template, item, Value::number(index as f64));
        if result.is_error() {
            return result;
        }
        if !result.is_undefined() {
            results.push(result);
        }
    }
    Value::array(results).merge_metadata(value.metadata())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::stream::BoxStream;
    use sapl_core::ast::{AttributeFinder, FilterComponent, UnaryOperator};
    use sapl_core::{AuthorizationSubscription, FunctionBroker};
    use serde_json::json;

    /// Broker with a handful of functions for compiler tests.
    pub(crate) struct TestFunctions;

    impl FunctionBroker for TestFunctions {
        fn evaluate(&self, name: &str, arguments: &[Value]) -> Value {
            match (name, arguments) {
                ("math.increment", [n]) => match n.as_number() {
                    Some(n) => Value::number(n + 1.0),
                    None => Value::error("increment expects a number"),
                },
                ("test.identity", [value, ..]) => value.clone(),
                ("test.remove", [_, ..]) => Value::UNDEFINED,
                ("test.constant", [_, replacement]) => replacement.clone(),
                ("test.fail", _) => Value::error("failed on purpose"),
                _ => Value::error(format!("Unknown function '{name}'.")),
            }
        }
    }

    pub(crate) fn eval_ctx() -> EvaluationContext {
        let subscription = AuthorizationSubscription::new(
            Value::from_json(&json!({"name": "alice", "roles": ["admin", "user"]})),
            "read",
            Value::from_json(&json!({"id": 7, "owner": "alice"})),
        );
        EvaluationContext::builder(subscription)
            .function_broker(Arc::new(TestFunctions))
            .build()
    }

    pub(crate) fn compiler() -> CompilationContext {
        CompilationContext::new("default", "test").with_function_broker(Arc::new(TestFunctions))
    }

    pub(crate) fn lit(json: serde_json::Value) -> Expression {
        Expression::literal(Value::from_json(&json))
    }

    pub(crate) fn compile(expression: &Expression) -> CompiledExpression {
        compile_expression(expression, &mut compiler()).unwrap()
    }

    pub(crate) fn evaluate(expression: &Expression) -> Value {
        compile(expression).evaluate(&eval_ctx()).unwrap()
    }

    pub(crate) fn stream_of(values: Vec<i64>) -> CompiledExpression {
        Compiled::stream(move |_| {
            let values: Vec<Value> = values.iter().map(|n| Value::number(*n as f64)).collect();
            stream::iter(values).boxed()
        })
    }

    pub(crate) fn with_local(name: &str, value: CompiledExpression, expression: &Expression) -> CompiledExpression {
        let mut ctx = compiler();
        ctx.scoped(|ctx| {
            ctx.define_local(name, value, &SourceLocation::default())?;
            compile_expression(expression, ctx)
        })
        .unwrap()
    }

    pub(crate) async fn collect(compiled: &CompiledExpression) -> Vec<Value> {
        let stream: BoxStream<'static, Value> = compiled.to_stream(&eval_ctx());
        stream.collect().await
    }

    #[test]
    fn test_literal_arithmetic_folds_to_constant() {
        let expression = Expression::binary(BinaryOperator::Add, lit(json!(1)), lit(json!(2)));
        assert_eq!(compile(&expression).as_constant(), Some(&Value::number(3)));
    }

    #[test]
    fn test_subscription_access_is_pure() {
        let expression = Expression::path(Expression::identifier("subject"), vec![Step::key("name")]);
        let compiled = compile(&expression);
        assert_eq!(compiled.nature(), Nature::Pure);
        assert_eq!(compiled.evaluate(&eval_ctx()), Some(Value::text("alice")));
    }

    #[test]
    fn test_nature_propagation_regardless_of_operand_order() {
        let pure = Expression::identifier("action");
        let constant = lit(json!("read"));
        for (left, right) in [(pure.clone(), constant.clone()), (constant, pure)] {
            let compiled = compile(&Expression::binary(BinaryOperator::Equal, left, right));
            assert_eq!(compiled.nature(), Nature::Pure);
            assert_eq!(compiled.evaluate(&eval_ctx()), Some(Value::TRUE));
        }
    }

    #[tokio::test]
    async fn test_stream_operand_makes_stream() {
        let expression = Expression::binary(
            BinaryOperator::Add,
            Expression::identifier("n"),
            lit(json!(10)),
        );
        let compiled = with_local("n", stream_of(vec![1, 2]), &expression);
        assert_eq!(compiled.nature(), Nature::Stream);
        assert_eq!(collect(&compiled).await, vec![Value::number(11), Value::number(12)]);
    }

    #[test]
    fn test_lazy_and_skips_failing_right_operand() {
        let failing = Expression::call("test.fail", vec![]);
        let expression = Expression::binary(BinaryOperator::And, lit(json!(false)), failing.clone());
        assert_eq!(compile(&expression).as_constant(), Some(&Value::FALSE));

        let expression = Expression::binary(BinaryOperator::Or, lit(json!(true)), failing.clone());
        assert_eq!(compile(&expression).as_constant(), Some(&Value::TRUE));

        let expression = Expression::binary(BinaryOperator::EagerAnd, lit(json!(false)), failing);
        assert!(compile(&expression).is_constant_error());
    }

    #[test]
    fn test_lazy_operators_require_booleans() {
        let expression = Expression::binary(BinaryOperator::And, lit(json!(1)), lit(json!(true)));
        assert!(compile(&expression).is_constant_error());
        let expression = Expression::binary(BinaryOperator::And, lit(json!(true)), lit(json!("x")));
        assert!(compile(&expression).is_constant_error());
    }

    #[tokio::test]
    async fn test_lazy_and_with_stream_left_switches_right_side() {
        let expression = Expression::binary(
            BinaryOperator::And,
            Expression::identifier("flag"),
            Expression::binary(BinaryOperator::Equal, Expression::identifier("action"), lit(json!("read"))),
        );
        let flags = Compiled::stream(|_| stream::iter(vec![Value::FALSE, Value::TRUE]).boxed());
        let compiled = with_local("flag", flags, &expression);
        assert_eq!(collect(&compiled).await, vec![Value::FALSE, Value::TRUE]);
    }

    #[test]
    fn test_array_and_object_drop_undefined_members() {
        let expression = Expression::object(vec![
            ("a", lit(json!(1))),
            ("b", Expression::undefined()),
            ("c", Expression::array(vec![Expression::undefined(), lit(json!(2))])),
        ]);
        assert_eq!(
            compile(&expression).as_constant(),
            Some(&Value::from_json(&json!({"a": 1, "c": [2]})))
        );
    }

    #[test]
    fn test_function_calls_fold_and_propagate_errors() {
        let call = Expression::call("math.increment", vec![lit(json!(41))]);
        assert_eq!(compile(&call).as_constant(), Some(&Value::number(42)));

        let unknown = Expression::call("math.nothing", vec![]);
        assert!(compile(&unknown).is_constant_error());

        let failing_argument = Expression::call(
            "math.increment",
            vec![Expression::binary(BinaryOperator::Divide, lit(json!(1)), lit(json!(0)))],
        );
        let value = compile(&failing_argument);
        assert!(
            value
                .as_constant()
                .and_then(Value::as_error)
                .is_some_and(|e| e.message.contains("Division"))
        );
    }

    #[test]
    fn test_function_call_resolves_imports_once() {
        use sapl_core::ast::{Document, Entitlement, Import, Policy};
        let mut ctx = compiler();
        let document = Document::policy(Policy::new("p", Entitlement::Permit)).with_import(Import::Function {
            library: "math".into(),
            function: "increment".into(),
            alias: Some("inc".into()),
        });
        ctx.enter_document(&document).unwrap();
        let compiled = compile_expression(&Expression::call("inc", vec![lit(json!(1))]), &mut ctx).unwrap();
        ctx.enter_document(&Document::policy(Policy::new("q", Entitlement::Deny)))
            .unwrap();
        assert_eq!(compiled.as_constant(), Some(&Value::number(2)));
    }

    #[test]
    fn test_relative_value_outside_relative_position_is_rejected() {
        let error = compile_expression(&Expression::relative_value(), &mut compiler()).unwrap_err();
        assert_eq!(error.kind, sapl_core::CompileErrorKind::UnsupportedStep);
    }

    #[test]
    fn test_condition_step_filters_elements() {
        let condition = Expression::binary(BinaryOperator::Greater, Expression::relative_value(), lit(json!(1)));
        let expression = Expression::path(lit(json!([1, 2, 3])), vec![Step::condition(condition)]);
        assert_eq!(evaluate(&expression), Value::from_json(&json!([2, 3])));
    }

    #[test]
    fn test_condition_step_binds_location() {
        let condition = Expression::binary(BinaryOperator::Equal, Expression::relative_location(), lit(json!("b")));
        let expression = Expression::path(lit(json!({"a": 1, "b": 2})), vec![Step::condition(condition)]);
        assert_eq!(evaluate(&expression), Value::from_json(&json!([2])));
    }

    #[test]
    fn test_stream_condition_is_rejected() {
        let condition = Expression::environment_attribute(AttributeFinder::new("time.now"), false);
        let expression = Expression::path(lit(json!([1])), vec![Step::condition(condition)]);
        let error = compile_expression(&expression, &mut compiler()).unwrap_err();
        assert_eq!(error.kind, sapl_core::CompileErrorKind::UnsupportedStep);
    }

    #[test]
    fn test_subtemplate_maps_array_elements() {
        let template = Expression::object(vec![(
            "doubled",
            Expression::binary(BinaryOperator::Multiply, Expression::relative_value(), lit(json!(2))),
        )]);
        let expression = Expression::subtemplate(lit(json!([1, 2])), template);
        assert_eq!(
            evaluate(&expression),
            Value::from_json(&json!([{"doubled": 2}, {"doubled": 4}]))
        );
    }

    #[test]
    fn test_unary_on_wrong_type_is_error_value() {
        let expression = Expression::unary(UnaryOperator::Negate, lit(json!("x")));
        assert!(compile(&expression).is_constant_error());
    }

    #[test]
    fn test_compiling_twice_is_referentially_transparent() {
        let expression = Expression::filter(
            lit(json!({"a": 1, "b": 2})),
            FilterComponent::Extended {
                statements: vec![sapl_core::ast::FilterStatement::new(
                    vec![Step::key("a")],
                    "math.increment",
                    vec![],
                )],
            },
        );
        let first = compile(&expression);
        let second = compile(&expression);
        assert_eq!(first.as_constant(), second.as_constant());
    }
}

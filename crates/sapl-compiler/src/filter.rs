//! Filter compiler.
//!
//! `value |- [each] fn(args)` and `value |- { [each] @.path : fn(args), ... }`
//! apply a function at selected locations and rebuild the value around the
//! results. Untouched members are copied as they are; a result of
//! `Undefined` removes the member (object) or skips the element (array).

use std::sync::Arc;

use sapl_core::ast::{FilterComponent, FilterStatement, Step, StepKind};
use sapl_core::{CompileError, Compiled, CompiledExpression, EvaluationContext, Nature, ObjectMap, SourceLocation, Value, ValueKind};

use crate::Result;
use crate::context::CompilationContext;
use crate::expression::steps::{self, MAX_RECURSION_DEPTH, StaticStep};
use crate::expression::{call_function, compile_expression, compile_synchronous, static_step_of};

// =============================================================================
// Compiled form
// =============================================================================

enum FilterStep {
    Static(StaticStep),
    Condition(CompiledExpression),
    Computed(CompiledExpression),
    /// Attribute finders are not allowed in filter paths.
    Attribute,
}

struct LocatedStep {
    step: FilterStep,
    location: SourceLocation,
}

enum Argument {
    Constant(Value),
    /// Evaluated per selected location with `@` and `#` bound.
    Pure(CompiledExpression),
    /// Index into the stream values resolved before the filter runs.
    Stream(usize),
}

struct CompiledStatement {
    each: bool,
    path: Vec<LocatedStep>,
    function: String,
    arguments: Vec<Argument>,
    location: SourceLocation,
}

impl CompiledStatement {
    fn is_static(&self) -> bool {
        self.path.iter().all(|step| matches!(step.step, FilterStep::Static(_) | FilterStep::Attribute))
            && self.arguments.iter().all(|argument| matches!(argument, Argument::Constant(_)))
    }
}

// =============================================================================
// Compilation
// =============================================================================

pub fn compile_filter(
    base: CompiledExpression,
    filter: &FilterComponent,
    location: &SourceLocation,
    ctx: &mut CompilationContext,
) -> Result<CompiledExpression> {
    let statements: Vec<FilterStatement> = match filter {
        FilterComponent::Simple {
            each,
            function,
            arguments,
        } => vec![FilterStatement {
            each: *each,
            target: Vec::new(),
            function: function.clone(),
            arguments: arguments.clone(),
            location: location.clone(),
        }],
        FilterComponent::Extended { statements } => statements.clone(),
    };

    let mut stream_arguments = Vec::new();
    let compiled = statements
        .iter()
        .map(|statement| compile_statement(statement, ctx, &mut stream_arguments))
        .collect::<Result<Vec<_>>>()?;
    let compiled = Arc::new(compiled);

    if base.as_constant().is_some_and(Value::is_undefined) {
        return Ok(Compiled::Constant(undefined_base(location)));
    }
    let foldable = base.nature() == Nature::Value && stream_arguments.is_empty() && compiled.iter().all(CompiledStatement::is_static);
    if foldable
        && let (Some(value), Some(folding)) = (base.as_constant(), ctx.folding_context())
    {
        return Ok(Compiled::Constant(apply_statements(&folding, value.clone(), &compiled, &[], location)));
    }

    let mut parts = Vec::with_capacity(stream_arguments.len() + 1);
    parts.push(base);
    parts.extend(stream_arguments);
    let location = location.clone();
    Ok(Compiled::combine_with(parts, move |ctx, values| {
        let mut values = values.into_iter();
        let base = values.next().unwrap_or_default();
        let resolved: Vec<Value> = values.collect();
        apply_statements(ctx, base, &compiled, &resolved, &location)
    }))
}

fn compile_statement(
    statement: &FilterStatement,
    ctx: &mut CompilationContext,
    stream_arguments: &mut Vec<CompiledExpression>,
) -> Result<CompiledStatement> {
    let path = statement
        .target
        .iter()
        .map(|step| compile_filter_step(step, ctx))
        .collect::<Result<Vec<_>>>()?;

    let mut arguments = Vec::with_capacity(statement.arguments.len());
    for argument in &statement.arguments {
        let compiled = ctx.relative(|ctx| compile_expression(argument, ctx))?;
        let argument = match compiled {
            Compiled::Constant(value) => Argument::Constant(value),
            _ if statement.each => {
                return Err(CompileError::unsupported(
                    &statement.location,
                    "Filters applied with 'each' only accept constant arguments.",
                ));
            }
            pure @ Compiled::Pure(_) => Argument::Pure(pure),
            stream @ Compiled::Stream(_) => {
                stream_arguments.push(stream);
                Argument::Stream(stream_arguments.len() - 1)
            }
        };
        arguments.push(argument);
    }

    Ok(CompiledStatement {
        each: statement.each,
        path,
        function: ctx.resolve_name(&statement.function),
        arguments,
        location: statement.location.clone(),
    })
}

fn compile_filter_step(step: &Step, ctx: &mut CompilationContext) -> Result<LocatedStep> {
    let location = step.location.clone();
    let compiled = match &step.kind {
        StepKind::Condition { condition } => {
            FilterStep::Condition(compile_synchronous(condition, &location, ctx, "Conditions in filter paths")?)
        }
        StepKind::Expression { expression } => {
            FilterStep::Computed(compile_synchronous(expression, &location, ctx, "Expression steps in filter paths")?)
        }
        StepKind::Attribute { .. } => FilterStep::Attribute,
        other => FilterStep::Static(static_step_of(other, &location)?),
    };
    Ok(LocatedStep {
        step: compiled,
        location,
    })
}

// =============================================================================
// Evaluation
// =============================================================================

fn undefined_base(location: &SourceLocation) -> Value {
    Value::error_at(location, "Filters cannot be applied to undefined values.")
}

fn apply_statements(
    ctx: &EvaluationContext,
    value: Value,
    statements: &[CompiledStatement],
    resolved: &[Value],
    location: &SourceLocation,
) -> Value {
    if let Some(error) = resolved.iter().find(|value| value.is_error()) {
        return error.clone();
    }
    if value.is_undefined() {
        return undefined_base(location);
    }
    let mut current = value;
    for statement in statements {
        if current.is_error() {
            return current;
        }
        let mut apply = |target: Value, location: Value| apply_function(ctx, statement, target, location, resolved);
        current = rebuild(ctx, current, &statement.path, Value::UNDEFINED, &mut apply, 0);
    }
    current
}

fn apply_function(
    ctx: &EvaluationContext,
    statement: &CompiledStatement,
    target: Value,
    location: Value,
    resolved: &[Value],
) -> Value {
    if !statement.each {
        return call(ctx, statement, target, location, resolved);
    }
    let Some(items) = target.as_array() else {
        return Value::error_at(
            &statement.location,
            format!("Filters applied with 'each' expect an array, but got {}.", target.type_name()),
        );
    };
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let result = call(ctx, statement, item.clone(), Value::number(index as f64), resolved);
        if result.is_error() {
            return result;
        }
        if !result.is_undefined() {
            results.push(result);
        }
    }
    Value::array(results).merge_metadata(target.metadata())
}

fn call(
    ctx: &EvaluationContext,
    statement: &CompiledStatement,
    target: Value,
    location: Value,
    resolved: &[Value],
) -> Value {
    let mut arguments = Vec::with_capacity(statement.arguments.len() + 1);
    arguments.push(target.clone());
    for argument in &statement.arguments {
        arguments.push(match argument {
            Argument::Constant(value) => value.clone(),
            Argument::Pure(expression) => steps::evaluate_relative(ctx, expression, &target, location.clone()),
            Argument::Stream(index) => resolved.get(*index).cloned().unwrap_or_default(),
        });
    }
    call_function(ctx, &statement.function, arguments, &statement.location)
}

type Apply<'a> = dyn FnMut(Value, Value) -> Value + 'a;

/// Rebuilds `value` with `apply` run at every location `path` selects.
fn rebuild(
    ctx: &EvaluationContext,
    value: Value,
    path: &[LocatedStep],
    location: Value,
    apply: &mut Apply<'_>,
    depth: usize,
) -> Value {
    let Some((head, rest)) = path.split_first() else {
        return apply(value, location);
    };
    if value.is_error() {
        return value;
    }
    if depth > MAX_RECURSION_DEPTH {
        return Value::error_at(
            &head.location,
            format!("Filter exceeded the maximum depth of {MAX_RECURSION_DEPTH}."),
        );
    }
    match &head.step {
        FilterStep::Static(step) => rebuild_static(ctx, value, step, &head.location, rest, apply, depth),
        FilterStep::Computed(selector) => {
            let selector = steps::evaluate_relative(ctx, selector, &value, location);
            match steps::computed_step(&selector, &head.location) {
                Ok(step) => rebuild_static(ctx, value, &step, &head.location, rest, apply, depth),
                Err(error) => error,
            }
        }
        FilterStep::Condition(condition) => {
            let holds = |member: &Value, position: Value| -> std::result::Result<bool, Value> {
                let result = steps::evaluate_relative(ctx, condition, member, position);
                match result.as_bool() {
                    Some(b) => Ok(b),
                    None if result.is_error() => Err(result),
                    None => Err(Value::error_at(
                        &head.location,
                        format!("Condition step expects a boolean, but got {}.", result.type_name()),
                    )),
                }
            };
            match value.kind() {
                ValueKind::Array(items) => {
                    let mut selected = Vec::new();
                    for (index, item) in items.iter().enumerate() {
                        match holds(item, Value::number(index as f64)) {
                            Ok(true) => selected.push(index),
                            Ok(false) => {}
                            Err(error) => return error,
                        }
                    }
                    rebuild_elements(ctx, &value, &selected, rest, apply, depth)
                }
                ValueKind::Object(entries) => {
                    let mut selected = Vec::new();
                    for (key, item) in entries.iter() {
                        match holds(item, Value::text(key.as_str())) {
                            Ok(true) => selected.push(key.clone()),
                            Ok(false) => {}
                            Err(error) => return error,
                        }
                    }
                    rebuild_fields(ctx, &value, &selected, rest, apply, depth)
                }
                _ => match holds(&value, location.clone()) {
                    Ok(true) => rebuild(ctx, value, rest, location, apply, depth + 1),
                    Ok(false) => value,
                    Err(error) => error,
                },
            }
        }
        FilterStep::Attribute => Value::error_at(
            &head.location,
            "Attribute finders are not allowed in filter paths.",
        ),
    }
}

fn rebuild_static(
    ctx: &EvaluationContext,
    value: Value,
    step: &StaticStep,
    location: &SourceLocation,
    rest: &[LocatedStep],
    apply: &mut Apply<'_>,
    depth: usize,
) -> Value {
    let type_error = |expected: &str, value: &Value| {
        Value::error_at(
            location,
            format!("Filter step expects {expected}, but got {}.", value.type_name()),
        )
    };
    match step {
        StaticStep::Key(key) => match value.kind() {
            ValueKind::Object(entries) => {
                if !entries.contains_key(key) {
                    return Value::error_at(location, format!("Field '{key}' not found in object."));
                }
                rebuild_fields(ctx, &value, std::slice::from_ref(key), rest, apply, depth)
            }
            ValueKind::Array(items) => {
                let mut results = Vec::with_capacity(items.len());
                for item in items.iter() {
                    if item.as_object().is_none() {
                        return type_error("object elements", item);
                    }
                    let result = rebuild_static(ctx, item.clone(), step, location, rest, apply, depth + 1);
                    if result.is_error() {
                        return result;
                    }
                    results.push(result);
                }
                Value::array(results).merge_metadata(value.metadata())
            }
            ValueKind::Undefined => value,
            _ => type_error("an object", &value),
        },
        StaticStep::Wildcard => match value.kind() {
            ValueKind::Object(entries) => {
                let selected: Vec<String> = entries.keys().cloned().collect();
                rebuild_fields(ctx, &value, &selected, rest, apply, depth)
            }
            ValueKind::Array(items) => {
                let selected: Vec<usize> = (0..items.len()).collect();
                rebuild_elements(ctx, &value, &selected, rest, apply, depth)
            }
            _ => type_error("an array or object", &value),
        },
        StaticStep::Index(index) => match value.as_array() {
            Some(items) => match steps::normalize_index(*index, items.len()) {
                Some(position) => rebuild_elements(ctx, &value, &[position], rest, apply, depth),
                None => Value::error_at(
                    location,
                    format!("Index {index} out of bounds for array of size {}.", items.len()),
                ),
            },
            None => type_error("an array", &value),
        },
        StaticStep::Slice { from, to, step } => match value.as_array() {
            Some(items) => match steps::slice_indices(items.len(), *from, *to, *step) {
                Ok(selected) => rebuild_elements(ctx, &value, &selected, rest, apply, depth),
                Err(message) => Value::error_at(location, message),
            },
            None => type_error("an array", &value),
        },
        StaticStep::IndexUnion(indices) => match value.as_array() {
            Some(items) => {
                let selected = steps::union_indices(indices, items.len());
                rebuild_elements(ctx, &value, &selected, rest, apply, depth)
            }
            None => type_error("an array", &value),
        },
        StaticStep::AttributeUnion(keys) => match value.as_object() {
            Some(entries) => {
                let selected: Vec<String> = entries.keys().filter(|k| keys.contains(*k)).cloned().collect();
                rebuild_fields(ctx, &value, &selected, rest, apply, depth)
            }
            None => type_error("an object", &value),
        },
        StaticStep::RecursiveKey(_) | StaticStep::RecursiveWildcard | StaticStep::RecursiveIndex(_) => {
            rebuild_recursive(ctx, value, step, location, rest, apply, depth)
        }
    }
}

/// Descends through all containers. A selected member is handed to the rest
/// of the path; for the recursive wildcard its own descendants are rebuilt
/// first.
fn rebuild_recursive(
    ctx: &EvaluationContext,
    value: Value,
    step: &StaticStep,
    location: &SourceLocation,
    rest: &[LocatedStep],
    apply: &mut Apply<'_>,
    depth: usize,
) -> Value {
    if depth > MAX_RECURSION_DEPTH {
        return Value::error_at(
            location,
            format!("Recursive descent exceeded the maximum depth of {MAX_RECURSION_DEPTH}."),
        );
    }
    let metadata = value.metadata().clone();
    match value.kind() {
        ValueKind::Object(entries) => {
            let mut rebuilt = ObjectMap::with_capacity(entries.len());
            for (key, member) in entries.iter() {
                let result = match step {
                    StaticStep::RecursiveKey(wanted) if wanted == key => {
                        rebuild(ctx, member.clone(), rest, Value::text(key.as_str()), apply, depth + 1)
                    }
                    StaticStep::RecursiveWildcard => {
                        let inner = rebuild_recursive(ctx, member.clone(), step, location, rest, apply, depth + 1);
                        if inner.is_error() {
                            return inner;
                        }
                        rebuild(ctx, inner, rest, Value::text(key.as_str()), apply, depth + 1)
                    }
                    _ => rebuild_recursive(ctx, member.clone(), step, location, rest, apply, depth + 1),
                };
                if result.is_error() {
                    return result;
                }
                if !result.is_undefined() {
                    rebuilt.insert(key.clone(), result);
                }
            }
            Value::object(rebuilt).with_metadata(metadata)
        }
        ValueKind::Array(items) => {
            let target = match step {
                StaticStep::RecursiveIndex(index) => steps::normalize_index(*index, items.len()),
                _ => None,
            };
            let mut rebuilt = Vec::with_capacity(items.len());
            for (position, member) in items.iter().enumerate() {
                let result = if target == Some(position) {
                    rebuild(ctx, member.clone(), rest, Value::number(position as f64), apply, depth + 1)
                } else if matches!(step, StaticStep::RecursiveWildcard) {
                    let inner = rebuild_recursive(ctx, member.clone(), step, location, rest, apply, depth + 1);
                    if inner.is_error() {
                        return inner;
                    }
                    rebuild(ctx, inner, rest, Value::number(position as f64), apply, depth + 1)
                } else {
                    rebuild_recursive(ctx, member.clone(), step, location, rest, apply, depth + 1)
                };
                if result.is_error() {
                    return result;
                }
                if !result.is_undefined() {
                    rebuilt.push(result);
                }
            }
            Value::array(rebuilt).with_metadata(metadata)
        }
        _ => value,
    }
}

/// Rebuilds the selected fields of an object, keeping field order.
fn rebuild_fields(
    ctx: &EvaluationContext,
    value: &Value,
    selected: &[String],
    rest: &[LocatedStep],
    apply: &mut Apply<'_>,
    depth: usize,
) -> Value {
    let Some(entries) = value.as_object() else {
        return value.clone();
    };
    let mut rebuilt = ObjectMap::with_capacity(entries.len());
    for (key, member) in entries.iter() {
        if !selected.contains(key) {
            rebuilt.insert(key.clone(), member.clone());
            continue;
        }
        let result = rebuild(ctx, member.clone(), rest, Value::text(key.as_str()), apply, depth + 1);
        if result.is_error() {
            return result;
        }
        if !result.is_undefined() {
            rebuilt.insert(key.clone(), result);
        }
    }
    Value::object(rebuilt).with_metadata(value.metadata().clone())
}

/// Rebuilds the selected elements of an array, keeping element order.
fn rebuild_elements(
    ctx: &EvaluationContext,
    value: &Value,
    selected: &[usize],
    rest: &[LocatedStep],
    apply: &mut Apply<'_>,
    depth: usize,
) -> Value {
    let Some(items) = value.as_array() else {
        return value.clone();
    };
    let mut rebuilt = Vec::with_capacity(items.len());
    for (position, member) in items.iter().enumerate() {
        if !selected.contains(&position) {
            rebuilt.push(member.clone());
            continue;
        }
        let result = rebuild(ctx, member.clone(), rest, Value::number(position as f64), apply, depth + 1);
        if result.is_error() {
            return result;
        }
        if !result.is_undefined() {
            rebuilt.push(result);
        }
    }
    Value::array(rebuilt).with_metadata(value.metadata().clone())
}

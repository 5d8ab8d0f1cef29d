//! Path navigation.
//!
//! Selection semantics of the path steps, shared by plain path expressions
//! and (through [`StaticStep`] and the index helpers) by the filter compiler.

use sapl_core::{CompiledExpression, EvaluationContext, SourceLocation, Value, ValueKind};

/// Bound on nesting depth for the recursive steps.
pub const MAX_RECURSION_DEPTH: usize = 500;

/// Steps whose selection depends only on the value being navigated.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticStep {
    Key(String),
    Wildcard,
    Index(i64),
    Slice {
        from: Option<i64>,
        to: Option<i64>,
        step: Option<i64>,
    },
    IndexUnion(Vec<i64>),
    AttributeUnion(Vec<String>),
    RecursiveKey(String),
    RecursiveWildcard,
    RecursiveIndex(i64),
}

/// Applies one static step. Errors propagate, `Undefined` stays `Undefined`.
pub fn navigate(value: &Value, step: &StaticStep, location: &SourceLocation) -> Value {
    if value.is_error() || value.is_undefined() {
        return value.clone();
    }
    let selected = match step {
        StaticStep::Key(key) => select_key(value, key),
        StaticStep::Wildcard => match value.kind() {
            ValueKind::Array(_) => value.clone(),
            ValueKind::Object(entries) => Value::array(entries.values().cloned().collect()),
            _ => Value::error_at(
                location,
                format!("Wildcard step expects an array or object, but got {}.", value.type_name()),
            ),
        },
        StaticStep::Index(index) => match value.as_array() {
            Some(items) => match normalize_index(*index, items.len()) {
                Some(position) => items[position].clone(),
                None => Value::error_at(
                    location,
                    format!("Index {index} out of bounds for array of size {}.", items.len()),
                ),
            },
            None => Value::error_at(
                location,
                format!("Index step expects an array, but got {}.", value.type_name()),
            ),
        },
        StaticStep::Slice { from, to, step } => match value.as_array() {
            Some(items) => match slice_indices(items.len(), *from, *to, *step) {
                Ok(indices) => Value::array(indices.into_iter().map(|i| items[i].clone()).collect()),
                Err(message) => Value::error_at(location, message),
            },
            None => Value::error_at(
                location,
                format!("Slice step expects an array, but got {}.", value.type_name()),
            ),
        },
        StaticStep::IndexUnion(indices) => match value.as_array() {
            Some(items) => Value::array(
                union_indices(indices, items.len())
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect(),
            ),
            None => Value::error_at(
                location,
                format!("Index union expects an array, but got {}.", value.type_name()),
            ),
        },
        StaticStep::AttributeUnion(keys) => match value.as_object() {
            Some(entries) => Value::array(keys.iter().filter_map(|key| entries.get(key).cloned()).collect()),
            None => Value::error_at(
                location,
                format!("Attribute union expects an object, but got {}.", value.type_name()),
            ),
        },
        StaticStep::RecursiveKey(key) => collect_recursive(value, location, &mut |node, out| {
            if let Some(found) = node.get(key) {
                out.push(found.clone());
            }
        }),
        StaticStep::RecursiveWildcard => collect_recursive(value, location, &mut |node, out| match node.kind() {
            ValueKind::Array(items) => out.extend(items.iter().cloned()),
            ValueKind::Object(entries) => out.extend(entries.values().cloned()),
            _ => {}
        }),
        StaticStep::RecursiveIndex(index) => collect_recursive(value, location, &mut |node, out| {
            if let Some(items) = node.as_array()
                && let Some(position) = normalize_index(*index, items.len())
            {
                out.push(items[position].clone());
            }
        }),
    };
    selected.merge_metadata(value.metadata())
}

/// Key access: missing keys and scalars yield `Undefined`; arrays project
/// the key over their object elements.
fn select_key(value: &Value, key: &str) -> Value {
    match value.kind() {
        ValueKind::Object(entries) => entries.get(key).cloned().unwrap_or_default(),
        ValueKind::Array(items) => Value::array(
            items
                .iter()
                .filter_map(|item| item.get(key).cloned())
                .collect(),
        ),
        _ => Value::UNDEFINED,
    }
}

/// Pre-order walk handing every container to `visit`.
fn collect_recursive(
    value: &Value,
    location: &SourceLocation,
    visit: &mut dyn FnMut(&Value, &mut Vec<Value>),
) -> Value {
    fn walk(
        node: &Value,
        depth: usize,
        visit: &mut dyn FnMut(&Value, &mut Vec<Value>),
        out: &mut Vec<Value>,
    ) -> bool {
        if depth > MAX_RECURSION_DEPTH {
            return false;
        }
        visit(node, out);
        let children: Vec<&Value> = match node.kind() {
            ValueKind::Array(items) => items.iter().collect(),
            ValueKind::Object(entries) => entries.values().collect(),
            _ => return true,
        };
        children.into_iter().all(|child| walk(child, depth + 1, visit, out))
    }

    let mut out = Vec::new();
    if walk(value, 0, visit, &mut out) {
        Value::array(out)
    } else {
        Value::error_at(
            location,
            format!("Recursive descent exceeded the maximum depth of {MAX_RECURSION_DEPTH}."),
        )
    }
}

// =============================================================================
// Index helpers
// =============================================================================

/// Negative indices count from the end.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let position = if index < 0 { index + len } else { index };
    if (0..len).contains(&position) {
        usize::try_from(position).ok()
    } else {
        None
    }
}

/// Selected positions of a slice, in selection order.
pub fn slice_indices(
    len: usize,
    from: Option<i64>,
    to: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, String> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err("Slice step must not be zero.".to_string());
    }
    let len = i64::try_from(len).map_err(|_| "Array too large to slice.".to_string())?;
    let resolve = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut indices = Vec::new();
    if step > 0 {
        let start = resolve(from.unwrap_or(0), 0, len);
        let stop = resolve(to.unwrap_or(len), 0, len);
        let mut i = start;
        while i < stop {
            indices.push(i);
            let Some(next) = i.checked_add(step) else {
                break;
            };
            i = next;
        }
    } else {
        let start = from.map_or(len - 1, |f| resolve(f, -1, len - 1));
        let stop = to.map_or(-1, |t| resolve(t, -1, len - 1));
        let mut i = start;
        while i > stop {
            indices.push(i);
            let Some(next) = i.checked_add(step) else {
                break;
            };
            i = next;
        }
    }
    Ok(indices.into_iter().filter_map(|i| usize::try_from(i).ok()).collect())
}

/// Normalized, deduplicated positions of an index union. Out-of-range
/// indices are ignored.
pub fn union_indices(indices: &[i64], len: usize) -> Vec<usize> {
    let mut positions = Vec::new();
    for index in indices {
        if let Some(position) = normalize_index(*index, len)
            && !positions.contains(&position)
        {
            positions.push(position);
        }
    }
    positions
}

// =============================================================================
// Dynamic steps
// =============================================================================

/// Evaluates a non-streaming expression with `@` and `#` bound.
pub fn evaluate_relative(
    ctx: &EvaluationContext,
    expression: &CompiledExpression,
    value: &Value,
    location: Value,
) -> Value {
    let relative = ctx.with_relative(value.clone(), location);
    expression.evaluate(&relative).unwrap_or_else(|| {
        Value::error("Streaming expression evaluated in a synchronous position.")
    })
}

/// Condition step `[?(condition)]`: keeps the elements (arrays) or field
/// values (objects) for which the condition holds. A scalar is kept or
/// dropped as a whole.
pub fn select_where(
    ctx: &EvaluationContext,
    value: &Value,
    condition: &CompiledExpression,
    location: &SourceLocation,
) -> Value {
    if value.is_error() || value.is_undefined() {
        return value.clone();
    }
    let holds = |element: &Value, position: Value| -> Result<bool, Value> {
        let result = evaluate_relative(ctx, condition, element, position);
        match result.as_bool() {
            Some(b) => Ok(b),
            None if result.is_error() => Err(result),
            None => Err(Value::error_at(
                location,
                format!("Condition step expects a boolean, but got {}.", result.type_name()),
            )),
        }
    };
    let selected = match value.kind() {
        ValueKind::Array(items) => {
            let mut kept = Vec::new();
            for (index, item) in items.iter().enumerate() {
                match holds(item, Value::number(index as f64)) {
                    Ok(true) => kept.push(item.clone()),
                    Ok(false) => {}
                    Err(error) => return error,
                }
            }
            Value::array(kept)
        }
        ValueKind::Object(entries) => {
            let mut kept = Vec::new();
            for (key, item) in entries.iter() {
                match holds(item, Value::text(key.as_str())) {
                    Ok(true) => kept.push(item.clone()),
                    Ok(false) => {}
                    Err(error) => return error,
                }
            }
            Value::array(kept)
        }
        _ => match holds(value, Value::UNDEFINED) {
            Ok(true) => value.clone(),
            Ok(false) => Value::UNDEFINED,
            Err(error) => return error,
        },
    };
    selected.merge_metadata(value.metadata())
}

/// Expression step `[(expression)]`: a number indexes, a text selects a key.
pub fn select_computed(
    ctx: &EvaluationContext,
    value: &Value,
    expression: &CompiledExpression,
    location: &SourceLocation,
) -> Value {
    if value.is_error() {
        return value.clone();
    }
    let selector = evaluate_relative(ctx, expression, value, Value::UNDEFINED);
    match computed_step(&selector, location) {
        Ok(step) => navigate(value, &step, location),
        Err(error) => error,
    }
}

/// Static step described by a computed selector.
pub fn computed_step(selector: &Value, location: &SourceLocation) -> Result<StaticStep, Value> {
    if selector.is_error() {
        return Err(selector.clone());
    }
    if let Some(index) = selector.as_integer() {
        return Ok(StaticStep::Index(index));
    }
    if let Some(key) = selector.as_text() {
        return Ok(StaticStep::Key(key.to_string()));
    }
    Err(Value::error_at(
        location,
        format!(
            "Expression step expects an integer or text, but got {}.",
            selector.type_name()
        ),
    ))
}

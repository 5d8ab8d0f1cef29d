//! Value-level semantics of the unary and binary operators.
//!
//! Every function here is total: type mismatches become error values at the
//! operator's location, and an error operand propagates unchanged (left
//! operand first). Results carry the merged metadata of their operands.

use regex::Regex;
use sapl_core::ast::{BinaryOperator, UnaryOperator};
use sapl_core::{SourceLocation, Value, ValueKind};

pub fn unary(operator: UnaryOperator, operand: Value, location: &SourceLocation) -> Value {
    if operand.is_error() {
        return operand;
    }
    let metadata = operand.metadata().clone();
    let result = match (operator, operand.kind()) {
        (UnaryOperator::Not, ValueKind::Boolean(b)) => Value::boolean(!b),
        (UnaryOperator::Negate, ValueKind::Number(n)) => Value::number(-n),
        (UnaryOperator::Plus, ValueKind::Number(n)) => Value::number(*n),
        (UnaryOperator::Not, _) => type_error(location, "Logical negation", "boolean", &operand),
        (_, _) => type_error(location, "Arithmetic sign", "number", &operand),
    };
    result.merge_metadata(&metadata)
}

/// Eager binary operators. Lazy `&&` and `||` are compiled separately.
pub fn binary(operator: BinaryOperator, left: Value, right: Value, location: &SourceLocation) -> Value {
    if left.is_error() {
        return left;
    }
    if right.is_error() {
        return right;
    }
    let metadata = left.metadata().merge(right.metadata());
    let result = match operator {
        BinaryOperator::Or | BinaryOperator::EagerOr => boolean_op(operator, &left, &right, location, |a, b| a || b),
        BinaryOperator::And | BinaryOperator::EagerAnd => {
            boolean_op(operator, &left, &right, location, |a, b| a && b)
        }
        BinaryOperator::Xor => boolean_op(operator, &left, &right, location, |a, b| a ^ b),
        BinaryOperator::Equal => Value::boolean(left == right),
        BinaryOperator::NotEqual => Value::boolean(left != right),
        BinaryOperator::Regex => match right.as_text() {
            Some(pattern) => match Regex::new(pattern) {
                Ok(regex) => regex_match(&regex, &left),
                Err(e) => Value::error_at(location, format!("Invalid regular expression '{pattern}': {e}")),
            },
            None => type_error(location, "Regular expression match", "text pattern", &right),
        },
        BinaryOperator::Less => compare(operator, &left, &right, location, |a, b| a < b),
        BinaryOperator::LessOrEqual => compare(operator, &left, &right, location, |a, b| a <= b),
        BinaryOperator::Greater => compare(operator, &left, &right, location, |a, b| a > b),
        BinaryOperator::GreaterOrEqual => compare(operator, &left, &right, location, |a, b| a >= b),
        BinaryOperator::In => element_of(&left, &right, location),
        BinaryOperator::Add => add(&left, &right, location),
        BinaryOperator::Subtract => arithmetic(operator, &left, &right, location, |a, b| Ok(a - b)),
        BinaryOperator::Multiply => arithmetic(operator, &left, &right, location, |a, b| Ok(a * b)),
        BinaryOperator::Divide => arithmetic(operator, &left, &right, location, |a, b| {
            if b == 0.0 { Err("Division by zero.") } else { Ok(a / b) }
        }),
        BinaryOperator::Modulo => arithmetic(operator, &left, &right, location, |a, b| {
            if b == 0.0 { Err("Division by zero.") } else { Ok(a % b) }
        }),
    };
    result.merge_metadata(&metadata)
}

/// Regex match against a pattern compiled ahead of time.
pub fn regex_match(regex: &Regex, value: &Value) -> Value {
    match value.as_text() {
        Some(text) => Value::boolean(regex.is_match(text)),
        None => Value::FALSE,
    }
}

/// Operand check shared by the lazy operators.
pub fn require_boolean(value: Value, operator: BinaryOperator, location: &SourceLocation) -> Value {
    if value.is_error() || value.as_bool().is_some() {
        return value;
    }
    let metadata = value.metadata().clone();
    type_error(location, &format!("Operator '{}'", operator.symbol()), "boolean", &value).merge_metadata(&metadata)
}

fn boolean_op(
    operator: BinaryOperator,
    left: &Value,
    right: &Value,
    location: &SourceLocation,
    op: impl Fn(bool, bool) -> bool,
) -> Value {
    match (left.as_bool(), right.as_bool()) {
        (Some(a), Some(b)) => Value::boolean(op(a, b)),
        (None, _) => type_error(location, &format!("Operator '{}'", operator.symbol()), "boolean", left),
        (_, None) => type_error(location, &format!("Operator '{}'", operator.symbol()), "boolean", right),
    }
}

fn compare(
    operator: BinaryOperator,
    left: &Value,
    right: &Value,
    location: &SourceLocation,
    op: impl Fn(f64, f64) -> bool,
) -> Value {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Value::boolean(op(a, b)),
        (None, _) => type_error(location, &format!("Operator '{}'", operator.symbol()), "number", left),
        (_, None) => type_error(location, &format!("Operator '{}'", operator.symbol()), "number", right),
    }
}

fn arithmetic(
    operator: BinaryOperator,
    left: &Value,
    right: &Value,
    location: &SourceLocation,
    op: impl Fn(f64, f64) -> Result<f64, &'static str>,
) -> Value {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => match op(a, b) {
            Ok(result) => Value::number(result),
            Err(message) => Value::error_at(location, message),
        },
        (None, _) => type_error(location, &format!("Operator '{}'", operator.symbol()), "number", left),
        (_, None) => type_error(location, &format!("Operator '{}'", operator.symbol()), "number", right),
    }
}

/// Numeric addition, or concatenation as soon as one side is text.
fn add(left: &Value, right: &Value, location: &SourceLocation) -> Value {
    match (left.kind(), right.kind()) {
        (ValueKind::Number(a), ValueKind::Number(b)) => Value::number(a + b),
        (ValueKind::Text(a), _) => Value::text(format!("{a}{}", text_of(right))),
        (_, ValueKind::Text(b)) => Value::text(format!("{}{b}", text_of(left))),
        _ => type_error(location, "Operator '+'", "number or text", if left.as_number().is_none() { left } else { right }),
    }
}

fn text_of(value: &Value) -> String {
    match value.as_text() {
        Some(text) => text.to_string(),
        None => value.to_string(),
    }
}

fn element_of(needle: &Value, haystack: &Value, location: &SourceLocation) -> Value {
    match haystack.kind() {
        ValueKind::Array(items) => Value::boolean(items.iter().any(|item| item == needle)),
        ValueKind::Object(entries) => Value::boolean(entries.values().any(|item| item == needle)),
        ValueKind::Text(text) => match needle.as_text() {
            Some(fragment) => Value::boolean(text.contains(fragment)),
            None => Value::FALSE,
        },
        _ => type_error(location, "Operator 'in'", "array, object or text", haystack),
    }
}

fn type_error(location: &SourceLocation, what: &str, expected: &str, actual: &Value) -> Value {
    Value::error_at(
        location,
        format!("{what} expects {expected}, but got {}.", actual.type_name()),
    )
}

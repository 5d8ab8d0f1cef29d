//! Native function library.

use std::collections::HashMap;
use std::sync::Arc;

use sapl_core::{FunctionBroker, Value, ValueKind};

pub type NativeFunction = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

struct Registered {
    min_arity: usize,
    max_arity: usize,
    function: NativeFunction,
}

/// Function broker backed by a fixed registry of native functions.
pub struct StandardFunctionBroker {
    functions: HashMap<String, Registered>,
}

impl Default for StandardFunctionBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardFunctionBroker {
    /// Broker with the built-in `filter` and `standard` libraries.
    pub fn new() -> Self {
        Self::empty()
            .with_function("filter.remove", 1, 1, |_| Value::UNDEFINED)
            .with_function("filter.blacken", 1, 4, blacken)
            .with_function("filter.replace", 2, 2, |args| args[1].clone())
            .with_function("standard.length", 1, 1, |args| length(&args[0]))
            .with_function("standard.toString", 1, 1, |args| to_string(&args[0]))
    }

    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registers `function` under its fully qualified name. Calls outside
    /// `min_arity..=max_arity` never reach the function.
    #[must_use]
    pub fn with_function<F>(mut self, name: impl Into<String>, min_arity: usize, max_arity: usize, function: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(
            name.into(),
            Registered {
                min_arity,
                max_arity,
                function: Arc::new(function),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl FunctionBroker for StandardFunctionBroker {
    fn evaluate(&self, name: &str, arguments: &[Value]) -> Value {
        let Some(registered) = self.functions.get(name) else {
            return Value::error(format!("Unknown function '{name}'."));
        };
        if arguments.len() < registered.min_arity || arguments.len() > registered.max_arity {
            return Value::error(format!(
                "Function '{name}' expects {} to {} arguments, but got {}.",
                registered.min_arity,
                registered.max_arity,
                arguments.len()
            ));
        }
        (registered.function)(arguments)
    }
}

// =============================================================================
// Built-ins
// =============================================================================

/// `blacken(text, discloseLeft = 0, discloseRight = 0, replacement = "X")`
fn blacken(args: &[Value]) -> Value {
    let Some(text) = args[0].as_text() else {
        return Value::error(format!("blacken expects text, but got {}.", args[0].type_name()));
    };
    let disclose = |index: usize| -> Result<usize, Value> {
        match args.get(index) {
            None => Ok(0),
            Some(value) => value
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| Value::error("blacken expects non-negative integers to disclose.")),
        }
    };
    let (left, right) = match (disclose(1), disclose(2)) {
        (Ok(left), Ok(right)) => (left, right),
        (Err(error), _) | (_, Err(error)) => return error,
    };
    let replacement = match args.get(3) {
        None => "X",
        Some(value) => match value.as_text() {
            Some(replacement) => replacement,
            None => return Value::error("blacken expects a text replacement."),
        },
    };

    let chars: Vec<char> = text.chars().collect();
    if left + right >= chars.len() {
        return args[0].clone();
    }
    let mut result: String = chars[..left].iter().collect();
    for _ in left..chars.len() - right {
        result.push_str(replacement);
    }
    result.extend(&chars[chars.len() - right..]);
    Value::text(result)
}

fn length(value: &Value) -> Value {
    match value.kind() {
        ValueKind::Text(text) => Value::number(text.chars().count() as f64),
        ValueKind::Array(items) => Value::number(items.len() as f64),
        ValueKind::Object(entries) => Value::number(entries.len() as f64),
        _ => Value::error(format!("length expects text, array or object, but got {}.", value.type_name())),
    }
}

fn to_string(value: &Value) -> Value {
    match value.kind() {
        ValueKind::Text(_) => value.clone(),
        _ => Value::text(value.to_string()),
    }
}

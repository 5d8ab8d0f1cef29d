//! Authorization subscriptions and the decisions answering them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};
use crate::value::{ObjectMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permit => "PERMIT",
            Self::Deny => "DENY",
            Self::Indeterminate => "INDETERMINATE",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "PERMIT" => Some(Self::Permit),
            "DENY" => Some(Self::Deny),
            "INDETERMINATE" => Some(Self::Indeterminate),
            "NOT_APPLICABLE" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Authorization Subscription
// =============================================================================

/// The question asked of the decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSubscription {
    #[serde(default)]
    pub subject: Value,
    #[serde(default)]
    pub action: Value,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub environment: Value,
}

impl AuthorizationSubscription {
    pub fn new(subject: impl Into<Value>, action: impl Into<Value>, resource: impl Into<Value>) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            environment: Value::UNDEFINED,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<Value>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Looks up one of the four subscription elements by name.
    pub fn element(&self, name: &str) -> Option<&Value> {
        match name {
            "subject" => Some(&self.subject),
            "action" => Some(&self.action),
            "resource" => Some(&self.resource),
            "environment" => Some(&self.environment),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::object_from([
            ("subject", self.subject.clone()),
            ("action", self.action.clone()),
            ("resource", self.resource.clone()),
            ("environment", self.environment.clone()),
        ])
    }
}

// =============================================================================
// Authorization Decision
// =============================================================================

pub const FIELD_DECISION: &str = "decision";
pub const FIELD_OBLIGATIONS: &str = "obligations";
pub const FIELD_ADVICE: &str = "advice";
pub const FIELD_RESOURCE: &str = "resource";
pub const FIELD_ERRORS: &str = "errors";

/// The externally visible answer.
///
/// `resource` is `Undefined` unless a policy transformed the resource.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationDecision {
    pub decision: Decision,
    pub obligations: Vec<Value>,
    pub advice: Vec<Value>,
    pub resource: Value,
    pub errors: Vec<Value>,
}

impl AuthorizationDecision {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            obligations: Vec::new(),
            advice: Vec::new(),
            resource: Value::UNDEFINED,
            errors: Vec::new(),
        }
    }

    pub fn permit() -> Self {
        Self::new(Decision::Permit)
    }

    pub fn deny() -> Self {
        Self::new(Decision::Deny)
    }

    pub fn not_applicable() -> Self {
        Self::new(Decision::NotApplicable)
    }

    pub fn indeterminate() -> Self {
        Self::new(Decision::Indeterminate)
    }

    /// INDETERMINATE carrying the given error values.
    pub fn indeterminate_with(errors: Vec<Value>) -> Self {
        Self {
            errors,
            ..Self::indeterminate()
        }
    }

    #[must_use]
    pub fn with_obligations(mut self, obligations: Vec<Value>) -> Self {
        self.obligations = obligations;
        self
    }

    #[must_use]
    pub fn with_advice(mut self, advice: Vec<Value>) -> Self {
        self.advice = advice;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = resource;
        self
    }

    pub fn has_resource(&self) -> bool {
        !self.resource.is_undefined()
    }

    pub fn has_constraints(&self) -> bool {
        !self.obligations.is_empty() || !self.advice.is_empty() || self.has_resource()
    }

    /// The decision as an object value with the fixed field set.
    pub fn to_value(&self) -> Value {
        let mut entries = ObjectMap::new();
        entries.insert(FIELD_DECISION.to_string(), Value::text(self.decision.as_str()));
        entries.insert(FIELD_OBLIGATIONS.to_string(), Value::array(self.obligations.clone()));
        entries.insert(FIELD_ADVICE.to_string(), Value::array(self.advice.clone()));
        entries.insert(FIELD_RESOURCE.to_string(), self.resource.clone());
        entries.insert(FIELD_ERRORS.to_string(), Value::array(self.errors.clone()));
        Value::object(entries)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let decision = value
            .get(FIELD_DECISION)
            .and_then(Value::as_text)
            .and_then(Decision::parse)
            .ok_or_else(|| CoreError::invalid_decision(format!("missing decision in {value}")))?;
        let list = |field: &str| -> Result<Vec<Value>> {
            match value.get(field) {
                None => Ok(Vec::new()),
                Some(v) if v.is_undefined() => Ok(Vec::new()),
                Some(v) => v
                    .as_array()
                    .map(<[Value]>::to_vec)
                    .ok_or_else(|| CoreError::invalid_decision(format!("'{field}' must be an array"))),
            }
        };
        Ok(Self {
            decision,
            obligations: list(FIELD_OBLIGATIONS)?,
            advice: list(FIELD_ADVICE)?,
            resource: value.get(FIELD_RESOURCE).cloned().unwrap_or_default(),
            errors: list(FIELD_ERRORS)?,
        })
    }
}

impl fmt::Display for AuthorizationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl Serialize for AuthorizationDecision {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthorizationDecision {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_decision_serializes_with_fixed_fields() {
        let decision = AuthorizationDecision::permit()
            .with_obligations(vec![Value::text("log")])
            .with_resource(Value::object_from([("id", Value::number(7))]));
        assert_json_eq!(
            serde_json::to_value(&decision).unwrap(),
            json!({
                "decision": "PERMIT",
                "obligations": ["log"],
                "advice": [],
                "resource": {"id": 7},
                "errors": []
            })
        );
    }

    #[test]
    fn test_undefined_resource_is_omitted() {
        let json = serde_json::to_value(AuthorizationDecision::deny()).unwrap();
        assert!(json.get("resource").is_none());
    }

    #[test]
    fn test_from_value_rejects_unknown_decision() {
        let value = Value::object_from([("decision", Value::text("MAYBE"))]);
        assert!(AuthorizationDecision::from_value(&value).is_err());
    }

    #[test]
    fn test_subscription_elements_by_name() {
        let subscription = AuthorizationSubscription::new("alice", "read", "doc");
        assert_eq!(subscription.element("subject"), Some(&Value::text("alice")));
        assert_eq!(subscription.element("environment"), Some(&Value::UNDEFINED));
        assert_eq!(subscription.element("other"), None);
    }
}

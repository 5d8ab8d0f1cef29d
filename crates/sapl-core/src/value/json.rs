use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number};

use super::{ObjectMap, Value, ValueKind};

impl Value {
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::NULL,
            serde_json::Value::Bool(b) => Value::boolean(*b),
            serde_json::Value::Number(n) => Value::number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::text(s.as_str()),
            serde_json::Value::Array(values) => {
                Value::array(values.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect::<ObjectMap>(),
            ),
        }
    }

    /// JSON rendering. `Undefined` elements are dropped from containers and
    /// become `null` at the top level; errors render as `{"error": ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self.kind() {
            ValueKind::Undefined | ValueKind::Null => serde_json::Value::Null,
            ValueKind::Error(error) => {
                let mut map = Map::new();
                map.insert(
                    "error".to_string(),
                    serde_json::Value::String(error.message.clone()),
                );
                if let Some(location) = &error.location {
                    map.insert(
                        "location".to_string(),
                        serde_json::Value::String(location.to_string()),
                    );
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::Number(n) => number_to_json(*n),
            ValueKind::Text(text) => serde_json::Value::String(text.to_string()),
            ValueKind::Array(values) => serde_json::Value::Array(
                values
                    .iter()
                    .filter(|v| !v.is_undefined())
                    .map(Value::to_json)
                    .collect(),
            ),
            ValueKind::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A generated item handed to the relay by the producer.
///
/// Only `id` and `created_at` are interpreted: `id` is the identity consumers
/// deduplicate on, `created_at` orders the pull channel. Every other field is
/// carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default = "new_artifact_id", deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Artifact {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: new_artifact_id(),
            created_at: Utc::now(),
            fields,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Builds an artifact from an arbitrary JSON value.
    ///
    /// Objects keep their fields; any other value is wrapped under `"value"`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Object(_) => serde_json::from_value(value),
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                Ok(Self::new(fields))
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

fn new_artifact_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

// Producers in the wild send numeric ids as often as string ones.
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(new_artifact_id()),
        other => Err(serde::de::Error::custom(format!(
            "artifact id must be a string or number, got {other}"
        ))),
    }
}

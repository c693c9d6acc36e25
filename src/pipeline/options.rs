//! Per-call transfer options

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options for a single upload, download or removal
///
/// Serialises flat: `directory` and `name` sit next to one entry per adapter or
/// transform identity, e.g.
///
/// ```json
/// { "directory": "avatars", "name": "me.png", "checksum": { "algorithm": "sha1" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Upload directory, relative to the storage root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Upload file name; a UUIDv4 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Options scoped to one adapter or transform identity
    #[serde(flatten)]
    pub scoped: Map<String, Value>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the options passed to the adapter or transform called `identity`
    pub fn with(mut self, identity: impl Into<String>, options: Value) -> Self {
        self.scoped.insert(identity.into(), options);
        self
    }

    /// Options scoped to `identity`, or an empty object
    pub fn scoped(&self, identity: &str) -> Value {
        self.scoped
            .get(identity)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Registration options overlaid by the options scoped to `identity`
    pub(crate) fn effective(&self, identity: &str, registered: &Value) -> Value {
        overlay(registered, self.scoped.get(identity))
    }
}

/// Shallow merge: top-level keys of `overrides` replace those of `base`
///
/// A non-object override replaces `base` entirely.
pub(crate) fn overlay(base: &Value, overrides: Option<&Value>) -> Value {
    match (base, overrides) {
        (_, None) | (_, Some(Value::Null)) => match base {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        },
        (Value::Object(base), Some(Value::Object(overrides))) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Some(other)) => other.clone(),
    }
}

//! Transfer report

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome of a successful upload or download
///
/// Serialises flat, one key per transform next to the fixed fields:
///
/// ```json
/// { "location": "avatars/me.png", "adapter": "local", "transforms": ["checksum"],
///   "checksum": { "algorithm": "md5", "value": "5eb63bbbe01eeed093cb22bb8f5acdc3" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub location: String,
    /// Identity of the adapter that stored or served the data
    pub adapter: String,
    /// Transform identities in execution order
    pub transforms: Vec<String>,
    /// Transform results keyed by identity
    #[serde(flatten)]
    pub results: BTreeMap<String, Value>,
}

impl TransferReport {
    pub(crate) fn new(location: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            adapter: adapter.into(),
            transforms: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, identity: String, result: Value) {
        self.transforms.push(identity.clone());
        self.results.insert(identity, result);
    }

    /// Result reported by the transform called `identity`
    pub fn result(&self, identity: &str) -> Option<&Value> {
        self.results.get(identity)
    }

    /// Result of `identity` deserialised into `T`
    ///
    /// ```ignore
    /// let stats: Stats = report.result_as("progress")?.expect("progress ran");
    /// ```
    pub fn result_as<T: DeserializeOwned>(&self, identity: &str) -> Result<Option<T>> {
        match self.results.get(identity) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

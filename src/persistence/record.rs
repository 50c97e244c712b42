//! The persisted record format.

use serde::{Deserialize, Serialize};

/// Provenance as stored with a serialized variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSource {
    /// Name of the producing step.
    pub step: String,
    /// The step's input fingerprint at production time.
    #[serde(rename = "inputHash")]
    pub input_hash: u64,
}

/// One persisted variable value.
///
/// Field names are part of the storage format; `value` holds the
/// structured-text encoding of the typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedVariable {
    /// The run the value belongs to.
    pub run_id: String,
    /// The pipeline the value was produced under.
    pub pipeline: String,
    /// Structural hash of the owning variable set at write time.
    #[serde(rename = "structuralHash")]
    pub structural_hash: u64,
    /// Provenance, absent for externally seeded values.
    pub source: Option<StoredSource>,
    /// Wall-clock milliseconds since the epoch.
    pub timestamp: i64,
    /// The variable name.
    pub key: String,
    /// Structured-text encoding of the value.
    pub value: String,
}

impl SerializedVariable {
    /// Key into the latest map: `run|pipeline|variable`.
    #[must_use]
    pub fn latest_key(&self) -> String {
        latest_key(&self.run_id, &self.pipeline, &self.key)
    }

    /// Key into the historical map: `run|pipeline|variable|timestamp`.
    #[must_use]
    pub fn historical_key(&self) -> String {
        format!(
            "{}{}",
            historical_prefix(&self.run_id, &self.pipeline, &self.key),
            self.timestamp
        )
    }
}

/// Builds a latest-map key.
#[must_use]
pub fn latest_key(run_id: &str, pipeline: &str, variable: &str) -> String {
    format!("{run_id}|{pipeline}|{variable}")
}

/// Builds the historical-map prefix shared by all timestamps of one
/// variable.
#[must_use]
pub fn historical_prefix(run_id: &str, pipeline: &str, variable: &str) -> String {
    format!("{run_id}|{pipeline}|{variable}|")
}

//! Type-erased value envelopes and provenance tags.

use crate::errors::FlowstateError;
use crate::hashing;
use crate::variables::key::{FlowValue, TypeTag};
use serde_json::Value;

/// Provenance of a context entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Produced by a step, fingerprinted over its consumed values.
    Step {
        /// The producing step's name.
        step: String,
        /// The step's input hash at production time.
        input_hash: u64,
    },
}

impl ValueSource {
    /// Creates a step-source tag.
    #[must_use]
    pub fn step(step: impl Into<String>, input_hash: u64) -> Self {
        Self::Step {
            step: step.into(),
            input_hash,
        }
    }
}

/// A value stored in the context with its compile-time type erased.
///
/// The envelope carries the canonical JSON form plus the type tag
/// captured at the declaration site; typed reads verify the tag before
/// deserializing.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextValue {
    json: Value,
    tag: TypeTag,
}

impl ContextValue {
    /// Erases a typed value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value does not encode as JSON.
    pub fn encode<T: FlowValue>(value: &T) -> Result<Self, FlowstateError> {
        let json = serde_json::to_value(value)
            .map_err(|e| FlowstateError::Serialization(e.to_string()))?;
        Ok(Self {
            json,
            tag: TypeTag::of::<T>(),
        })
    }

    /// Recovers the typed value, verifying the tag first.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when `T` is not the declared type, or
    /// `Serialization` when the stored JSON no longer decodes as `T`.
    pub fn decode<T: FlowValue>(&self, key_name: &str) -> Result<T, FlowstateError> {
        let expected = TypeTag::of::<T>();
        if self.tag != expected {
            return Err(FlowstateError::TypeMismatch {
                key: key_name.to_string(),
                expected: expected.name().to_string(),
                actual: self.tag.name().to_string(),
            });
        }
        serde_json::from_value(self.json.clone())
            .map_err(|e| FlowstateError::Serialization(e.to_string()))
    }

    /// Returns the erased JSON form.
    #[must_use]
    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Returns the captured type tag.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Renders the canonical structured-text form used for hashing
    /// and persistence.
    #[must_use]
    pub fn canonical(&self) -> String {
        hashing::canonical_json(&self.json)
    }

    /// Fingerprints the value.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        hashing::hash_value(&self.json)
    }

    pub(crate) fn from_parts(json: Value, tag: TypeTag) -> Self {
        Self { json, tag }
    }
}

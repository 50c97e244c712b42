//! The immutable context layer.

use crate::context::value::ContextValue;
use crate::context::ContextRead;
use crate::errors::FlowstateError;
use crate::variables::key::{ErasedKey, FlowValue, Key};
use std::collections::{BTreeMap, HashMap};

/// An immutable `{key -> value}` snapshot.
///
/// Built from user seeds or by freezing a mutable view; reads only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: HashMap<ErasedKey, ContextValue>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context extended with one typed value.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value does not encode.
    pub fn with<T: FlowValue>(mut self, key: &Key<T>, value: &T) -> Result<Self, FlowstateError> {
        self.values.insert(key.erased(), ContextValue::encode(value)?);
        Ok(self)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read-only snapshot keyed by variable name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.name().to_string(), v.json().clone()))
            .collect()
    }

    pub(crate) fn from_values(values: HashMap<ErasedKey, ContextValue>) -> Self {
        Self { values }
    }

    pub(crate) fn values(&self) -> &HashMap<ErasedKey, ContextValue> {
        &self.values
    }
}

impl ContextRead for Context {
    fn value(&self, key: &ErasedKey) -> Option<&ContextValue> {
        self.values.get(key)
    }

    fn entry_keys(&self) -> Vec<ErasedKey> {
        self.values.keys().cloned().collect()
    }
}

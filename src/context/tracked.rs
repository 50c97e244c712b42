//! The source-tracking context layer.

use crate::context::plain::Context;
use crate::context::value::{ContextValue, ValueSource};
use crate::context::ContextRead;
use crate::errors::FlowstateError;
use crate::pipeline::Pipeline;
use crate::variables::key::{ErasedKey, FlowValue, Key};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TrackedEntry {
    pub(crate) value: ContextValue,
    pub(crate) source: Option<ValueSource>,
}

/// A mutable `{key -> (value, source)}` map.
///
/// Every entry carries optional provenance: which step produced it and
/// the fingerprint of that step's inputs at the time. `None` marks
/// externally seeded values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTrackedContext {
    entries: HashMap<ErasedKey, TrackedEntry>,
}

impl SourceTrackedContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifts a plain context; every entry is tagged as externally seeded.
    #[must_use]
    pub fn from_plain(ctx: &Context) -> Self {
        let entries = ctx
            .values()
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    TrackedEntry {
                        value: v.clone(),
                        source: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Seeds a typed value with no provenance.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value does not encode.
    pub fn insert<T: FlowValue>(&mut self, key: &Key<T>, value: &T) -> Result<(), FlowstateError> {
        self.set(key, value, None)
    }

    /// Sets a typed value with the given provenance.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value does not encode.
    pub fn set<T: FlowValue>(
        &mut self,
        key: &Key<T>,
        value: &T,
        source: Option<ValueSource>,
    ) -> Result<(), FlowstateError> {
        self.set_value(key.erased(), ContextValue::encode(value)?, source);
        Ok(())
    }

    /// Sets an already-erased value with the given provenance.
    pub fn set_value(&mut self, key: ErasedKey, value: ContextValue, source: Option<ValueSource>) {
        self.entries.insert(key, TrackedEntry { value, source });
    }

    /// Removes an entry, returning its value if present.
    pub fn remove(&mut self, key: &ErasedKey) -> Option<ContextValue> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Returns the value and provenance tracked at a key.
    #[must_use]
    pub fn get_tracked(&self, key: &ErasedKey) -> Option<(&ContextValue, Option<&ValueSource>)> {
        self.entries
            .get(key)
            .map(|e| (&e.value, e.source.as_ref()))
    }

    /// Returns the provenance tracked at a key.
    #[must_use]
    pub fn source(&self, key: &ErasedKey) -> Option<&ValueSource> {
        self.entries.get(key).and_then(|e| e.source.as_ref())
    }

    /// Drops stale step-produced values.
    ///
    /// Walks the pipeline's steps in topological order; any tracked
    /// value whose recorded input hash no longer matches the producing
    /// step's current input hash is removed. Upstream removals change
    /// downstream fingerprints, so one pass cascades through the whole
    /// dependency chain.
    ///
    /// Returns the removed keys.
    ///
    /// # Errors
    ///
    /// Returns `CyclicPipeline` when the pipeline's graph has a cycle.
    pub fn invalidate(&mut self, pipeline: &Pipeline) -> Result<Vec<ErasedKey>, FlowstateError> {
        let declared: Vec<ErasedKey> = pipeline.all_variables(true);
        let mut removed = Vec::new();

        for step in pipeline.sorted_steps()? {
            let current = step.hash_inputs(self);
            let stale: Vec<ErasedKey> = self
                .entries
                .iter()
                .filter(|&(key, entry)| {
                    declared.contains(key)
                        && matches!(
                            &entry.source,
                            Some(ValueSource::Step { step: name, input_hash })
                                if name.as_str() == step.name() && *input_hash != current
                        )
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in stale {
                debug!(step = step.name(), key = key.name(), "invalidating stale value");
                self.entries.remove(&key);
                removed.push(key);
            }
        }

        Ok(removed)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops provenance, leaving a plain context.
    #[must_use]
    pub fn to_plain(&self) -> Context {
        Context::from_values(
            self.entries
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        )
    }

    /// Read-only snapshot keyed by variable name.
    #[must_use]
    pub fn to_map(&self) -> std::collections::BTreeMap<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.name().to_string(), e.value.json().clone()))
            .collect()
    }
}

impl From<Context> for SourceTrackedContext {
    fn from(ctx: Context) -> Self {
        Self::from_plain(&ctx)
    }
}

impl ContextRead for SourceTrackedContext {
    fn value(&self, key: &ErasedKey) -> Option<&ContextValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    fn entry_keys(&self) -> Vec<ErasedKey> {
        self.entries.keys().cloned().collect()
    }
}

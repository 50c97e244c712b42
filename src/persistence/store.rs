//! The variable store: latest + historical keyed maps.

use crate::context::{ContextRead, SourceTrackedContext, ValueSource};
use crate::errors::FlowstateError;
use crate::persistence::record::{historical_prefix, latest_key, SerializedVariable, StoredSource};
use crate::pipeline::Pipeline;
use crate::utils::now_millis;
use crate::variables::key::ErasedKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Persists and restores context variables keyed by run, pipeline,
/// and variable name.
pub trait VariableStore: Send + Sync {
    /// Serializes the requested keys out of the context.
    ///
    /// Keys absent from the context and transient keys are skipped.
    /// All records of one call commit together or not at all. Returns
    /// the number of records written.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a value fails to encode.
    fn serialize_keys(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        keys: &[ErasedKey],
        ctx: &SourceTrackedContext,
    ) -> Result<usize, FlowstateError>;

    /// Serializes every key declared by the pipeline's steps.
    ///
    /// # Errors
    ///
    /// See [`VariableStore::serialize_keys`].
    fn serialize_pipeline(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        ctx: &SourceTrackedContext,
    ) -> Result<usize, FlowstateError> {
        let keys = pipeline.all_variables(true);
        self.serialize_keys(run_id, pipeline, &keys, ctx)
    }

    /// Restores stored values for the pipeline's variables on top of a
    /// seed context.
    ///
    /// Records whose structural hash differs from the current
    /// declaration are skipped with a log note. Seeded values are kept
    /// unless `overwrite` is set. The result carries each restored
    /// value's original provenance, so a subsequent run skips steps
    /// whose outputs are still valid and re-runs the rest.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when a guarded record fails to decode.
    fn load_context_for_pipeline(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        seed: &SourceTrackedContext,
        overwrite: bool,
        include_outputs: bool,
    ) -> Result<SourceTrackedContext, FlowstateError>;

    /// Returns the latest record for one variable, if any.
    fn latest(&self, run_id: &str, pipeline_id: &str, variable: &str) -> Option<SerializedVariable>;
}

#[derive(Default)]
struct StoreMaps {
    latest: BTreeMap<String, SerializedVariable>,
    historical: BTreeMap<String, SerializedVariable>,
}

/// In-memory [`VariableStore`] backed by two ordered maps.
#[derive(Default)]
pub struct InMemoryVariableStore {
    maps: RwLock<StoreMaps>,
}

impl InMemoryVariableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in the latest map.
    #[must_use]
    pub fn latest_len(&self) -> usize {
        self.maps.read().latest.len()
    }

    /// Returns the number of entries in the historical map.
    #[must_use]
    pub fn historical_len(&self) -> usize {
        self.maps.read().historical.len()
    }

    /// Every historical record for one variable, oldest first.
    #[must_use]
    pub fn history(
        &self,
        run_id: &str,
        pipeline_id: &str,
        variable: &str,
    ) -> Vec<SerializedVariable> {
        let prefix = historical_prefix(run_id, pipeline_id, variable);
        self.maps
            .read()
            .historical
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl VariableStore for InMemoryVariableStore {
    fn serialize_keys(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        keys: &[ErasedKey],
        ctx: &SourceTrackedContext,
    ) -> Result<usize, FlowstateError> {
        let structural_hash = pipeline.variables().structural_hash(false);

        // Stage every record before touching the maps so a failure
        // leaves the store untouched.
        let mut staged: Vec<SerializedVariable> = Vec::new();
        for key in keys {
            if key.is_transient() {
                debug!(key = key.name(), "not persisting transient variable");
                continue;
            }
            let Some((value, source)) = ctx.get_tracked(key) else {
                continue;
            };
            staged.push(SerializedVariable {
                run_id: run_id.to_string(),
                pipeline: pipeline.id().to_string(),
                structural_hash,
                source: source.map(|s| match s {
                    ValueSource::Step { step, input_hash } => StoredSource {
                        step: step.clone(),
                        input_hash: *input_hash,
                    },
                }),
                timestamp: 0,
                key: key.name().to_string(),
                value: value.canonical(),
            });
        }

        let mut maps = self.maps.write();
        let written = staged.len();
        for mut record in staged {
            // Historical keys must move strictly forward even when the
            // wall clock does not.
            let prefix = historical_prefix(&record.run_id, &record.pipeline, &record.key);
            let last = maps
                .historical
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(_, v)| v.timestamp)
                .max();
            let now = now_millis();
            record.timestamp = match last {
                Some(last) if now <= last => last + 1,
                _ => now,
            };

            maps.historical
                .insert(record.historical_key(), record.clone());
            maps.latest.insert(record.latest_key(), record);
        }

        Ok(written)
    }

    fn load_context_for_pipeline(
        &self,
        run_id: &str,
        pipeline: &Pipeline,
        seed: &SourceTrackedContext,
        overwrite: bool,
        include_outputs: bool,
    ) -> Result<SourceTrackedContext, FlowstateError> {
        let variables = pipeline.variables();
        let current_hash = variables.structural_hash(false);
        let mut result = seed.clone();

        for key in pipeline.all_variables(include_outputs) {
            if key.is_transient() {
                continue;
            }
            if result.exists(&key) && !overwrite {
                continue;
            }
            let Some(record) = self.latest(run_id, pipeline.id(), key.name()) else {
                continue;
            };

            if record.structural_hash != current_hash {
                let guard = FlowstateError::UnsupportedStructuralHash {
                    key: key.name().to_string(),
                    stored: record.structural_hash,
                    current: current_hash,
                };
                warn!(key = key.name(), "{guard}; skipping stored value");
                continue;
            }

            let value = variables.decode(&key, &record.value)?;
            let source = record
                .source
                .map(|s| ValueSource::step(s.step, s.input_hash));
            result.set_value(key, value, source);
        }

        Ok(result)
    }

    fn latest(&self, run_id: &str, pipeline_id: &str, variable: &str) -> Option<SerializedVariable> {
        self.maps
            .read()
            .latest
            .get(&latest_key(run_id, pipeline_id, variable))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use crate::variables::key::Key;
    use crate::variables::set::VariableSet;

    struct Fixture {
        pipeline: Pipeline,
        input: Key<String>,
        output: Key<i64>,
        scratch: Key<String>,
    }

    fn fixture() -> Fixture {
        let mut b = VariableSet::builder("math");
        let input = b.string("input");
        let output = b.int("output");
        let scratch = b.register_transient::<String>("scratch");
        let variables = b.build().unwrap();

        let pipeline = Pipeline::builder("math", variables)
            .step(
                Step::builder("produce")
                    .consumes(&input)
                    .consumes(&scratch)
                    .produces(&output)
                    .run(|_| async { Ok(()) }),
            )
            .unwrap()
            .build();

        Fixture {
            pipeline,
            input,
            output,
            scratch,
        }
    }

    fn tracked_ctx(f: &Fixture) -> SourceTrackedContext {
        let mut ctx = SourceTrackedContext::new();
        ctx.insert(&f.input, &"5".to_string()).unwrap();
        ctx.set(&f.output, &500, Some(ValueSource::step("produce", 77)))
            .unwrap();
        ctx.insert(&f.scratch, &"tmp".to_string()).unwrap();
        ctx
    }

    #[test]
    fn test_serialize_writes_latest_and_historical() {
        let f = fixture();
        let store = InMemoryVariableStore::new();

        let written = store
            .serialize_pipeline("r1", &f.pipeline, &tracked_ctx(&f))
            .unwrap();

        // input + output; the transient scratch key is skipped.
        assert_eq!(written, 2);
        assert_eq!(store.latest_len(), 2);
        assert_eq!(store.historical_len(), 2);

        let record = store.latest("r1", "math", "output").unwrap();
        assert_eq!(record.value, "500");
        assert_eq!(
            record.source,
            Some(StoredSource {
                step: "produce".into(),
                input_hash: 77
            })
        );
    }

    #[test]
    fn test_repeated_serialize_appends_history() {
        let f = fixture();
        let store = InMemoryVariableStore::new();
        let ctx = tracked_ctx(&f);

        store.serialize_pipeline("r1", &f.pipeline, &ctx).unwrap();
        store.serialize_pipeline("r1", &f.pipeline, &ctx).unwrap();

        assert_eq!(store.latest_len(), 2);
        let history = store.history("r1", "math", "output");
        assert_eq!(history.len(), 2);
        // Timestamps move strictly forward even within one millisecond.
        assert!(history[0].timestamp < history[1].timestamp);
    }

    #[test]
    fn test_load_restores_values_and_provenance() {
        let f = fixture();
        let store = InMemoryVariableStore::new();
        store
            .serialize_pipeline("r1", &f.pipeline, &tracked_ctx(&f))
            .unwrap();

        let loaded = store
            .load_context_for_pipeline("r1", &f.pipeline, &SourceTrackedContext::new(), false, true)
            .unwrap();

        assert_eq!(loaded.get(&f.output).unwrap(), 500);
        assert_eq!(
            loaded.source(f.output.as_erased()),
            Some(&ValueSource::step("produce", 77))
        );
        assert!(loaded.source(f.input.as_erased()).is_none());
        assert!(!loaded.exists(f.scratch.as_erased()));
    }

    #[test]
    fn test_load_keeps_seed_unless_overwrite() {
        let f = fixture();
        let store = InMemoryVariableStore::new();
        store
            .serialize_pipeline("r1", &f.pipeline, &tracked_ctx(&f))
            .unwrap();

        let mut seed = SourceTrackedContext::new();
        seed.insert(&f.output, &9).unwrap();

        let kept = store
            .load_context_for_pipeline("r1", &f.pipeline, &seed, false, true)
            .unwrap();
        assert_eq!(kept.get(&f.output).unwrap(), 9);

        let replaced = store
            .load_context_for_pipeline("r1", &f.pipeline, &seed, true, true)
            .unwrap();
        assert_eq!(replaced.get(&f.output).unwrap(), 500);
    }

    #[test]
    fn test_load_skips_outputs_when_excluded() {
        let f = fixture();
        let store = InMemoryVariableStore::new();
        store
            .serialize_pipeline("r1", &f.pipeline, &tracked_ctx(&f))
            .unwrap();

        let loaded = store
            .load_context_for_pipeline("r1", &f.pipeline, &SourceTrackedContext::new(), false, false)
            .unwrap();

        assert!(loaded.exists(f.input.as_erased()));
        assert!(!loaded.exists(f.output.as_erased()));
    }

    #[test]
    fn test_structural_hash_guard_skips_stale_layout() {
        // Persist under a declaration of list<String>.
        let mut b1 = VariableSet::builder("guarded");
        let items_str = b1.list::<String>("items");
        let v1 = b1.build().unwrap();
        let p1 = Pipeline::builder("guarded", v1)
            .step(
                Step::builder("fill")
                    .produces(&items_str)
                    .run(|_| async { Ok(()) }),
            )
            .unwrap()
            .build();

        let mut ctx = SourceTrackedContext::new();
        ctx.insert(&items_str, &vec!["a".to_string()]).unwrap();

        let store = InMemoryVariableStore::new();
        store.serialize_pipeline("r1", &p1, &ctx).unwrap();

        // Redeclare the same variable as list<Int> and load.
        let mut b2 = VariableSet::builder("guarded");
        let items_int = b2.list::<i64>("items");
        let v2 = b2.build().unwrap();
        let p2 = Pipeline::builder("guarded", v2)
            .step(
                Step::builder("fill")
                    .produces(&items_int)
                    .run(|_| async { Ok(()) }),
            )
            .unwrap()
            .build();

        let loaded = store
            .load_context_for_pipeline("r1", &p2, &SourceTrackedContext::new(), false, true)
            .unwrap();

        // The stored variable is skipped, not decoded.
        assert!(!loaded.exists(items_int.as_erased()));
    }
}

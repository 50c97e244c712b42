//! The executor façade: fluent pre- and post-execution builders.

use crate::cancellation::CancellationToken;
use crate::context::{Context, ContextRead, SourceTrackedContext};
use crate::errors::FlowstateError;
use crate::persistence::store::VariableStore;
use crate::pipeline::{Pipeline, PipelineHooks, PipelineRun};
use crate::variables::key::{ErasedKey, FlowValue, Key};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Binds a pipeline to the typed variable struct its steps were
/// declared with.
///
/// `V` is the user's key-holding struct; every post-execution lookup
/// goes through it, so access is type-checked at the call site.
#[derive(Debug)]
pub struct Executor<V> {
    pipeline: Arc<Pipeline>,
    vars: Arc<V>,
}

impl<V: Send + Sync + 'static> Executor<V> {
    /// Creates an executor.
    #[must_use]
    pub fn new(pipeline: Pipeline, vars: V) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            vars: Arc::new(vars),
        }
    }

    /// Returns the bound pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Returns the bound variable struct.
    #[must_use]
    pub fn vars(&self) -> &V {
        &self.vars
    }

    /// Starts a run with an empty context.
    #[must_use]
    pub fn prepare(&self) -> RunBuilder<V> {
        self.prepare_with(SourceTrackedContext::new())
    }

    /// Starts a run from an existing context (for example one restored
    /// from a store).
    #[must_use]
    pub fn prepare_with(&self, ctx: SourceTrackedContext) -> RunBuilder<V> {
        RunBuilder {
            pipeline: Arc::clone(&self.pipeline),
            vars: Arc::clone(&self.vars),
            ctx,
            hooks: PipelineHooks::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Pre-execution builder: seed the context, register hooks, run.
pub struct RunBuilder<V> {
    pipeline: Arc<Pipeline>,
    vars: Arc<V>,
    ctx: SourceTrackedContext,
    hooks: PipelineHooks,
    cancel: CancellationToken,
}

impl<V: Send + Sync + 'static> RunBuilder<V> {
    /// Seeds or modifies the context through the typed variable view.
    ///
    /// # Errors
    ///
    /// Propagates whatever the seeding block returns.
    pub fn context(
        mut self,
        seed: impl FnOnce(&V, &mut SourceTrackedContext) -> Result<(), FlowstateError>,
    ) -> Result<Self, FlowstateError> {
        seed(&self.vars, &mut self.ctx)?;
        Ok(self)
    }

    /// Registers hooks for this run.
    #[must_use]
    pub fn hooks(mut self, register: impl FnOnce(&mut PipelineHooks)) -> Self {
        register(&mut self.hooks);
        self
    }

    /// Attaches a cancellation token checked between steps.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Runs the pipeline.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::execute`].
    pub async fn execute(self) -> Result<ExecutionResult<V>, FlowstateError> {
        let run = self
            .pipeline
            .execute(self.ctx, &self.hooks, &self.cancel)
            .await?;
        Ok(ExecutionResult {
            pipeline: self.pipeline,
            vars: self.vars,
            run,
        })
    }

    /// Runs the pipeline, then persists every declared variable.
    ///
    /// Persistence happens only after full-pipeline success.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::execute`] and [`VariableStore::serialize_pipeline`].
    pub async fn execute_and_save(
        self,
        run_id: &str,
        store: &dyn VariableStore,
    ) -> Result<ExecutionResult<V>, FlowstateError> {
        let pipeline = Arc::clone(&self.pipeline);
        let result = self.execute().await?;
        store.serialize_pipeline(run_id, pipeline.as_ref(), result.context())?;
        Ok(result)
    }
}

/// Post-execution builder: typed lookups over the final context.
pub struct ExecutionResult<V> {
    pipeline: Arc<Pipeline>,
    vars: Arc<V>,
    run: PipelineRun,
}

impl<V> ExecutionResult<V> {
    /// Reads one produced value; the closure picks the key off the
    /// typed variable struct.
    ///
    /// # Errors
    ///
    /// `MissingValue` when absent; decode errors otherwise.
    pub fn get<T: FlowValue>(
        &self,
        select: impl FnOnce(&V) -> &Key<T>,
    ) -> Result<T, FlowstateError> {
        self.run.context.get(select(&self.vars))
    }

    /// Reads one value if present.
    ///
    /// # Errors
    ///
    /// Decode errors.
    pub fn get_or_null<T: FlowValue>(
        &self,
        select: impl FnOnce(&V) -> &Key<T>,
    ) -> Result<Option<T>, FlowstateError> {
        self.run.context.get_or_null(select(&self.vars))
    }

    /// Collects several values at once, keyed by variable name.
    ///
    /// # Errors
    ///
    /// `MissingValue` for any absent key.
    pub fn get_many(
        &self,
        select: impl FnOnce(&V) -> Vec<ErasedKey>,
    ) -> Result<BTreeMap<String, serde_json::Value>, FlowstateError> {
        let mut values = BTreeMap::new();
        for key in select(&self.vars) {
            let value = self.run.context.value(&key).ok_or_else(|| {
                FlowstateError::MissingValue {
                    key: key.name().to_string(),
                }
            })?;
            values.insert(key.name().to_string(), value.json().clone());
        }
        Ok(values)
    }

    /// The variable struct plus a plain snapshot of the final context.
    #[must_use]
    pub fn vars(&self) -> (&V, Context) {
        (&self.vars, self.run.context.to_plain())
    }

    /// The variable struct plus the source-tracked final context.
    #[must_use]
    pub fn tracked(&self) -> (&V, &SourceTrackedContext) {
        (&self.vars, &self.run.context)
    }

    /// The source-tracked final context.
    #[must_use]
    pub fn context(&self) -> &SourceTrackedContext {
        &self.run.context
    }

    /// Execution counters for this run.
    #[must_use]
    pub fn report(&self) -> &PipelineRun {
        &self.run
    }

    /// The pipeline that ran.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

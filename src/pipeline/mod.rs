//! Pipelines: ordered steps, scheduling, skip/invalidate semantics,
//! retry orchestration, and hook dispatch.

pub mod builder;
pub mod distance;
pub mod hooks;
mod topo;


pub use builder::PipelineBuilder;
pub use distance::count_steps_to_terminal;
pub use hooks::PipelineHooks;

use crate::cancellation::CancellationToken;
use crate::context::{ContextRead, SourceTrackedContext, ValueSource};
use crate::errors::FlowstateError;
use crate::retry::RetryPolicy;
use crate::step::Step;
use crate::variables::key::ErasedKey;
use crate::variables::set::VariableSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The result of one pipeline run.
#[derive(Debug)]
pub struct PipelineRun {
    /// The context after the final step, with provenance.
    pub context: SourceTrackedContext,
    /// Names of steps whose actions ran, in execution order.
    pub executed: Vec<String>,
    /// Names of steps skipped because their outputs were intact.
    pub skipped: Vec<String>,
    /// Wall-clock duration of the run.
    pub duration: std::time::Duration,
}

/// An ordered set of steps with an optional retry policy.
///
/// The graph where `A -> B` iff `A.produces` intersects `B.consumes`
/// must be acyclic; this is checked when the schedule is computed at
/// `execute` entry.
pub struct Pipeline {
    pub(crate) id: String,
    pub(crate) steps: Vec<Step>,
    pub(crate) variables: Arc<VariableSet>,
    pub(crate) retry: Option<RetryPolicy>,
}

impl Pipeline {
    /// Starts building a pipeline over a variable set.
    #[must_use]
    pub fn builder(id: impl Into<String>, variables: Arc<VariableSet>) -> PipelineBuilder {
        PipelineBuilder::new(id, variables)
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the steps in declaration order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the variable set the pipeline was declared against.
    #[must_use]
    pub fn variables(&self) -> &Arc<VariableSet> {
        &self.variables
    }

    /// Returns the retry policy, if any.
    #[must_use]
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Looks up a step by name.
    #[must_use]
    pub fn step_named(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Every key consumed by some step, plus every produced key when
    /// `include_outputs` is set. Declaration order, deduplicated.
    #[must_use]
    pub fn all_variables(&self, include_outputs: bool) -> Vec<ErasedKey> {
        let mut keys: Vec<ErasedKey> = Vec::new();
        for step in &self.steps {
            for key in step.consumes() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            if include_outputs {
                for key in step.produces() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// Steps in topological order.
    ///
    /// # Errors
    ///
    /// Returns `CyclicPipeline` when the dependency graph has a cycle.
    pub fn sorted_steps(&self) -> Result<Vec<&Step>, FlowstateError> {
        let order = topo::topological_order(&self.id, &self.steps)?;
        Ok(order.into_iter().map(|i| &self.steps[i]).collect())
    }

    /// Steps that must still run from the given keys before the
    /// output spec is satisfied.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` when no terminal state can be reached.
    pub fn steps_to_terminal(
        &self,
        starting_keys: &BTreeSet<String>,
        skip_satisfied: bool,
    ) -> Result<usize, FlowstateError> {
        count_steps_to_terminal(
            &self.steps,
            starting_keys,
            self.variables.output_spec(),
            skip_satisfied,
        )
    }

    /// Runs the pipeline against a working context.
    ///
    /// Schedules steps topologically, drops stale values, then for
    /// each step either skips (all produces intact) or executes the
    /// action through a scoped view under the retry policy, committing
    /// pending writes with step-source provenance.
    ///
    /// # Errors
    ///
    /// `CyclicPipeline`, `InvalidInputShape`, step and hook errors,
    /// `StepDidNotProduce`, `ExceededRetryAttempts`, `Cancelled`.
    pub async fn execute(
        &self,
        ctx: SourceTrackedContext,
        hooks: &PipelineHooks,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, FlowstateError> {
        let started = Instant::now();
        let order = self.sorted_steps()?;

        if !self
            .variables
            .input_spec()
            .is_satisfied(&ctx.available_names())
        {
            return Err(FlowstateError::InvalidInputShape {
                pipeline: self.id.clone(),
            });
        }

        let mut ctx = ctx;
        ctx.invalidate(self)?;

        info!(pipeline = %self.id, steps = self.steps.len(), "executing pipeline");
        hooks.fire_before_execution(&ctx)?;

        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        for &step in &order {
            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                return Err(FlowstateError::Cancelled(reason));
            }

            let skip = step.produces().iter().all(|key| ctx.exists(key));
            hooks.fire_before_each_step(step, &ctx, skip)?;
            if skip {
                debug!(step = step.name(), "skipping step, outputs intact");
                skipped.push(step.name().to_string());
                continue;
            }

            // Fingerprint against the context as the step sees it;
            // pending writes never touch `ctx` until commit.
            let step_hash = step.hash_inputs(&ctx);

            let view = match &self.retry {
                Some(policy) => {
                    policy
                        .controlled_retry(
                            || {
                                // Fresh view per attempt: a failed
                                // attempt's partial writes are gone.
                                let view = step.scoped_view(ctx.clone());
                                let action = Arc::clone(step.action());
                                async move {
                                    action.run(view.clone()).await?;
                                    Ok(view)
                                }
                            },
                            |_, _, err| hooks.fire_step_failure(step, &ctx, err),
                        )
                        .await?
                }
                None => {
                    let view = step.scoped_view(ctx.clone());
                    match step.action().run(view.clone()).await {
                        Ok(()) => view,
                        Err(err) => {
                            hooks.fire_step_failure(step, &ctx, &err)?;
                            return Err(err);
                        }
                    }
                }
            };

            let pending = view.pending();
            let missing: Vec<String> = step
                .produces()
                .iter()
                .filter(|key| !pending.contains_key(*key))
                .map(|key| key.name().to_string())
                .collect();
            if !missing.is_empty() {
                return Err(FlowstateError::StepDidNotProduce {
                    step: step.name().to_string(),
                    missing,
                });
            }

            // The view only admits writes to `produces`, so freezing
            // commits exactly the step's declared outputs.
            ctx = view.freeze_tracked(Some(ValueSource::step(step.name(), step_hash)));
            debug!(step = step.name(), "committed step outputs");
            executed.push(step.name().to_string());

            hooks.fire_after_each_step(step, &ctx)?;
        }

        hooks.fire_after_execution(&ctx)?;
        info!(
            pipeline = %self.id,
            executed = executed.len(),
            skipped = skipped.len(),
            "pipeline finished"
        );

        Ok(PipelineRun {
            context: ctx,
            executed,
            skipped,
            duration: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("steps", &self.steps.iter().map(Step::name).collect::<Vec<_>>())
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

//! Pipeline builder with declaration-time validation.

use super::Pipeline;
use crate::errors::FlowstateError;
use crate::retry::RetryPolicy;
use crate::step::Step;
use crate::variables::set::VariableSet;
use std::sync::Arc;

/// Builder for a validated [`Pipeline`].
///
/// Step names must be unique; violations surface as soon as the step
/// is added. Cycle detection happens at `execute` entry, where the
/// schedule is computed.
#[derive(Debug)]
pub struct PipelineBuilder {
    id: String,
    variables: Arc<VariableSet>,
    steps: Vec<Step>,
    retry: Option<RetryPolicy>,
}

impl PipelineBuilder {
    pub(crate) fn new(id: impl Into<String>, variables: Arc<VariableSet>) -> Self {
        Self {
            id: id.into(),
            variables,
            steps: Vec::new(),
            retry: None,
        }
    }

    /// Adds a step.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStepName` when a step with that name exists.
    pub fn step(mut self, step: Step) -> Result<Self, FlowstateError> {
        if self.steps.iter().any(|s| s.name() == step.name()) {
            return Err(FlowstateError::DuplicateStepName {
                pipeline: self.id,
                name: step.name().to_string(),
            });
        }
        self.steps.push(step);
        Ok(self)
    }

    /// Attaches a retry policy governing every step's action.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Finishes the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            id: self.id,
            steps: self.steps,
            variables: self.variables,
            retry: self.retry,
        }
    }
}

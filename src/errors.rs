//! Error types for the flowstate engine.
//!
//! One taxonomy covers declaration-time validation, execution, retry
//! exhaustion, and persistence. Every variant owns its payload so the
//! retry engine can accumulate failures and embed them in
//! [`FlowstateError::ExceededRetryAttempts`].

use thiserror::Error;

/// The main error type for flowstate operations.
#[derive(Debug, Clone, Error)]
pub enum FlowstateError {
    /// A typed read found no value at the key.
    #[error("No value for variable '{key}'")]
    MissingValue {
        /// The key name.
        key: String,
    },

    /// A typed read found a value whose tag does not match the key's type.
    #[error("Type mismatch for variable '{key}': declared {expected}, stored {actual}")]
    TypeMismatch {
        /// The key name.
        key: String,
        /// The type the key declares.
        expected: String,
        /// The type tag stored with the value.
        actual: String,
    },

    /// A mutable view read a key outside its allowed read set.
    #[error("Illegal variable access: '{key}' is not readable by this step")]
    IllegalVariableAccess {
        /// The key name.
        key: String,
    },

    /// A mutable view wrote a key outside its allowed write set.
    #[error("Illegal variable set: '{key}' is not writable by this step")]
    IllegalVariableSet {
        /// The key name.
        key: String,
    },

    /// Topological sort could not emit all steps.
    #[error("Pipeline '{pipeline}' contains a dependency cycle among steps: {}", .remaining.join(", "))]
    CyclicPipeline {
        /// The pipeline id.
        pipeline: String,
        /// Steps that could not be scheduled.
        remaining: Vec<String>,
    },

    /// Two steps in one pipeline share a name.
    #[error("Duplicate step name '{name}' in pipeline '{pipeline}'")]
    DuplicateStepName {
        /// The pipeline id.
        pipeline: String,
        /// The duplicated step name.
        name: String,
    },

    /// Two slots in one variable set share a name.
    #[error("Duplicate variable name '{name}' in variable set '{set}'")]
    DuplicateVariableName {
        /// The variable set name.
        set: String,
        /// The duplicated slot name.
        name: String,
    },

    /// A shape spec violates a declaration-time invariant.
    #[error("Invalid shape spec: {reason}")]
    InvalidShapeSpec {
        /// What was violated.
        reason: String,
    },

    /// The seed context satisfies no option of the pipeline's input spec.
    #[error("Context for pipeline '{pipeline}' does not satisfy any input shape option")]
    InvalidInputShape {
        /// The pipeline id.
        pipeline: String,
    },

    /// A step action returned without setting every declared produce.
    #[error("Step '{step}' did not produce: {}", .missing.join(", "))]
    StepDidNotProduce {
        /// The step name.
        step: String,
        /// The produces left unset.
        missing: Vec<String>,
    },

    /// A persisted record's structural hash does not match the current
    /// declaration. Loaders skip such records with a log note; the
    /// variant exists so the guard can be expressed as a `Result`.
    #[error("Stored variable '{key}' has structural hash {stored}, current declaration has {current}")]
    UnsupportedStructuralHash {
        /// The variable name.
        key: String,
        /// The hash recorded with the value.
        stored: u64,
        /// The declaration's current hash.
        current: u64,
    },

    /// The retry loop ran out of attempts.
    #[error("Retry attempts exhausted after {} failures: [{}]", .failures.len(), join_failures(.failures))]
    ExceededRetryAttempts {
        /// Every failure, in attempt order.
        failures: Vec<FlowstateError>,
    },

    /// No runnable step remains and no output option is satisfied.
    #[error("No terminal state reachable from the available keys (stuck after {executed} steps)")]
    Unreachable {
        /// Steps executed before getting stuck.
        executed: usize,
    },

    /// A step action failed.
    #[error("Step '{step}' failed: {message}")]
    StepExecution {
        /// The step name.
        step: String,
        /// The failure description.
        message: String,
    },

    /// The run was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Encoding or decoding a value failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FlowstateError {
    /// Creates a step execution error.
    #[must_use]
    pub fn step_failure(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors the retry engine must never retry.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

fn join_failures(failures: &[FlowstateError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

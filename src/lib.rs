//! # Flowstate
//!
//! Typed, directed-acyclic pipelines of asynchronous steps with
//! persistent source-tracked state, partial recomputation, and retry
//! orchestration.
//!
//! Flowstate provides:
//!
//! - **Typed variables**: declare keys once, read and write them
//!   through compile-time-checked handles
//! - **Source tracking**: every produced value carries the producing
//!   step and a fingerprint of its inputs
//! - **Partial recomputation**: steps whose outputs are present and
//!   still valid are skipped; stale values are invalidated
//! - **Retry orchestration**: bounded exponential backoff with a
//!   caller filter and failure callbacks
//! - **Persistence**: serialize variables per run and restore them so
//!   a later run resumes where the last one stopped
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowstate::prelude::*;
//!
//! let mut b = VariableSet::builder("math");
//! let input = b.string("input");
//! let output = b.int("output");
//! let variables = b.build()?;
//!
//! let pipeline = Pipeline::builder("math", variables)
//!     .step(Step::builder("parse")
//!         .consumes(&input)
//!         .produces(&output)
//!         .run(move |view| { /* async body */ }))?
//!     .build();
//!
//! let result = Executor::new(pipeline, vars)
//!     .prepare()
//!     .context(|vars, ctx| ctx.insert(&vars.input, &"5".into()))?
//!     .execute()
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod executor;
pub mod hashing;
pub mod persistence;
pub mod pipeline;
pub mod retry;
pub mod step;
pub mod utils;
pub mod variables;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::{
        Context, ContextRead, ContextValue, MutableView, SourceTrackedContext, ValueSource,
    };
    pub use crate::errors::FlowstateError;
    pub use crate::executor::{ExecutionResult, Executor, RunBuilder};
    pub use crate::persistence::{InMemoryVariableStore, SerializedVariable, VariableStore};
    pub use crate::pipeline::{
        count_steps_to_terminal, Pipeline, PipelineBuilder, PipelineHooks, PipelineRun,
    };
    pub use crate::retry::{CurrentRetryState, JitterStrategy, RetryPolicy};
    pub use crate::step::{FnAction, Step, StepAction, StepBuilder};
    pub use crate::utils::{generate_run_id, now_millis};
    pub use crate::variables::{
        ErasedKey, FlowValue, Key, ShapeSpec, TypeTag, VariableSet, VariableSetBuilder,
    };
}

//! Hook registration and dispatch.
//!
//! Five families, invoked in registration order. Every callback
//! receives a clone of the current source-tracked context, so hook
//! mutations never reach the running pipeline. A hook error aborts
//! the run; hooks are not retried.

use crate::context::SourceTrackedContext;
use crate::errors::FlowstateError;
use crate::step::Step;

type ContextHook = Box<dyn Fn(SourceTrackedContext) -> Result<(), FlowstateError> + Send + Sync>;
type StepHook = Box<dyn Fn(&Step, SourceTrackedContext) -> Result<(), FlowstateError> + Send + Sync>;
type StepSkipHook =
    Box<dyn Fn(&Step, SourceTrackedContext, bool) -> Result<(), FlowstateError> + Send + Sync>;
type StepFailureHook = Box<
    dyn Fn(&Step, SourceTrackedContext, &FlowstateError) -> Result<(), FlowstateError>
        + Send
        + Sync,
>;

/// Registered callbacks for one pipeline run.
#[derive(Default)]
pub struct PipelineHooks {
    before_execution: Vec<ContextHook>,
    before_each_step: Vec<StepSkipHook>,
    after_each_step: Vec<StepHook>,
    on_step_failure: Vec<StepFailureHook>,
    after_execution: Vec<ContextHook>,
}

impl PipelineHooks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once before the first step, after invalidation.
    pub fn before_execution(
        &mut self,
        hook: impl Fn(SourceTrackedContext) -> Result<(), FlowstateError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.before_execution.push(Box::new(hook));
        self
    }

    /// Fires before every step; the flag reports whether it will be
    /// skipped.
    pub fn before_each_step(
        &mut self,
        hook: impl Fn(&Step, SourceTrackedContext, bool) -> Result<(), FlowstateError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.before_each_step.push(Box::new(hook));
        self
    }

    /// Fires after a step's writes are committed.
    pub fn after_each_step(
        &mut self,
        hook: impl Fn(&Step, SourceTrackedContext) -> Result<(), FlowstateError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.after_each_step.push(Box::new(hook));
        self
    }

    /// Fires on every retryable step failure, before the backoff
    /// sleep. An error here cancels further retries.
    pub fn on_step_failure(
        &mut self,
        hook: impl Fn(&Step, SourceTrackedContext, &FlowstateError) -> Result<(), FlowstateError>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.on_step_failure.push(Box::new(hook));
        self
    }

    /// Fires once after the last step.
    pub fn after_execution(
        &mut self,
        hook: impl Fn(SourceTrackedContext) -> Result<(), FlowstateError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.after_execution.push(Box::new(hook));
        self
    }

    pub(crate) fn fire_before_execution(
        &self,
        ctx: &SourceTrackedContext,
    ) -> Result<(), FlowstateError> {
        for hook in &self.before_execution {
            hook(ctx.clone())?;
        }
        Ok(())
    }

    pub(crate) fn fire_before_each_step(
        &self,
        step: &Step,
        ctx: &SourceTrackedContext,
        skipped: bool,
    ) -> Result<(), FlowstateError> {
        for hook in &self.before_each_step {
            hook(step, ctx.clone(), skipped)?;
        }
        Ok(())
    }

    pub(crate) fn fire_after_each_step(
        &self,
        step: &Step,
        ctx: &SourceTrackedContext,
    ) -> Result<(), FlowstateError> {
        for hook in &self.after_each_step {
            hook(step, ctx.clone())?;
        }
        Ok(())
    }

    pub(crate) fn fire_step_failure(
        &self,
        step: &Step,
        ctx: &SourceTrackedContext,
        err: &FlowstateError,
    ) -> Result<(), FlowstateError> {
        for hook in &self.on_step_failure {
            hook(step, ctx.clone(), err)?;
        }
        Ok(())
    }

    pub(crate) fn fire_after_execution(
        &self,
        ctx: &SourceTrackedContext,
    ) -> Result<(), FlowstateError> {
        for hook in &self.after_execution {
            hook(ctx.clone())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PipelineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHooks")
            .field("before_execution", &self.before_execution.len())
            .field("before_each_step", &self.before_each_step.len())
            .field("after_each_step", &self.after_each_step.len())
            .field("on_step_failure", &self.on_step_failure.len())
            .field("after_execution", &self.after_execution.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut hooks = PipelineHooks::new();

        let o1 = order.clone();
        hooks.before_execution(move |_| {
            o1.lock().push(1);
            Ok(())
        });
        let o2 = order.clone();
        hooks.before_execution(move |_| {
            o2.lock().push(2);
            Ok(())
        });

        hooks
            .fire_before_execution(&SourceTrackedContext::new())
            .unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_hook_error_stops_dispatch() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut hooks = PipelineHooks::new();

        hooks.after_execution(|_| Err(FlowstateError::Cancelled("hook abort".into())));
        let f = fired.clone();
        hooks.after_execution(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = hooks.fire_after_execution(&SourceTrackedContext::new());
        assert!(result.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

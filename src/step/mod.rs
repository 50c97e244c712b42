//! Steps: named units of work with declared reads and writes.

use crate::context::{ContextRead, MutableView, SourceTrackedContext};
use crate::errors::FlowstateError;
use crate::hashing;
use crate::variables::key::{ErasedKey, FlowValue, Key};
use async_trait::async_trait;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// The asynchronous body of a step.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Runs the body against a view restricted to the step's declared
    /// consumes and produces.
    async fn run(&self, view: MutableView) -> Result<(), FlowstateError>;
}

/// Adapts an async closure into a [`StepAction`].
pub struct FnAction<F, Fut>
where
    F: Fn(MutableView) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), FlowstateError>> + Send,
{
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnAction<F, Fut>
where
    F: Fn(MutableView) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), FlowstateError>> + Send,
{
    /// Wraps the closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> StepAction for FnAction<F, Fut>
where
    F: Fn(MutableView) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), FlowstateError>> + Send,
{
    async fn run(&self, view: MutableView) -> Result<(), FlowstateError> {
        (self.func)(view).await
    }
}

/// A named unit of work declaring the keys it consumes and produces.
#[derive(Clone)]
pub struct Step {
    name: String,
    consumes: Vec<ErasedKey>,
    produces: Vec<ErasedKey>,
    action: Arc<dyn StepAction>,
}

impl Step {
    /// Starts building a step.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> StepBuilder {
        StepBuilder {
            name: name.into(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys the step reads, in declaration order.
    #[must_use]
    pub fn consumes(&self) -> &[ErasedKey] {
        &self.consumes
    }

    /// Keys the step writes, in declaration order.
    #[must_use]
    pub fn produces(&self) -> &[ErasedKey] {
        &self.produces
    }

    /// Returns the action body.
    #[must_use]
    pub fn action(&self) -> &Arc<dyn StepAction> {
        &self.action
    }

    /// Stable fingerprint over the values at the consumed keys.
    ///
    /// Values are rendered canonically in declaration order; an absent
    /// value folds the literal `null`. Downstream provenance compares
    /// against this to decide whether stored outputs are still valid.
    #[must_use]
    pub fn hash_inputs<C: ContextRead>(&self, ctx: &C) -> u64 {
        let parts: Vec<String> = self
            .consumes
            .iter()
            .map(|key| {
                ctx.value(key)
                    .map_or_else(|| "null".to_string(), |v| v.canonical())
            })
            .collect();
        hashing::fingerprint(parts)
    }

    /// Builds the view a step body runs against: reads limited to
    /// `consumes`, writes limited to `produces`.
    #[must_use]
    pub fn scoped_view(&self, base: SourceTrackedContext) -> MutableView {
        let allow_get: HashSet<ErasedKey> = self.consumes.iter().cloned().collect();
        let allow_set: HashSet<ErasedKey> = self.produces.iter().cloned().collect();
        MutableView::new(base, Some(allow_get), Some(allow_set))
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .finish()
    }
}

/// Builder for a [`Step`].
#[derive(Debug)]
pub struct StepBuilder {
    name: String,
    consumes: Vec<ErasedKey>,
    produces: Vec<ErasedKey>,
}

impl StepBuilder {
    /// Declares a consumed key.
    #[must_use]
    pub fn consumes<T: FlowValue>(mut self, key: &Key<T>) -> Self {
        if !self.consumes.contains(key.as_erased()) {
            self.consumes.push(key.erased());
        }
        self
    }

    /// Declares a produced key.
    #[must_use]
    pub fn produces<T: FlowValue>(mut self, key: &Key<T>) -> Self {
        if !self.produces.contains(key.as_erased()) {
            self.produces.push(key.erased());
        }
        self
    }

    /// Attaches an async closure as the body and finishes the step.
    #[must_use]
    pub fn run<F, Fut>(self, func: F) -> Step
    where
        F: Fn(MutableView) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), FlowstateError>> + Send + 'static,
    {
        self.action(FnAction::new(func))
    }

    /// Attaches an action and finishes the step.
    #[must_use]
    pub fn action(self, action: impl StepAction + 'static) -> Step {
        Step {
            name: self.name,
            consumes: self.consumes,
            produces: self.produces,
            action: Arc::new(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::set::VariableSet;

    fn fixture() -> (SourceTrackedContext, Key<String>, Key<i64>, Key<i64>) {
        let mut b = VariableSet::builder("vars");
        let input = b.string("input");
        let m = b.int("m");
        let out = b.int("out");
        b.build().unwrap();

        let mut ctx = SourceTrackedContext::new();
        ctx.insert(&input, &"5".to_string()).unwrap();
        ctx.insert(&m, &100).unwrap();
        (ctx, input, m, out)
    }

    #[test]
    fn test_hash_inputs_tracks_consumed_values() {
        let (mut ctx, input, m, out) = fixture();
        let step = Step::builder("multiply")
            .consumes(&input)
            .consumes(&m)
            .produces(&out)
            .run(|_| async { Ok(()) });

        let before = step.hash_inputs(&ctx);
        ctx.insert(&m, &100).unwrap();
        assert_eq!(step.hash_inputs(&ctx), before);

        ctx.insert(&m, &200).unwrap();
        assert_ne!(step.hash_inputs(&ctx), before);
    }

    #[test]
    fn test_hash_inputs_missing_value_is_distinct() {
        let (mut ctx, input, m, out) = fixture();
        let step = Step::builder("multiply")
            .consumes(&input)
            .consumes(&m)
            .produces(&out)
            .run(|_| async { Ok(()) });

        let with_value = step.hash_inputs(&ctx);
        ctx.remove(m.as_erased());
        assert_ne!(step.hash_inputs(&ctx), with_value);
    }

    #[test]
    fn test_hash_inputs_ignores_unrelated_keys() {
        let (mut ctx, input, _, out) = fixture();
        let step = Step::builder("parse")
            .consumes(&input)
            .produces(&out)
            .run(|_| async { Ok(()) });

        let before = step.hash_inputs(&ctx);
        ctx.insert(&out, &999).unwrap();
        assert_eq!(step.hash_inputs(&ctx), before);
    }

    #[tokio::test]
    async fn test_scoped_view_enforces_declarations() {
        let (ctx, input, m, out) = fixture();
        let step = Step::builder("parse")
            .consumes(&input)
            .produces(&out)
            .run(|_| async { Ok(()) });

        let view = step.scoped_view(ctx);
        assert!(view.get(&input).is_ok());
        assert!(matches!(
            view.get(&m),
            Err(FlowstateError::IllegalVariableAccess { .. })
        ));
        assert!(view.set(&out, &1).is_ok());
    }

    #[tokio::test]
    async fn test_fn_action_runs_through_trait_object() {
        let (ctx, input, _, out) = fixture();
        let parse_input = input.clone();
        let parse_out = out.clone();
        let step = Step::builder("parse")
            .consumes(&input)
            .produces(&out)
            .run(move |view: MutableView| {
                let input = parse_input.clone();
                let out = parse_out.clone();
                async move {
                    let raw = view.get(&input)?;
                    let parsed: i64 = raw
                        .parse()
                        .map_err(|e| FlowstateError::step_failure("parse", format!("{e}")))?;
                    view.set(&out, &parsed)
                }
            });

        let view = step.scoped_view(ctx);
        step.action().run(view.clone()).await.unwrap();
        assert_eq!(view.pending().len(), 1);
    }
}

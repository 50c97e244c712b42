//! The scoped mutable overlay a step body works through.

use crate::context::plain::Context;
use crate::context::tracked::SourceTrackedContext;
use crate::context::value::{ContextValue, ValueSource};
use crate::context::ContextRead;
use crate::errors::FlowstateError;
use crate::variables::key::{ErasedKey, FlowValue, Key};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct ViewInner {
    base: SourceTrackedContext,
    pending: RwLock<HashMap<ErasedKey, ContextValue>>,
    allow_get: Option<HashSet<ErasedKey>>,
    allow_set: Option<HashSet<ErasedKey>>,
}

/// A layered overlay restricting one step's visible and writable keys.
///
/// Reads consult pending writes first, then the base; writes land in
/// the pending map. When allow sets are present, reads outside
/// `allow_get` fail with `IllegalVariableAccess` and writes outside
/// `allow_set` fail with `IllegalVariableSet`. Cheap to clone; clones
/// share the same pending map.
#[derive(Clone)]
pub struct MutableView {
    inner: Arc<ViewInner>,
}

impl MutableView {
    /// Creates a view over a base context with optional allow sets.
    #[must_use]
    pub fn new(
        base: SourceTrackedContext,
        allow_get: Option<HashSet<ErasedKey>>,
        allow_set: Option<HashSet<ErasedKey>>,
    ) -> Self {
        Self {
            inner: Arc::new(ViewInner {
                base,
                pending: RwLock::new(HashMap::new()),
                allow_get,
                allow_set,
            }),
        }
    }

    /// Creates a view with no access restrictions.
    #[must_use]
    pub fn unrestricted(base: SourceTrackedContext) -> Self {
        Self::new(base, None, None)
    }

    /// Reads a typed value, pending writes first.
    ///
    /// # Errors
    ///
    /// `IllegalVariableAccess` outside the allowed read set,
    /// `MissingValue` when absent.
    pub fn get<T: FlowValue>(&self, key: &Key<T>) -> Result<T, FlowstateError> {
        self.get_or_null(key)?
            .ok_or_else(|| FlowstateError::MissingValue {
                key: key.name().to_string(),
            })
    }

    /// Reads a typed value if present.
    ///
    /// # Errors
    ///
    /// `IllegalVariableAccess` outside the allowed read set.
    pub fn get_or_null<T: FlowValue>(&self, key: &Key<T>) -> Result<Option<T>, FlowstateError> {
        self.check_readable(key.as_erased())?;

        if let Some(value) = self.inner.pending.read().get(key.as_erased()) {
            return value.decode(key.name()).map(Some);
        }
        match self.inner.base.value(key.as_erased()) {
            Some(value) => value.decode(key.name()).map(Some),
            None => Ok(None),
        }
    }

    /// Returns true when a value is visible at the key.
    ///
    /// Existence checks ignore access restrictions.
    #[must_use]
    pub fn exists(&self, key: &ErasedKey) -> bool {
        self.inner.pending.read().contains_key(key) || self.inner.base.exists(key)
    }

    /// Writes a typed value into the pending map.
    ///
    /// # Errors
    ///
    /// `IllegalVariableSet` outside the allowed write set,
    /// `Serialization` when the value does not encode.
    pub fn set<T: FlowValue>(&self, key: &Key<T>, value: &T) -> Result<(), FlowstateError> {
        if let Some(allowed) = &self.inner.allow_set {
            if !allowed.contains(key.as_erased()) {
                return Err(FlowstateError::IllegalVariableSet {
                    key: key.name().to_string(),
                });
            }
        }
        self.inner
            .pending
            .write()
            .insert(key.erased(), ContextValue::encode(value)?);
        Ok(())
    }

    /// Snapshot of the pending writes.
    #[must_use]
    pub fn pending(&self) -> HashMap<ErasedKey, ContextValue> {
        self.inner.pending.read().clone()
    }

    /// Merges pending writes over the base into a plain context.
    #[must_use]
    pub fn freeze(&self) -> Context {
        let mut values: HashMap<ErasedKey, ContextValue> = self
            .inner
            .base
            .to_plain()
            .values()
            .clone();
        values.extend(self.inner.pending.read().clone());
        Context::from_values(values)
    }

    /// Merges pending writes over a clone of the base, tagging each
    /// merged entry with the given provenance.
    #[must_use]
    pub fn freeze_tracked(&self, source: Option<ValueSource>) -> SourceTrackedContext {
        let mut ctx = self.inner.base.clone();
        for (key, value) in self.inner.pending.read().iter() {
            ctx.set_value(key.clone(), value.clone(), source.clone());
        }
        ctx
    }

    fn check_readable(&self, key: &ErasedKey) -> Result<(), FlowstateError> {
        if let Some(allowed) = &self.inner.allow_get {
            if !allowed.contains(key) {
                return Err(FlowstateError::IllegalVariableAccess {
                    key: key.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MutableView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableView")
            .field("pending", &self.inner.pending.read().len())
            .field("restricted_get", &self.inner.allow_get.is_some())
            .field("restricted_set", &self.inner.allow_set.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::set::VariableSet;

    fn base() -> (SourceTrackedContext, Key<i64>, Key<i64>, Key<String>) {
        let mut b = VariableSet::builder("vars");
        let a = b.int("a");
        let out = b.int("out");
        let secret = b.string("secret");
        b.build().unwrap();

        let mut ctx = SourceTrackedContext::new();
        ctx.insert(&a, &10).unwrap();
        ctx.insert(&secret, &"hidden".to_string()).unwrap();
        (ctx, a, out, secret)
    }

    #[test]
    fn test_pending_shadows_base() {
        let (ctx, a, _, _) = base();
        let view = MutableView::unrestricted(ctx);

        assert_eq!(view.get(&a).unwrap(), 10);
        view.set(&a, &11).unwrap();
        assert_eq!(view.get(&a).unwrap(), 11);
    }

    #[test]
    fn test_restricted_read_rejected() {
        let (ctx, a, out, secret) = base();
        let view = MutableView::new(
            ctx,
            Some([a.erased()].into_iter().collect()),
            Some([out.erased()].into_iter().collect()),
        );

        assert_eq!(view.get(&a).unwrap(), 10);
        assert!(matches!(
            view.get(&secret),
            Err(FlowstateError::IllegalVariableAccess { .. })
        ));
    }

    #[test]
    fn test_restricted_write_rejected() {
        let (ctx, a, out, _) = base();
        let view = MutableView::new(
            ctx,
            Some([a.erased()].into_iter().collect()),
            Some([out.erased()].into_iter().collect()),
        );

        view.set(&out, &7).unwrap();
        assert!(matches!(
            view.set(&a, &1),
            Err(FlowstateError::IllegalVariableSet { .. })
        ));
    }

    #[test]
    fn test_exists_ignores_restrictions() {
        let (ctx, a, out, secret) = base();
        let view = MutableView::new(
            ctx,
            Some([a.erased()].into_iter().collect()),
            Some([out.erased()].into_iter().collect()),
        );

        assert!(view.exists(secret.as_erased()));
        assert!(!view.exists(out.as_erased()));
    }

    #[test]
    fn test_freeze_tracked_tags_pending_only() {
        let (ctx, _, out, _) = base();
        let view = MutableView::unrestricted(ctx);
        view.set(&out, &5).unwrap();

        let frozen = view.freeze_tracked(Some(ValueSource::step("s", 1)));

        assert_eq!(
            frozen.source(out.as_erased()),
            Some(&ValueSource::step("s", 1))
        );
        // Base entries keep their original (seeded) provenance.
        let base_key = frozen
            .entry_keys()
            .into_iter()
            .find(|k| k.name() == "a")
            .unwrap();
        assert!(frozen.source(&base_key).is_none());
    }

    #[test]
    fn test_freeze_merges_pending() {
        let (ctx, a, out, _) = base();
        let view = MutableView::unrestricted(ctx);
        view.set(&out, &5).unwrap();

        let frozen = view.freeze();
        assert_eq!(frozen.get(&a).unwrap(), 10);
        assert_eq!(frozen.get(&out).unwrap(), 5);
    }
}

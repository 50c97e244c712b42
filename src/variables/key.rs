//! Typed keys into the pipeline context.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Marker trait for values that can live in a context slot.
///
/// Blanket-implemented; bounds mirror what the context needs to
/// encode, decode, and fingerprint a value.
pub trait FlowValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> FlowValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Identity of the variable set a key was declared in.
///
/// Minted once per builder, so two sets declaring the same slot names
/// still produce distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(Uuid);

impl SetId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Fully qualified type identity captured at declaration time.
///
/// The tag participates in structural hashing and guards typed reads;
/// the compile-time `T` on [`Key`] remains the actual runtime contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag {
    name: &'static str,
}

impl TypeTag {
    /// Captures the tag for a type, generic parameters included.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the fully qualified type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// A key with its compile-time type erased.
///
/// Identity is `(name, owning set)`: two keys are the same slot only
/// when they come from the same declaration site.
#[derive(Debug, Clone)]
pub struct ErasedKey {
    name: Arc<str>,
    set_id: SetId,
    tag: TypeTag,
    transient: bool,
}

impl ErasedKey {
    pub(crate) fn new(name: &str, set_id: SetId, tag: TypeTag, transient: bool) -> Self {
        Self {
            name: Arc::from(name),
            set_id,
            tag,
            transient,
        }
    }

    /// Returns the slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the owning set's identity.
    #[must_use]
    pub fn set_id(&self) -> SetId {
        self.set_id
    }

    /// Returns the captured type tag.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns true when the slot is excluded from persistence.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl PartialEq for ErasedKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.set_id == other.set_id
    }
}

impl Eq for ErasedKey {}

impl std::hash::Hash for ErasedKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.set_id.hash(state);
    }
}

impl std::fmt::Display for ErasedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A named, typed handle for one context slot.
pub struct Key<T> {
    erased: ErasedKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FlowValue> Key<T> {
    pub(crate) fn new(name: &str, set_id: SetId, transient: bool) -> Self {
        Self {
            erased: ErasedKey::new(name, set_id, TypeTag::of::<T>(), transient),
            _marker: PhantomData,
        }
    }

    /// Returns the slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.erased.name()
    }

    /// Returns the captured type tag.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.erased.tag()
    }

    /// Returns true when the slot is excluded from persistence.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.erased.is_transient()
    }

    /// Returns a cheap type-erased copy of this key.
    #[must_use]
    pub fn erased(&self) -> ErasedKey {
        self.erased.clone()
    }

    /// Borrows the type-erased form.
    #[must_use]
    pub fn as_erased(&self) -> &ErasedKey {
        &self.erased
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            erased: self.erased.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.erased.name())
            .field("type", &self.erased.tag().name())
            .field("transient", &self.erased.is_transient())
            .finish()
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.erased == other.erased
    }
}

impl<T> Eq for Key<T> {}

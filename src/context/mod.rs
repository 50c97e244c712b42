//! The three context layers: plain, source-tracked, and mutable view.

pub mod plain;
pub mod tracked;
pub mod value;
pub mod view;

pub use plain::Context;
pub use tracked::SourceTrackedContext;
pub use value::{ContextValue, ValueSource};
pub use view::MutableView;

use crate::errors::FlowstateError;
use crate::variables::key::{ErasedKey, FlowValue, Key};
use std::collections::BTreeSet;

/// Shared read surface over the plain and source-tracked layers.
pub trait ContextRead {
    /// Returns the erased value at a key, if present.
    fn value(&self, key: &ErasedKey) -> Option<&ContextValue>;

    /// Returns every key with an entry.
    fn entry_keys(&self) -> Vec<ErasedKey>;

    /// Reads a typed value.
    ///
    /// # Errors
    ///
    /// `MissingValue` when absent; `TypeMismatch`/`Serialization` when
    /// the stored value does not decode as the key's type.
    fn get<T: FlowValue>(&self, key: &Key<T>) -> Result<T, FlowstateError> {
        self.get_or_null(key)?
            .ok_or_else(|| FlowstateError::MissingValue {
                key: key.name().to_string(),
            })
    }

    /// Reads a typed value if present.
    ///
    /// # Errors
    ///
    /// `TypeMismatch`/`Serialization` when the stored value does not
    /// decode as the key's type.
    fn get_or_null<T: FlowValue>(&self, key: &Key<T>) -> Result<Option<T>, FlowstateError> {
        match self.value(key.as_erased()) {
            Some(value) => value.decode(key.name()).map(Some),
            None => Ok(None),
        }
    }

    /// Returns true when an entry exists at the key.
    fn exists(&self, key: &ErasedKey) -> bool {
        self.value(key).is_some()
    }

    /// Names of every present key, for shape evaluation.
    fn available_names(&self) -> BTreeSet<String> {
        self.entry_keys()
            .into_iter()
            .map(|k| k.name().to_string())
            .collect()
    }
}

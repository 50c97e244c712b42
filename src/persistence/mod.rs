//! Persisting context variables across runs.

pub mod record;
pub mod store;

pub use record::{SerializedVariable, StoredSource};
pub use store::{InMemoryVariableStore, VariableStore};

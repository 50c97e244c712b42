//! Variable declarations: typed keys, sets, and shape specs.

pub mod key;
pub mod set;
pub mod shape;

pub use key::{ErasedKey, FlowValue, Key, SetId, TypeTag};
pub use set::{Decoder, VariableSet, VariableSetBuilder};
pub use shape::{Condition, Constraint, OptionBuilder, ShapeOption, ShapeSpec, ShapeSpecBuilder};

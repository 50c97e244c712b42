//! Declarative shape constraints over key presence.
//!
//! A [`ShapeSpec`] is a disjunction of options; an option is a
//! conjunction of constraints. Specs describe admissible input shapes
//! and terminal output shapes without inspecting values.

use crate::errors::FlowstateError;
use crate::variables::key::ErasedKey;
use std::collections::BTreeSet;

/// Activation condition for a conditional constraint group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Active when at least one of the named keys is absent.
    IfMissingAny(BTreeSet<String>),
    /// Active when every named key is present.
    IfProvided(BTreeSet<String>),
}

impl Condition {
    fn is_active(&self, available: &BTreeSet<String>) -> bool {
        match self {
            Self::IfMissingAny(keys) => keys.iter().any(|k| !available.contains(k)),
            Self::IfProvided(keys) => keys.iter().all(|k| available.contains(k)),
        }
    }
}

/// A single presence constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// All named keys must be present.
    Required(BTreeSet<String>),
    /// None of the named keys may be present.
    Forbidden(BTreeSet<String>),
    /// At least one of the named keys must be present.
    AtLeastOneOf(BTreeSet<String>),
    /// Exactly one of the named keys must be present.
    ExactlyOneOf(BTreeSet<String>),
    /// At most one of the named keys may be present.
    AtMostOneOf(BTreeSet<String>),
    /// Constraints that apply only while the condition is active.
    Conditional {
        /// The activation condition.
        condition: Condition,
        /// The constraints gated behind it.
        constraints: Vec<Constraint>,
    },
}

impl Constraint {
    fn is_satisfied(&self, available: &BTreeSet<String>) -> bool {
        match self {
            Self::Required(keys) => keys.iter().all(|k| available.contains(k)),
            Self::Forbidden(keys) => keys.iter().all(|k| !available.contains(k)),
            Self::AtLeastOneOf(keys) => count_present(keys, available) >= 1,
            Self::ExactlyOneOf(keys) => count_present(keys, available) == 1,
            Self::AtMostOneOf(keys) => count_present(keys, available) <= 1,
            Self::Conditional {
                condition,
                constraints,
            } => {
                !condition.is_active(available)
                    || constraints.iter().all(|c| c.is_satisfied(available))
            }
        }
    }
}

fn count_present(keys: &BTreeSet<String>, available: &BTreeSet<String>) -> usize {
    keys.iter().filter(|k| available.contains(*k)).count()
}

/// One conjunction of constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeOption {
    constraints: Vec<Constraint>,
}

impl ShapeOption {
    /// Returns the constraints in declaration order.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Returns true when every constraint holds against the available keys.
    #[must_use]
    pub fn is_satisfied(&self, available: &BTreeSet<String>) -> bool {
        self.constraints.iter().all(|c| c.is_satisfied(available))
    }

    fn validate(&self) -> Result<(), FlowstateError> {
        let mut required = BTreeSet::new();
        let mut forbidden = BTreeSet::new();
        let mut cardinality: Vec<(&'static str, &BTreeSet<String>)> = Vec::new();
        collect(
            &self.constraints,
            &mut required,
            &mut forbidden,
            &mut cardinality,
        );

        if let Some(key) = required.intersection(&forbidden).next() {
            return Err(FlowstateError::InvalidShapeSpec {
                reason: format!("'{key}' is both required and forbidden in one option"),
            });
        }

        for (label, keys) in cardinality {
            if let Some(key) = keys.intersection(&forbidden).next() {
                return Err(FlowstateError::InvalidShapeSpec {
                    reason: format!("{label} mentions forbidden key '{key}'"),
                });
            }
            if label != "at-least-one-of" && keys.intersection(&required).count() > 1 {
                return Err(FlowstateError::InvalidShapeSpec {
                    reason: format!("{label} would force more than one required key"),
                });
            }
        }

        Ok(())
    }
}

fn collect<'a>(
    constraints: &'a [Constraint],
    required: &mut BTreeSet<String>,
    forbidden: &mut BTreeSet<String>,
    cardinality: &mut Vec<(&'static str, &'a BTreeSet<String>)>,
) {
    for constraint in constraints {
        match constraint {
            Constraint::Required(keys) => required.extend(keys.iter().cloned()),
            Constraint::Forbidden(keys) => forbidden.extend(keys.iter().cloned()),
            Constraint::AtLeastOneOf(keys) => cardinality.push(("at-least-one-of", keys)),
            Constraint::ExactlyOneOf(keys) => cardinality.push(("exactly-one-of", keys)),
            Constraint::AtMostOneOf(keys) => cardinality.push(("at-most-one-of", keys)),
            Constraint::Conditional { constraints, .. } => {
                collect(constraints, required, forbidden, cardinality);
            }
        }
    }
}

/// A disjunction of [`ShapeOption`]s.
///
/// An empty spec is trivially satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeSpec {
    options: Vec<ShapeOption>,
}

impl ShapeSpec {
    /// A spec with no options, satisfied by any key set.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Starts building a spec.
    #[must_use]
    pub fn builder() -> ShapeSpecBuilder {
        ShapeSpecBuilder::default()
    }

    /// Returns the options in declaration order.
    #[must_use]
    pub fn options(&self) -> &[ShapeOption] {
        &self.options
    }

    /// Returns true when no option was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Returns true when some option is satisfied by the available keys.
    #[must_use]
    pub fn is_satisfied(&self, available: &BTreeSet<String>) -> bool {
        self.options.is_empty() || self.options.iter().any(|o| o.is_satisfied(available))
    }
}

/// Builder for a [`ShapeSpec`].
#[derive(Debug, Default)]
pub struct ShapeSpecBuilder {
    options: Vec<ShapeOption>,
}

impl ShapeSpecBuilder {
    /// Adds an option built through the closure.
    #[must_use]
    pub fn option(mut self, build: impl FnOnce(OptionBuilder) -> OptionBuilder) -> Self {
        let option = build(OptionBuilder::default());
        self.options.push(ShapeOption {
            constraints: option.constraints,
        });
        self
    }

    /// Adds an option requiring exactly the given keys.
    #[must_use]
    pub fn option_keys<I>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = ErasedKey>,
    {
        self.option(|o| o.required(keys))
    }

    /// Validates and finishes the spec.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShapeSpec` when an option is self-contradictory.
    pub fn build(self) -> Result<ShapeSpec, FlowstateError> {
        for option in &self.options {
            option.validate()?;
        }
        Ok(ShapeSpec {
            options: self.options,
        })
    }
}

/// Builder for one option's conjunction of constraints.
#[derive(Debug, Default)]
pub struct OptionBuilder {
    constraints: Vec<Constraint>,
}

impl OptionBuilder {
    /// All named keys must be present.
    #[must_use]
    pub fn required<I: IntoIterator<Item = ErasedKey>>(mut self, keys: I) -> Self {
        self.constraints.push(Constraint::Required(names(keys)));
        self
    }

    /// None of the named keys may be present.
    #[must_use]
    pub fn forbidden<I: IntoIterator<Item = ErasedKey>>(mut self, keys: I) -> Self {
        self.constraints.push(Constraint::Forbidden(names(keys)));
        self
    }

    /// At least one of the named keys must be present.
    #[must_use]
    pub fn at_least_one_of<I: IntoIterator<Item = ErasedKey>>(mut self, keys: I) -> Self {
        self.constraints.push(Constraint::AtLeastOneOf(names(keys)));
        self
    }

    /// Exactly one of the named keys must be present.
    #[must_use]
    pub fn exactly_one_of<I: IntoIterator<Item = ErasedKey>>(mut self, keys: I) -> Self {
        self.constraints.push(Constraint::ExactlyOneOf(names(keys)));
        self
    }

    /// At most one of the named keys may be present.
    #[must_use]
    pub fn at_most_one_of<I: IntoIterator<Item = ErasedKey>>(mut self, keys: I) -> Self {
        self.constraints.push(Constraint::AtMostOneOf(names(keys)));
        self
    }

    /// Constraints applying only while any of the named keys is absent.
    #[must_use]
    pub fn if_missing_any<I: IntoIterator<Item = ErasedKey>>(
        mut self,
        keys: I,
        build: impl FnOnce(OptionBuilder) -> OptionBuilder,
    ) -> Self {
        let inner = build(OptionBuilder::default());
        self.constraints.push(Constraint::Conditional {
            condition: Condition::IfMissingAny(names(keys)),
            constraints: inner.constraints,
        });
        self
    }

    /// Constraints applying only while all named keys are present.
    #[must_use]
    pub fn if_provided<I: IntoIterator<Item = ErasedKey>>(
        mut self,
        keys: I,
        build: impl FnOnce(OptionBuilder) -> OptionBuilder,
    ) -> Self {
        let inner = build(OptionBuilder::default());
        self.constraints.push(Constraint::Conditional {
            condition: Condition::IfProvided(names(keys)),
            constraints: inner.constraints,
        });
        self
    }
}

fn names<I: IntoIterator<Item = ErasedKey>>(keys: I) -> BTreeSet<String> {
    keys.into_iter().map(|k| k.name().to_string()).collect()
}

//! Declarative containers of keys for one pipeline.

use crate::context::value::ContextValue;
use crate::errors::FlowstateError;
use crate::hashing;
use crate::variables::key::{ErasedKey, FlowValue, Key, SetId, TypeTag};
use crate::variables::shape::ShapeSpec;
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes the structured-text form of a stored value back into an
/// erased context value, going through the key's declared Rust type.
pub type Decoder = Arc<dyn Fn(&str) -> Result<ContextValue, FlowstateError> + Send + Sync>;

/// An immutable set of declared keys plus the input/output shape specs.
///
/// Key names are unique within a set. The structural hash summarizes
/// the non-transient declaration so the persistence layer can reject
/// values stored under an incompatible prior layout.
pub struct VariableSet {
    id: SetId,
    name: String,
    keys: Vec<ErasedKey>,
    decoders: HashMap<String, Decoder>,
    input_spec: ShapeSpec,
    output_spec: ShapeSpec,
}

impl VariableSet {
    /// Starts declaring a new set.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> VariableSetBuilder {
        VariableSetBuilder {
            id: SetId::generate(),
            name: name.into(),
            keys: Vec::new(),
            decoders: HashMap::new(),
            duplicate: None,
            input_spec: ShapeSpec::any(),
            output_spec: ShapeSpec::any(),
        }
    }

    /// Returns the set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declaration-site identity.
    #[must_use]
    pub fn id(&self) -> SetId {
        self.id
    }

    /// Returns the declared keys in declaration order.
    #[must_use]
    pub fn keys(&self) -> &[ErasedKey] {
        &self.keys
    }

    /// Looks up a declared key by name.
    #[must_use]
    pub fn key(&self, name: &str) -> Option<&ErasedKey> {
        self.keys.iter().find(|k| k.name() == name)
    }

    /// Returns the admissible-input shape spec.
    #[must_use]
    pub fn input_spec(&self) -> &ShapeSpec {
        &self.input_spec
    }

    /// Returns the terminal-output shape spec.
    #[must_use]
    pub fn output_spec(&self) -> &ShapeSpec {
        &self.output_spec
    }

    /// Deterministic hash over the declaration.
    ///
    /// Keys are folded sorted by name, each contributing its name,
    /// fully qualified type, and transience flag. Transient keys are
    /// excluded unless `include_transients` is set.
    #[must_use]
    pub fn structural_hash(&self, include_transients: bool) -> u64 {
        let mut sorted: Vec<&ErasedKey> = self
            .keys
            .iter()
            .filter(|k| include_transients || !k.is_transient())
            .collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let mut parts: Vec<String> = Vec::with_capacity(sorted.len() * 3);
        for key in sorted {
            parts.push(key.name().to_string());
            parts.push(key.tag().name().to_string());
            parts.push(if key.is_transient() { "t" } else { "f" }.to_string());
        }
        hashing::fingerprint(parts)
    }

    /// Decodes a stored structured-text value through the key's
    /// registered deserializer.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the text does not decode as the
    /// key's declared type, or when the key is not declared here.
    pub fn decode(&self, key: &ErasedKey, raw: &str) -> Result<ContextValue, FlowstateError> {
        let decoder =
            self.decoders
                .get(key.name())
                .ok_or_else(|| FlowstateError::Serialization(format!(
                    "no deserializer registered for '{}' in set '{}'",
                    key.name(),
                    self.name
                )))?;
        decoder(raw)
    }
}

impl std::fmt::Debug for VariableSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableSet")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Builder registering typed slots into a [`VariableSet`].
pub struct VariableSetBuilder {
    id: SetId,
    name: String,
    keys: Vec<ErasedKey>,
    decoders: HashMap<String, Decoder>,
    duplicate: Option<String>,
    input_spec: ShapeSpec,
    output_spec: ShapeSpec,
}

impl VariableSetBuilder {
    /// Registers a persistent typed slot and returns its key.
    pub fn register<T: FlowValue>(&mut self, name: &str) -> Key<T> {
        self.slot(name, false)
    }

    /// Registers a slot excluded from persistence across runs.
    pub fn register_transient<T: FlowValue>(&mut self, name: &str) -> Key<T> {
        self.slot(name, true)
    }

    /// Registers a `String` slot.
    pub fn string(&mut self, name: &str) -> Key<String> {
        self.register(name)
    }

    /// Registers an `i64` slot.
    pub fn int(&mut self, name: &str) -> Key<i64> {
        self.register(name)
    }

    /// Registers an `f64` slot.
    pub fn float(&mut self, name: &str) -> Key<f64> {
        self.register(name)
    }

    /// Registers a `bool` slot.
    pub fn boolean(&mut self, name: &str) -> Key<bool> {
        self.register(name)
    }

    /// Registers a `Vec<T>` slot.
    pub fn list<T: FlowValue>(&mut self, name: &str) -> Key<Vec<T>> {
        self.register(name)
    }

    /// Registers an ordered-set slot.
    pub fn set<T: FlowValue + Ord>(&mut self, name: &str) -> Key<std::collections::BTreeSet<T>> {
        self.register(name)
    }

    /// Registers a string-keyed map slot.
    pub fn map<V: FlowValue>(&mut self, name: &str) -> Key<std::collections::BTreeMap<String, V>> {
        self.register(name)
    }

    /// Sets the admissible-input shape spec.
    pub fn input_spec(&mut self, spec: ShapeSpec) -> &mut Self {
        self.input_spec = spec;
        self
    }

    /// Sets the terminal-output shape spec.
    pub fn output_spec(&mut self, spec: ShapeSpec) -> &mut Self {
        self.output_spec = spec;
        self
    }

    /// Finishes the declaration.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateVariableName` if two slots share a name.
    pub fn build(self) -> Result<Arc<VariableSet>, FlowstateError> {
        if let Some(name) = self.duplicate {
            return Err(FlowstateError::DuplicateVariableName {
                set: self.name,
                name,
            });
        }
        Ok(Arc::new(VariableSet {
            id: self.id,
            name: self.name,
            keys: self.keys,
            decoders: self.decoders,
            input_spec: self.input_spec,
            output_spec: self.output_spec,
        }))
    }

    fn slot<T: FlowValue>(&mut self, name: &str, transient: bool) -> Key<T> {
        if self.keys.iter().any(|k| k.name() == name) && self.duplicate.is_none() {
            self.duplicate = Some(name.to_string());
        }

        let key: Key<T> = Key::new(name, self.id, transient);
        self.keys.push(key.erased());

        let tag = TypeTag::of::<T>();
        self.decoders.insert(
            name.to_string(),
            Arc::new(move |raw: &str| {
                let typed: T = serde_json::from_str(raw).map_err(|e| {
                    FlowstateError::Serialization(format!("decoding as {tag}: {e}"))
                })?;
                ContextValue::encode(&typed)
            }),
        );

        key
    }
}

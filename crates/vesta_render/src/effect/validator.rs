//! Permutation validation
//!
//! [`EffectValidator`] remembers the ordered `(key, value)` sequence an effect
//! was last compiled with. Sub-features replay their parameters every frame
//! between [`EffectValidator::begin_effect_validation`] and
//! [`EffectValidator::end_effect_validation`]; the latter reports whether the
//! sequence is unchanged.

use std::fmt;
use std::sync::Arc;

use vesta_core::{ObjectId, ObjectIdBuilder, Symbol, interner};

/// A compile-time permutation value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EffectParameterValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    /// `f32` stored as raw bits so that values are `Eq` and hashable.
    Float(u32),
    Str(Arc<str>),
}

impl EffectParameterValue {
    #[must_use]
    pub fn float(value: f32) -> Self {
        Self::Float(value.to_bits())
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn write_hash(&self, builder: &mut ObjectIdBuilder) {
        match self {
            Self::Bool(v) => builder.write_u32(0).write_u32(u32::from(*v)),
            Self::Int(v) => builder.write_u32(1).write_bytes(&v.to_le_bytes()),
            Self::UInt(v) => builder.write_u32(2).write_u32(*v),
            Self::Float(v) => builder.write_u32(3).write_u32(*v),
            Self::Str(v) => builder.write_u32(4).write_str(v),
        };
    }
}

impl fmt::Display for EffectParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}u"),
            Self::Float(v) => write!(f, "{}f", f32::from_bits(*v)),
            Self::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<bool> for EffectParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for EffectParameterValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for EffectParameterValue {
    fn from(value: u32) -> Self {
        Self::UInt(value)
    }
}

impl From<f32> for EffectParameterValue {
    fn from(value: f32) -> Self {
        Self::float(value)
    }
}

impl From<&str> for EffectParameterValue {
    fn from(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for EffectParameterValue {
    fn from(value: Arc<str>) -> Self {
        Self::Str(value)
    }
}

/// Interned name of a permutation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermutationParameterKey(Symbol);

impl PermutationParameterKey {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(interner::intern(name))
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        interner::resolve(self.0)
    }
}

/// Tracks whether an effect's permutation changed since the last frame.
#[derive(Debug, Clone, Default)]
pub struct EffectValidator {
    effect_values: Vec<(PermutationParameterKey, EffectParameterValue)>,
    validated: usize,
    changed: bool,
}

impl EffectValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_effect_validation(&mut self) {
        self.validated = 0;
        self.changed = false;
    }

    /// Records the next parameter of the sequence. A mismatch with the
    /// previous sequence at this position truncates the remembered tail.
    pub fn validate_parameter(
        &mut self,
        key: PermutationParameterKey,
        value: impl Into<EffectParameterValue>,
    ) {
        let value = value.into();
        let index = self.validated;
        self.validated += 1;

        if let Some((current_key, current_value)) = self.effect_values.get(index) {
            if *current_key == key && *current_value == value {
                return;
            }
            self.effect_values[index] = (key, value);
            self.effect_values.truncate(self.validated);
        } else {
            self.effect_values.push((key, value));
        }
        self.changed = true;
    }

    /// Returns `true` when the sequence validated since
    /// [`begin_effect_validation`](Self::begin_effect_validation) is identical
    /// to the previous one.
    pub fn end_effect_validation(&mut self) -> bool {
        if self.validated < self.effect_values.len() {
            self.effect_values.truncate(self.validated);
            return false;
        }
        !self.changed
    }

    #[must_use]
    pub fn values(&self) -> &[(PermutationParameterKey, EffectParameterValue)] {
        &self.effect_values
    }

    #[must_use]
    pub fn compiler_parameters(&self) -> CompilerParameters {
        CompilerParameters {
            values: self.effect_values.clone(),
        }
    }
}

/// Permutation values handed to the effect compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerParameters {
    values: Vec<(PermutationParameterKey, EffectParameterValue)>,
}

impl CompilerParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: PermutationParameterKey, value: impl Into<EffectParameterValue>) {
        let value = value.into();
        if let Some(entry) = self.values.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.values.push((key, value));
        }
    }

    #[must_use]
    pub fn get(&self, key: PermutationParameterKey) -> Option<&EffectParameterValue> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PermutationParameterKey, EffectParameterValue)> {
        self.values.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Order-sensitive content hash, combined with the effect name by
    /// compilers to identify a permutation.
    #[must_use]
    pub fn hash(&self) -> ObjectId {
        let mut builder = ObjectIdBuilder::new();
        for (key, value) in &self.values {
            builder.write_str(key.name());
            value.write_hash(&mut builder);
        }
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(validator: &mut EffectValidator, values: &[(&str, i32)]) -> bool {
        validator.begin_effect_validation();
        for &(name, value) in values {
            validator.validate_parameter(PermutationParameterKey::new(name), value);
        }
        validator.end_effect_validation()
    }

    #[test]
    fn identical_sequence_is_unchanged() {
        let mut validator = EffectValidator::new();
        assert!(!validate(&mut validator, &[("A", 1), ("B", 2)]));
        assert!(validate(&mut validator, &[("A", 1), ("B", 2)]));
        assert!(validate(&mut validator, &[("A", 1), ("B", 2)]));
    }

    #[test]
    fn single_changed_value_is_detected() {
        let mut validator = EffectValidator::new();
        validate(&mut validator, &[("A", 1), ("B", 2)]);
        assert!(!validate(&mut validator, &[("A", 1), ("B", 3)]));
        assert_eq!(validator.values()[1].1, EffectParameterValue::Int(3));
    }

    #[test]
    fn shorter_sequence_truncates() {
        let mut validator = EffectValidator::new();
        validate(&mut validator, &[("A", 1), ("B", 2)]);
        assert!(!validate(&mut validator, &[("A", 1)]));
        assert_eq!(validator.values().len(), 1);
        assert!(validate(&mut validator, &[("A", 1)]));
    }

    #[test]
    fn compiler_parameter_hash_depends_on_values() {
        let key = PermutationParameterKey::new("Material.HasNormalMap");
        let mut a = CompilerParameters::new();
        a.set(key, true);
        let mut b = CompilerParameters::new();
        b.set(key, false);
        assert_ne!(a.hash(), b.hash());
        b.set(key, true);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(b.len(), 1);
    }
}

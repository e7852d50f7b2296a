//! Content Hashing
//!
//! [`ObjectId`] is a 128-bit xxh3 digest of a canonical byte encoding. Layouts,
//! constant buffers and effect bytecode are identified by it, so two
//! structurally identical descriptions always map to the same id.

use std::fmt;

use xxhash_rust::xxh3::xxh3_128;

/// 128-bit content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(u128);

impl ObjectId {
    /// Hash of nothing; used for layouts without constant buffers.
    pub const EMPTY: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(xxh3_128(bytes))
    }

    /// Order-dependent combination of two ids.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        let mut buffer = [0u8; 32];
        buffer[..16].copy_from_slice(&self.0.to_le_bytes());
        buffer[16..].copy_from_slice(&other.0.to_le_bytes());
        Self(xxh3_128(&buffer))
    }

    #[inline]
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Folds the id into 64 bits, for sort keys and `FxHashMap` lookups.
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        (self.0 ^ (self.0 >> 64)) as u64
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Accumulates a canonical byte encoding and digests it into an [`ObjectId`].
///
/// Strings are length-prefixed so that `("ab", "c")` and `("a", "bc")` differ.
#[derive(Debug, Default, Clone)]
pub struct ObjectIdBuilder {
    bytes: Vec<u8>,
}

impl ObjectIdBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.write_u32(value.len() as u32);
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_id(&mut self, value: ObjectId) -> &mut Self {
        self.bytes.extend_from_slice(&value.0.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    #[must_use]
    pub fn finish(&self) -> ObjectId {
        ObjectId::from_bytes(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_encodings_hash_equal() {
        let a = ObjectIdBuilder::new().write_str("PerView").write_u32(64).finish();
        let b = ObjectIdBuilder::new().write_str("PerView").write_u32(64).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn string_boundaries_are_significant() {
        let a = ObjectIdBuilder::new().write_str("ab").write_str("c").finish();
        let b = ObjectIdBuilder::new().write_str("a").write_str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn combine_is_order_dependent() {
        let a = ObjectId::from_bytes(b"layout");
        let b = ObjectId::from_bytes(b"cbuffer");
        assert_ne!(a.combine(b), b.combine(a));
        assert_eq!(a.combine(b), a.combine(b));
    }
}

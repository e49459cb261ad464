//! Definition hashing.
//!
//! A [`DefinitionHash`] fingerprints the registered data layout. Loop records
//! carry the hash of the definitions that produced them so a consumer can
//! reject payloads written against a different layout.

use std::fmt;

/// 128-bit fingerprint of the registered definitions, stored as four 32-bit
/// words in declared order (most significant word first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct DefinitionHash(pub [u32; 4]);

impl DefinitionHash {
    pub const fn new(w0: u32, w1: u32, w2: u32, w3: u32) -> Self {
        Self([w0, w1, w2, w3])
    }

    pub const fn words(&self) -> [u32; 4] {
        self.0
    }

    pub fn from_u128(value: u128) -> Self {
        Self([
            (value >> 96) as u32,
            (value >> 64) as u32,
            (value >> 32) as u32,
            value as u32,
        ])
    }

    pub fn to_u128(&self) -> u128 {
        let [w0, w1, w2, w3] = self.0;
        (u128::from(w0) << 96) | (u128::from(w1) << 64) | (u128::from(w2) << 32) | u128::from(w3)
    }
}

impl fmt::Display for DefinitionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [w0, w1, w2, w3] = self.0;
        write!(f, "{w0:08x}-{w1:08x}-{w2:08x}-{w3:08x}")
    }
}

/// Deterministic hasher for definition fingerprints.
///
/// Uses FNV-1a (128-bit). Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinitionHasher(u128);

impl DefinitionHasher {
    const FNV_OFFSET: u128 = 0x6c62272e07bb014262b821756295c58d;
    const FNV_PRIME: u128 = 0x0000000001000000000000000000013b;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u128::from(b);
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Feed a length-prefixed string, so `"ab" + "c"` and `"a" + "bc"` differ.
    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write(s.as_bytes());
    }

    pub fn finish(self) -> DefinitionHash {
        DefinitionHash::from_u128(self.0)
    }
}

impl Default for DefinitionHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_round_trip_through_u128() {
        let hash = DefinitionHash::new(1, 2, 3, 4);
        assert_eq!(DefinitionHash::from_u128(hash.to_u128()), hash);
        assert_eq!(hash.to_u128(), (1u128 << 96) | (2u128 << 64) | (3u128 << 32) | 4);
    }

    #[test]
    fn hasher_deterministic() {
        let mut h1 = DefinitionHasher::new();
        h1.write_str("actor");
        h1.write_u32(7);

        let mut h2 = DefinitionHasher::new();
        h2.write_str("actor");
        h2.write_u32(7);

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn hasher_order_matters() {
        let mut h1 = DefinitionHasher::new();
        h1.write_str("a");
        h1.write_str("b");

        let mut h2 = DefinitionHasher::new();
        h2.write_str("b");
        h2.write_str("a");

        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn string_boundaries_matter() {
        let mut h1 = DefinitionHasher::new();
        h1.write_str("ab");
        h1.write_str("c");

        let mut h2 = DefinitionHasher::new();
        h2.write_str("a");
        h2.write_str("bc");

        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn empty_input_is_fnv_offset() {
        let hash = DefinitionHasher::new().finish();
        assert_eq!(hash.to_u128(), 0x6c62272e07bb014262b821756295c58d);
    }

    #[test]
    fn display_is_grouped_hex() {
        let hash = DefinitionHash::new(0xdead_beef, 1, 2, 3);
        assert_eq!(hash.to_string(), "deadbeef-00000001-00000002-00000003");
    }
}

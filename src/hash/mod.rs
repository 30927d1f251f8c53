//! Stable content hashing.
//!
//! Cache keys and rendered-tile hashes must be identical across processes and
//! Rust releases, so [`std::collections::hash_map::DefaultHasher`] is not an
//! option. Everything here is FNV-1a, 64-bit, rendered as 16 lowercase hex
//! digits.

use std::hash::Hasher;

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic FNV-1a 64-bit hasher.
///
/// Feed it with [`Hasher::write`] only. The `Hash` impls of `str` and slices
/// append length prefixes and separators, which would make keys depend on how
/// the input was chunked.
///
/// # Examples
///
/// ```
/// use std::hash::Hasher;
/// use tilefetch::hash::Fnv1a64;
///
/// let mut h = Fnv1a64::new();
/// h.write(b"foo");
/// h.write(b"bar");
/// assert_eq!(h.hex(), "85944171f73967e8");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a64(u64);

impl Fnv1a64 {
    /// Creates a hasher seeded with the FNV offset basis.
    pub fn new() -> Self {
        Self(OFFSET_BASIS)
    }

    /// Returns the current digest as 16 zero-padded hex digits.
    pub fn hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv1a64 {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }
}

/// Hashes `bytes` in one shot and returns the hex digest.
pub fn hex_digest(bytes: impl AsRef<[u8]>) -> String {
    let mut h = Fnv1a64::new();
    h.write(bytes.as_ref());
    h.hex()
}

//! Row digests and the streaming engine that produces them

mod engine;
mod lazy;
mod positions;
mod quotes;

use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

pub use engine::{DigestStream, Engine};
pub use positions::Positions;

/// Fingerprint pair for one source row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Fingerprint of the key fields
    pub key: u64,
    /// Fingerprint of the value fields (or the whole row)
    pub value: u64,
    /// Original fields of the row
    pub source: Vec<String>,
}

/// Fingerprint of a byte string.
///
/// FxHasher with its fixed seed, so results are stable across runs on the
/// same target. FxHasher works on `usize` words: fingerprints differ between
/// 32-bit and 64-bit targets, and on 32-bit targets only the low 32 bits carry
/// entropy. Do not persist fingerprints or compare them across platforms.
///
/// Not collision free: two distinct inputs mapping to the same fingerprint
/// are treated as equal by the differ.
pub fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint(b"hundred-value"), fingerprint(b"hundred-value"));
        assert_ne!(fingerprint(b"two-value"), fingerprint(b"two-value-modified"));
    }

    #[test]
    fn test_fingerprint_empty_input() {
        assert_eq!(fingerprint(b""), fingerprint(&[]));
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_fingerprint_is_word_sized_on_32_bit() {
        assert_eq!(fingerprint(b"hundred-value") >> 32, 0);
    }
}

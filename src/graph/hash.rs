//! Path identity.
//!
//! A [`Hash`] is the primary key of the dependency graph. It is derived from
//! the textual form of a path, so two spellings of the same directory hash
//! differently; callers normalize paths before hashing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// 64-bit digest of a canonical path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(u64);

impl Hash {
    /// Digest of a string.
    pub fn of_str(s: &str) -> Self {
        let digest = blake3::hash(s.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[..8]);
        Hash(u64::from_le_bytes(word))
    }

    /// Digest of a path. The path is not canonicalized.
    pub fn of_path(path: &Path) -> Self {
        Self::of_str(&path.to_string_lossy())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Hash {
    fn from(value: u64) -> Self {
        Hash(value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Hash::of_path(Path::new("/work/src/github.com/acme/foo"));
        let b = Hash::of_path(&PathBuf::from("/work/src/github.com/acme/foo"));
        assert_eq!(a, b);
        assert_eq!(a, Hash::of_str("/work/src/github.com/acme/foo"));
    }

    #[test]
    fn test_hash_does_not_canonicalize() {
        let plain = Hash::of_str("/work/foo");
        let dotted = Hash::of_str("/work/./foo");
        let trailing = Hash::of_str("/work/foo/");
        assert_ne!(plain, dotted);
        assert_ne!(plain, trailing);
    }

    #[test]
    fn test_no_collisions_over_large_corpus() {
        let mut seen = HashSet::new();
        let mut count = 0;
        for a in 0..100 {
            for b in 0..100 {
                for c in 0..20 {
                    let path = format!("/go/src/example.com/mod{a}/pkg{b}/sub{c}");
                    assert!(seen.insert(Hash::of_str(&path)), "collision on {path}");
                    count += 1;
                }
            }
        }
        assert_eq!(seen.len(), count);
    }

    #[test]
    fn test_display_is_zero_padded_hex() {
        let h = Hash::from(0xabcu64);
        assert_eq!(h.to_string(), "0x0000000000000abc");
    }
}

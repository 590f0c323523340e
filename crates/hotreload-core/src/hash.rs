use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Length in bytes of a [`ContentHash`]
pub const HASH_LEN: usize = 32;

/// Blake3 digest of a unit's source text (or of any other byte sequence)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Hash raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Hash a unit's source text salted with the runtime version.
    ///
    /// Upgrading the runtime changes the salt, so every persisted entry
    /// stops matching without any explicit migration step.
    pub fn of_source(salt: &str, source: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(salt.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn from_raw(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 32-bit checksum used for signature and static-final stamps
pub fn checksum32(bytes: &[u8]) -> u32 {
    let digest = blake3::hash(bytes);
    let b = digest.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Structural hash over a source-root listing.
///
/// Only file identities take part; content edits leave it unchanged.
pub fn path_listing_hash(paths: &[PathBuf]) -> ContentHash {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = blake3::Hasher::new();
    for path in sorted {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"\n");
    }
    ContentHash(*hasher.finalize().as_bytes())
}

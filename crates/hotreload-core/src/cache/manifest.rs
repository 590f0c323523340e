use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{CacheError, Result, CACHE_VERSION, MANIFEST_FILE_NAME};

/// Identity of one run-mode partition of the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Schema version for the entry layout
    pub version: u32,

    /// Runtime version the partition's entries were salted with
    pub runtime_version: String,

    pub run_mode: String,

    /// Seconds since the Unix epoch when the partition was created
    pub created_at: u64,
}

impl CacheManifest {
    pub fn new(runtime_version: impl Into<String>, run_mode: impl Into<String>) -> Self {
        Self {
            version: CACHE_VERSION,
            runtime_version: runtime_version.into(),
            run_mode: run_mode.into(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Whether entries in this partition can be reused
    pub fn is_compatible(&self, runtime_version: &str, run_mode: &str) -> bool {
        self.version == CACHE_VERSION
            && self.runtime_version == runtime_version
            && self.run_mode == run_mode
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CacheError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CacheError::from)
    }

    /// Load the manifest of a partition; missing or unreadable yields `None`
    pub fn load(partition: &Path) -> Option<Self> {
        let bytes = std::fs::read(partition.join(MANIFEST_FILE_NAME)).ok()?;
        Self::from_bytes(&bytes).ok()
    }

    pub fn save(&self, partition: &Path) -> Result<()> {
        let path = partition.join(MANIFEST_FILE_NAME);
        let bytes = self.to_bytes()?;
        std::fs::write(&path, bytes).map_err(|e| CacheError::io(path, e))
    }
}

//! Persistent bytecode cache
//!
//! One entry file per unit, content-addressed by the unit's salted source
//! hash and validated recursively against the static-final checksums of
//! the unit's dependencies. Every entry is advisory: deleting the whole
//! cache is equivalent to a cold start.

mod entry;
mod error;
mod key;
mod manager;
mod manifest;

pub use entry::{CacheEntry, DependencyStamp, EntryHeader};
pub use error::{CacheError, Result};
pub use key::escape_name;
pub use manager::{BytecodeCache, CacheStats};
pub use manifest::CacheManifest;

/// Cache format version - increment when the entry layout changes
pub const CACHE_VERSION: u32 = 1;

/// Default cache directory name
pub const CACHE_DIR_NAME: &str = ".hotreload-cache";

/// Per-partition manifest file name
pub const MANIFEST_FILE_NAME: &str = "manifest.bin";

/// Extension of entry files
pub const ENTRY_EXTENSION: &str = "bc";

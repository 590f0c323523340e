use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    escape_name, CacheEntry, CacheError, CacheManifest, DependencyStamp, EntryHeader, Result,
    ENTRY_EXTENSION,
};
use crate::adapters::EnhanceAdapter;
use crate::hash::ContentHash;
use crate::registry::{SourceRegistry, SourceUnit};

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
}

/// Persistent, content-addressed cache of enhanced bytecode
pub struct BytecodeCache {
    /// `cache_dir/run_mode`
    partition: PathBuf,

    /// Runtime version mixed into every content hash
    salt: String,

    run_mode: String,

    registry: Arc<SourceRegistry>,

    /// Recomputes static-final checksums from compiled constant pools
    constants: Option<Arc<dyn EnhanceAdapter>>,

    store_lock: Mutex<()>,

    /// Opened for inspection; never writes to disk
    read_only: bool,

    counters: Counters,
}

impl BytecodeCache {
    /// Open the partition for `run_mode` under `cache_dir`.
    ///
    /// Never fails: an incompatible or unreadable partition is wiped and
    /// recreated, and if even that fails every lookup simply misses.
    pub fn open(
        cache_dir: &Path,
        run_mode: &str,
        runtime_version: &str,
        registry: Arc<SourceRegistry>,
    ) -> Self {
        let cache = Self::new(cache_dir, run_mode, runtime_version, registry, false);

        match CacheManifest::load(&cache.partition) {
            Some(manifest) if manifest.is_compatible(runtime_version, run_mode) => {
                debug!("Opened cache partition {:?}", cache.partition);
            }
            Some(manifest) => {
                info!(
                    "Cache partition {:?} was written by {} (format {}), starting fresh",
                    cache.partition, manifest.runtime_version, manifest.version
                );
                if let Err(e) = cache.clear() {
                    warn!("Failed to reset cache partition: {}", e);
                }
            }
            None => {
                if let Err(e) = cache.clear() {
                    warn!("Failed to initialize cache partition: {}", e);
                }
            }
        }
        cache
    }

    /// Open an existing partition for inspection without touching it.
    ///
    /// Fails instead of wiping when the manifest is missing or was written
    /// by another runtime version; stores on the result are rejected.
    pub fn open_existing(
        cache_dir: &Path,
        run_mode: &str,
        runtime_version: &str,
        registry: Arc<SourceRegistry>,
    ) -> Result<Self> {
        let cache = Self::new(cache_dir, run_mode, runtime_version, registry, true);
        match CacheManifest::load(&cache.partition) {
            Some(manifest) if manifest.is_compatible(runtime_version, run_mode) => Ok(cache),
            Some(manifest) => Err(CacheError::Unusable {
                path: cache.partition,
                reason: format!(
                    "written by {} (format {})",
                    manifest.runtime_version, manifest.version
                ),
            }),
            None => Err(CacheError::Unusable {
                path: cache.partition,
                reason: "missing or unreadable manifest".to_string(),
            }),
        }
    }

    fn new(
        cache_dir: &Path,
        run_mode: &str,
        runtime_version: &str,
        registry: Arc<SourceRegistry>,
        read_only: bool,
    ) -> Self {
        Self {
            partition: cache_dir.join(run_mode),
            salt: runtime_version.to_string(),
            run_mode: run_mode.to_string(),
            registry,
            constants: None,
            store_lock: Mutex::new(()),
            read_only,
            counters: Counters::default(),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly {
                path: self.partition.clone(),
            });
        }
        Ok(())
    }

    /// Use `adapter` to compute unknown dependency checksums on store
    pub fn with_constant_reader(mut self, adapter: Arc<dyn EnhanceAdapter>) -> Self {
        self.constants = Some(adapter);
        self
    }

    pub fn partition(&self) -> &Path {
        &self.partition
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.partition
            .join(format!("{}.{}", escape_name(name), ENTRY_EXTENSION))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Cached bytecode for `name`, if its entry is still valid.
    ///
    /// With `source_override` the entry is checked against that text;
    /// otherwise against the unit's current source, refreshing the unit
    /// first when its file changed.
    pub fn lookup(&self, name: &str, source_override: Option<&str>) -> Option<Vec<u8>> {
        let result = self.lookup_entry(name, source_override);
        let counter = if result.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn lookup_entry(&self, name: &str, source_override: Option<&str>) -> Option<Vec<u8>> {
        let unit = self.registry.get_or_create(name)?;
        let hash = self.current_hash(&unit, source_override)?;
        let entry = self.read_entry(name)?;

        let mut visited = FxHashSet::default();
        visited.insert(name.to_string());
        if !self.header_valid(&unit, &hash, &entry.header, &mut visited) {
            debug!("Cache miss: {}", name);
            return None;
        }
        debug!("Cache hit: {}", name);
        Some(entry.bytecode)
    }

    fn current_hash(&self, unit: &SourceUnit, source_override: Option<&str>) -> Option<ContentHash> {
        if let Some(source) = source_override {
            return Some(ContentHash::of_source(&self.salt, source));
        }
        if self.registry.is_stale(unit) {
            self.registry.refresh(unit);
        }
        self.registry.load_source(unit).ok()?;
        unit.content_hash(&self.salt)
    }

    /// Validate one dependency; already-visited names count as valid so
    /// cycles terminate
    fn dependency_valid(&self, name: &str, visited: &mut FxHashSet<String>) -> bool {
        if !visited.insert(name.to_string()) {
            return true;
        }
        let Some(unit) = self.registry.get_or_create(name) else {
            debug!("Dependency {} no longer exists", name);
            return false;
        };
        let Some(hash) = self.current_hash(&unit, None) else {
            return false;
        };
        let Some(header) = self.read_header(name) else {
            return false;
        };
        self.header_valid(&unit, &hash, &header, visited)
    }

    fn header_valid(
        &self,
        unit: &SourceUnit,
        hash: &ContentHash,
        header: &EntryHeader,
        visited: &mut FxHashSet<String>,
    ) -> bool {
        if header.source_hash != *hash {
            debug!("Source hash changed for {}", unit.name());
            return false;
        }

        for dep in &header.dependencies {
            if !self.dependency_valid(&dep.name, visited) {
                debug!("{} invalidated by dependency {}", unit.name(), dep.name);
                return false;
            }
            // a unit still being validated higher up the stack has no stamp
            // yet; its own header carries the checksum it will be stamped with
            let current = self
                .registry
                .get(&dep.name)
                .and_then(|u| u.static_final_checksum())
                .or_else(|| self.read_header(&dep.name).map(|h| h.static_final_checksum));
            if current != Some(dep.static_final_checksum) {
                debug!(
                    "{} invalidated: constants of {} changed",
                    unit.name(),
                    dep.name
                );
                return false;
            }
        }

        unit.set_checksums(header.signature_checksum, header.static_final_checksum);
        true
    }

    /// Persist enhanced bytecode for `name`, compiled from `source`
    pub fn store(&self, name: &str, bytecode: &[u8], source: &str) -> Result<()> {
        self.check_writable()?;
        let unit = self
            .registry
            .get_or_create(name)
            .ok_or_else(|| CacheError::UnknownUnit {
                name: name.to_string(),
            })?;

        let dependencies: Vec<DependencyStamp> = unit
            .dependencies()
            .into_iter()
            .filter(|dep| dep != name)
            .filter_map(|dep| {
                let checksum = self.static_final_of(&dep);
                // constant-free dependencies cannot change what was compiled in
                (checksum != 0).then_some(DependencyStamp {
                    name: dep,
                    static_final_checksum: checksum,
                })
            })
            .collect();

        let entry = CacheEntry {
            header: EntryHeader {
                source_hash: ContentHash::of_source(&self.salt, source),
                signature_checksum: unit.signature_checksum().unwrap_or(0),
                static_final_checksum: unit.static_final_checksum().unwrap_or(0),
                dependencies,
            },
            bytecode: bytecode.to_vec(),
        };
        let bytes = entry.to_bytes()?;

        let _guard = self.store_lock.lock();
        std::fs::create_dir_all(&self.partition)
            .map_err(|e| CacheError::io(&self.partition, e))?;
        let path = self.entry_path(name);
        let tmp = path.with_extension(format!("{}.tmp", ENTRY_EXTENSION));
        std::fs::write(&tmp, &bytes).map_err(|e| CacheError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))?;

        self.counters.stores.fetch_add(1, Ordering::Relaxed);
        debug!("Stored {} ({} bytes)", name, bytecode.len());
        Ok(())
    }

    /// Static-final checksum of a dependency, computed lazily
    fn static_final_of(&self, name: &str) -> u32 {
        let Some(unit) = self.registry.get_or_create(name) else {
            return 0;
        };
        if let Some(checksum) = unit.static_final_checksum() {
            return checksum;
        }
        if let (Some(adapter), Some(bytecode)) = (&self.constants, unit.bytecode()) {
            let checksum = adapter.constant_checksum(&bytecode);
            unit.set_static_final_checksum(checksum);
            return checksum;
        }
        self.read_header(name)
            .map(|h| h.static_final_checksum)
            .unwrap_or(0)
    }

    /// Delete the entry for `name`
    pub fn invalidate(&self, name: &str) {
        if self.read_only {
            return;
        }
        let path = self.entry_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                debug!("Invalidated {}", name);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete cache entry {:?}: {}", path, e),
        }
    }

    /// Delete the whole partition and start over with a fresh manifest
    pub fn clear(&self) -> Result<()> {
        self.check_writable()?;
        let _guard = self.store_lock.lock();
        if self.partition.exists() {
            std::fs::remove_dir_all(&self.partition)
                .map_err(|e| CacheError::io(&self.partition, e))?;
        }
        std::fs::create_dir_all(&self.partition)
            .map_err(|e| CacheError::io(&self.partition, e))?;
        CacheManifest::new(self.salt.clone(), self.run_mode.clone()).save(&self.partition)?;
        info!("Cache cleared: {:?}", self.partition);
        Ok(())
    }

    /// Decode the entry for `name`, surfacing corruption instead of
    /// treating it as a miss. `Ok(None)` when there is no entry.
    pub fn inspect(&self, name: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(name);
        match std::fs::read(&path) {
            Ok(bytes) => CacheEntry::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    fn read_entry(&self, name: &str) -> Option<CacheEntry> {
        match self.inspect(name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring cache entry for {}: {}", name, e);
                None
            }
        }
    }

    fn read_header(&self, name: &str) -> Option<EntryHeader> {
        let path = self.entry_path(name);
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to open cache entry {:?}: {}", path, e);
                return None;
            }
        };
        match EntryHeader::read_from(&mut BufReader::new(file)) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!("Ignoring cache header for {}: {}", name, e);
                None
            }
        }
    }
}

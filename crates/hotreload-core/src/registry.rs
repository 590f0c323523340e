//! In-memory table of source units and their derived state.
//!
//! Reads go through a concurrent map and never block. Creation, removal and
//! refresh are serialized by one registry-wide lock; they are rare compared
//! to lookups.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use crate::fs::{outer_name, SourceLocator};
use crate::hash::ContentHash;

#[derive(Debug, Default)]
struct UnitState {
    source: Option<Arc<str>>,
    hash: Option<ContentHash>,
    bytecode: Option<Arc<[u8]>>,
    enhanced_bytecode: Option<Arc<[u8]>>,
    timestamp: Option<SystemTime>,
    signature_checksum: Option<u32>,
    static_final_checksum: Option<u32>,
    dependencies: BTreeSet<String>,
    compiled: bool,
    enhanced: bool,
}

impl UnitState {
    /// Derived state may only be recorded against the source it came from
    fn holds(&self, source: &Arc<str>) -> bool {
        self.source
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, source))
    }
}

/// One independently nameable source item.
///
/// Several units may share a backing file (`Outer` and `Outer$Inner`).
#[derive(Debug)]
pub struct SourceUnit {
    name: String,
    path: PathBuf,
    state: RwLock<UnitState>,
}

impl SourceUnit {
    fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            state: RwLock::new(UnitState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> Option<Arc<str>> {
        self.state.read().source.clone()
    }

    /// Content hash of the current source, computed once per source version
    pub fn content_hash(&self, salt: &str) -> Option<ContentHash> {
        if let Some(hash) = self.state.read().hash {
            return Some(hash);
        }
        let mut state = self.state.write();
        let hash = ContentHash::of_source(salt, state.source.as_deref()?);
        state.hash = Some(hash);
        Some(hash)
    }

    /// Modification time of the file when its source was read
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.state.read().timestamp
    }

    pub fn bytecode(&self) -> Option<Arc<[u8]>> {
        self.state.read().bytecode.clone()
    }

    pub fn enhanced_bytecode(&self) -> Option<Arc<[u8]>> {
        self.state.read().enhanced_bytecode.clone()
    }

    pub fn signature_checksum(&self) -> Option<u32> {
        self.state.read().signature_checksum
    }

    pub fn static_final_checksum(&self) -> Option<u32> {
        self.state.read().static_final_checksum
    }

    pub fn dependencies(&self) -> BTreeSet<String> {
        self.state.read().dependencies.clone()
    }

    pub fn is_compiled(&self) -> bool {
        self.state.read().compiled
    }

    pub fn is_enhanced(&self) -> bool {
        self.state.read().enhanced
    }

    /// Record raw compiler output. Returns `false` (and records nothing) if
    /// the unit was refreshed since `source` was read.
    pub fn set_compiled(
        &self,
        source: &Arc<str>,
        bytecode: Vec<u8>,
        dependencies: BTreeSet<String>,
    ) -> bool {
        let mut state = self.state.write();
        if !state.holds(source) {
            return false;
        }
        state.bytecode = Some(bytecode.into());
        state.dependencies = dependencies;
        state.compiled = true;
        state.enhanced = false;
        state.enhanced_bytecode = None;
        true
    }

    /// Record enhancer output for the source the raw bytecode came from
    pub fn set_enhanced(
        &self,
        source: &Arc<str>,
        enhanced_bytecode: Vec<u8>,
        signature_checksum: u32,
        static_final_checksum: u32,
    ) -> bool {
        let mut state = self.state.write();
        if !state.holds(source) {
            return false;
        }
        state.enhanced_bytecode = Some(enhanced_bytecode.into());
        state.signature_checksum = Some(signature_checksum);
        state.static_final_checksum = Some(static_final_checksum);
        state.enhanced = true;
        true
    }

    /// Adopt bytecode served from the persistent cache
    pub fn set_cached(&self, source: &Arc<str>, enhanced_bytecode: Arc<[u8]>) -> bool {
        let mut state = self.state.write();
        if !state.holds(source) {
            return false;
        }
        state.enhanced_bytecode = Some(enhanced_bytecode);
        state.enhanced = true;
        true
    }

    /// Stamp checksums read back from a validated cache header
    pub fn set_checksums(&self, signature_checksum: u32, static_final_checksum: u32) {
        let mut state = self.state.write();
        state.signature_checksum = Some(signature_checksum);
        state.static_final_checksum = Some(static_final_checksum);
    }

    pub fn set_static_final_checksum(&self, checksum: u32) {
        self.state.write().static_final_checksum = Some(checksum);
    }

    fn reset(&self) {
        *self.state.write() = UnitState::default();
    }
}

#[derive(Debug, Default)]
struct RegistryIndex {
    /// file -> every unit backed by it
    files: FxHashMap<PathBuf, BTreeSet<String>>,
    /// names that resolved to no file
    missing: FxHashSet<String>,
}

pub struct SourceRegistry {
    locator: Arc<SourceLocator>,
    units: DashMap<String, Arc<SourceUnit>>,
    index: Mutex<RegistryIndex>,
}

impl SourceRegistry {
    pub fn new(locator: Arc<SourceLocator>) -> Self {
        Self {
            locator,
            units: DashMap::new(),
            index: Mutex::new(RegistryIndex::default()),
        }
    }

    pub fn locator(&self) -> &Arc<SourceLocator> {
        &self.locator
    }

    /// Lock-free lookup of an existing unit
    pub fn get(&self, name: &str) -> Option<Arc<SourceUnit>> {
        self.units.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look a unit up, creating it from the source roots on first reference
    pub fn get_or_create(&self, name: &str) -> Option<Arc<SourceUnit>> {
        if let Some(unit) = self.get(name) {
            return Some(unit);
        }

        let mut index = self.index.lock();
        if let Some(unit) = self.get(name) {
            return Some(unit);
        }
        if index.missing.contains(name) {
            return None;
        }

        match self.locator.locate(name) {
            Some(path) => {
                let unit = Arc::new(SourceUnit::new(name, path.clone()));
                index
                    .files
                    .entry(path)
                    .or_default()
                    .insert(name.to_string());
                self.units.insert(name.to_string(), Arc::clone(&unit));
                debug!("Registered unit {}", name);
                Some(unit)
            }
            None => {
                debug!("No source for {}, caching negative lookup", name);
                index.missing.insert(name.to_string());
                None
            }
        }
    }

    /// Read the unit's source if it is not loaded yet, recording the file's
    /// modification time as the unit's timestamp.
    pub fn load_source(&self, unit: &SourceUnit) -> io::Result<Arc<str>> {
        if let Some(source) = unit.source() {
            return Ok(source);
        }

        let fs = self.locator.fs();
        // stat before read: a write racing the read leaves the unit stale,
        // never falsely fresh
        let modified = fs.modified(&unit.path)?;
        let text: Arc<str> = fs.read_file(&unit.path)?.into();

        let mut state = unit.state.write();
        if let Some(source) = &state.source {
            return Ok(Arc::clone(source));
        }
        state.source = Some(Arc::clone(&text));
        state.timestamp = Some(modified);
        state.hash = None;
        Ok(text)
    }

    /// Whether the file changed since the unit's source was read.
    ///
    /// Units whose source was never read are not stale; a vanished file is.
    pub fn is_stale(&self, unit: &SourceUnit) -> bool {
        let Some(recorded) = unit.timestamp() else {
            return false;
        };
        match self.locator.fs().modified(&unit.path) {
            Ok(modified) => modified != recorded,
            Err(_) => true,
        }
    }

    /// Clear every derived field of a unit in one step
    pub fn refresh(&self, unit: &SourceUnit) {
        let _index = self.index.lock();
        unit.reset();
        debug!("Refreshed unit {}", unit.name);
    }

    /// Remove a unit. Removing an outer unit cascades to every unit sharing
    /// its file. Returns the removed names.
    pub fn remove(&self, name: &str) -> Vec<String> {
        let Some(unit) = self.get(name) else {
            return Vec::new();
        };
        if outer_name(name) == name {
            return self.remove_by_file(&unit.path);
        }

        let mut index = self.index.lock();
        self.units.remove(name);
        if let Some(names) = index.files.get_mut(&unit.path) {
            names.remove(name);
            if names.is_empty() {
                index.files.remove(&unit.path);
            }
        }
        vec![name.to_string()]
    }

    /// Remove every unit backed by `path`
    pub fn remove_by_file(&self, path: &Path) -> Vec<String> {
        let mut index = self.index.lock();
        let names: Vec<String> = index
            .files
            .remove(path)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for name in &names {
            self.units.remove(name);
        }
        if !names.is_empty() {
            debug!("Removed {} unit(s) backed by {:?}", names.len(), path);
        }
        names
    }

    /// A file appeared: forget negative lookups so new names can resolve
    pub fn notify_file_created(&self, path: &Path) {
        let mut index = self.index.lock();
        if !index.missing.is_empty() {
            debug!("File created at {:?}, clearing negative lookups", path);
            index.missing.clear();
        }
    }

    /// Units backed by `path`
    pub fn names_for_file(&self, path: &Path) -> Vec<String> {
        self.index
            .lock()
            .files
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every file currently backing at least one unit
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.index.lock().files.keys().cloned().collect();
        files.sort();
        files
    }

    /// Snapshot of all units, sorted by name
    pub fn units(&self) -> Vec<Arc<SourceUnit>> {
        let mut units: Vec<Arc<SourceUnit>> = self
            .units
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn registry() -> (Arc<MockFileSystem>, SourceRegistry) {
        let fs = Arc::new(MockFileSystem::new());
        let locator = SourceLocator::new(fs.clone(), vec![PathBuf::from("/src")], "src");
        (fs, SourceRegistry::new(Arc::new(locator)))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "class Foo");

        let a = registry.get_or_create("Foo").unwrap();
        let b = registry.get_or_create("Foo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_negative_lookup_cached_until_creation() {
        let (fs, registry) = registry();
        assert!(registry.get_or_create("Foo").is_none());

        fs.write_file("/src/Foo.src", "class Foo");
        assert!(
            registry.get_or_create("Foo").is_none(),
            "negative lookups stay cached until a creation notification"
        );

        registry.notify_file_created(Path::new("/src/Foo.src"));
        assert!(registry.get_or_create("Foo").is_some());
    }

    #[test]
    fn test_refresh_clears_all_derived_state() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "class Foo");
        let unit = registry.get_or_create("Foo").unwrap();
        let source = registry.load_source(&unit).unwrap();
        assert!(unit.content_hash("v1").is_some());
        assert!(unit.set_compiled(&source, vec![1, 2, 3], BTreeSet::from(["Bar".to_string()])));
        assert!(unit.set_enhanced(&source, vec![4], 7, 9));

        registry.refresh(&unit);

        assert!(unit.source().is_none());
        assert!(unit.timestamp().is_none());
        assert!(unit.bytecode().is_none());
        assert!(unit.enhanced_bytecode().is_none());
        assert!(unit.signature_checksum().is_none());
        assert!(unit.static_final_checksum().is_none());
        assert!(unit.dependencies().is_empty());
        assert!(!unit.is_compiled());
        assert!(!unit.is_enhanced());
    }

    #[test]
    fn test_compile_output_for_old_source_is_discarded() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "v1");
        let unit = registry.get_or_create("Foo").unwrap();
        let old = registry.load_source(&unit).unwrap();

        registry.refresh(&unit);
        fs.write_file("/src/Foo.src", "v2");
        registry.load_source(&unit).unwrap();

        assert!(!unit.set_compiled(&old, vec![1], BTreeSet::new()));
        assert!(unit.bytecode().is_none());
    }

    #[test]
    fn test_staleness_follows_mtime() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "v1");
        let unit = registry.get_or_create("Foo").unwrap();
        assert!(!registry.is_stale(&unit), "never-read units are not stale");

        registry.load_source(&unit).unwrap();
        assert!(!registry.is_stale(&unit));

        fs.write_file("/src/Foo.src", "v2");
        assert!(registry.is_stale(&unit));
    }

    #[test]
    fn test_vanished_file_is_stale() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "v1");
        let unit = registry.get_or_create("Foo").unwrap();
        registry.load_source(&unit).unwrap();

        fs.remove_file(Path::new("/src/Foo.src"));
        assert!(registry.is_stale(&unit));
    }

    #[test]
    fn test_removing_outer_unit_cascades() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "class Foo");
        registry.get_or_create("Foo").unwrap();
        registry.get_or_create("Foo$Inner").unwrap();
        registry.get_or_create("Foo$Inner$Deep").unwrap();

        let mut removed = registry.remove("Foo");
        removed.sort();
        assert_eq!(removed, vec!["Foo", "Foo$Inner", "Foo$Inner$Deep"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removing_nested_unit_keeps_outer() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "class Foo");
        registry.get_or_create("Foo").unwrap();
        registry.get_or_create("Foo$Inner").unwrap();

        assert_eq!(registry.remove("Foo$Inner"), vec!["Foo$Inner"]);
        assert!(registry.get("Foo").is_some());
        assert_eq!(registry.names_for_file(Path::new("/src/Foo.src")), vec!["Foo"]);
    }

    #[test]
    fn test_remove_by_file() {
        let (fs, registry) = registry();
        fs.write_file("/src/Foo.src", "class Foo");
        fs.write_file("/src/Bar.src", "class Bar");
        registry.get_or_create("Foo").unwrap();
        registry.get_or_create("Foo$Inner").unwrap();
        registry.get_or_create("Bar").unwrap();

        let removed = registry.remove_by_file(Path::new("/src/Foo.src"));
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.files(), vec![PathBuf::from("/src/Bar.src")]);
    }
}

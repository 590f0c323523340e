//! Change detection and hot-swap classification.
//!
//! One pass walks `Idle -> Scanning -> Recompiling -> {HotSwapReady |
//! SignatureDirty} -> {ApplyHotSwap | RequireRestart} -> Idle`. Passes are
//! serialized; a watcher only flags that a rescan is needed and records
//! deletions, the pass itself runs on whichever thread calls
//! [`ChangeDetector::detect_changes`].
//!
//! A pass holds the write side of the pass lock. The loader takes the read
//! side, so no request sees a batch half redefined.

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::adapters::{
    CompileAdapter, CompileRequest, EnhanceAdapter, EnhanceRequest, HotSwapFacility, Redefinition,
    UnsupportedHotSwap,
};
use crate::cache::BytecodeCache;
use crate::class::{ClassOrigin, ClassTable};
use crate::diagnostics::CompileDiagnostic;
use crate::errors::{ReloadError, RestartReason, Result};
use crate::fs::outer_name;
use crate::generation::WorldGeneration;
use crate::hash::{path_listing_hash, ContentHash};
use crate::registry::{SourceRegistry, SourceUnit};
use crate::watcher::{FileWatcher, WatchError, WatchEvent, WatchEventKind, WatchToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Scanning,
    Recompiling,
    HotSwapReady,
    SignatureDirty,
    ApplyHotSwap,
    RequireRestart,
}

/// Outcome of a pass that did not require a restart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Units whose bytecode was rebuilt, sorted
    pub recompiled: Vec<String>,
    /// Defined classes redefined in place
    pub hot_swapped: Vec<String>,
    /// World generation after the pass
    pub generation: u64,
}

impl PassReport {
    pub fn is_unchanged(&self) -> bool {
        self.recompiled.is_empty()
    }
}

/// Written by the watcher thread, drained by the next pass
#[derive(Debug, Default)]
struct WatchSignals {
    rescan: AtomicBool,
    deleted: Mutex<Vec<PathBuf>>,
    attached: AtomicBool,
}

struct Attachment {
    watcher: Arc<dyn FileWatcher>,
    tokens: Vec<WatchToken>,
}

/// A unit whose last compile failed
#[derive(Debug, Clone, Copy)]
struct Pending {
    previous_signature: Option<u32>,
    /// Modification time of the failing file; `None` retries unconditionally
    modified: Option<SystemTime>,
}

struct Changed {
    unit: Arc<SourceUnit>,
    previous_signature: Option<u32>,
}

pub struct ChangeDetector {
    registry: Arc<SourceRegistry>,
    cache: Arc<BytecodeCache>,
    classes: Arc<ClassTable>,
    generation: Arc<WorldGeneration>,
    compiler: Arc<dyn CompileAdapter>,
    enhancer: Arc<dyn EnhanceAdapter>,
    hot_swap: Arc<dyn HotSwapFacility>,
    hot_swap_enabled: bool,

    pass_lock: Arc<RwLock<()>>,
    state: Mutex<DetectorState>,
    signals: Arc<WatchSignals>,
    retry: Mutex<BTreeMap<String, Pending>>,
    listing: Mutex<ContentHash>,
    attachment: Mutex<Option<Attachment>>,
}

impl ChangeDetector {
    /// Create a detector with hot swap disabled. The current source-root
    /// listing becomes the baseline for structural changes.
    pub fn new(
        registry: Arc<SourceRegistry>,
        cache: Arc<BytecodeCache>,
        classes: Arc<ClassTable>,
        generation: Arc<WorldGeneration>,
        compiler: Arc<dyn CompileAdapter>,
        enhancer: Arc<dyn EnhanceAdapter>,
    ) -> Self {
        let listing = path_listing_hash(&registry.locator().list_sources());
        Self {
            registry,
            cache,
            classes,
            generation,
            compiler,
            enhancer,
            hot_swap: Arc::new(UnsupportedHotSwap),
            hot_swap_enabled: false,
            pass_lock: Arc::new(RwLock::new(())),
            state: Mutex::new(DetectorState::Idle),
            signals: Arc::new(WatchSignals::default()),
            retry: Mutex::new(BTreeMap::new()),
            listing: Mutex::new(listing),
            attachment: Mutex::new(None),
        }
    }

    pub fn with_hot_swap(mut self, facility: Arc<dyn HotSwapFacility>, enabled: bool) -> Self {
        self.hot_swap = facility;
        self.hot_swap_enabled = enabled;
        self
    }

    /// Lock whose write side a pass holds; readers wait for the pass
    pub fn pass_lock(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.pass_lock)
    }

    pub fn state(&self) -> DetectorState {
        *self.state.lock()
    }

    fn set_state(&self, state: DetectorState) {
        *self.state.lock() = state;
    }

    /// Force the next pass to scan even with a watcher attached
    pub fn request_rescan(&self) {
        self.signals.rescan.store(true, Ordering::Release);
    }

    /// Watch every source root. Events only flag a rescan and record
    /// creations and deletions.
    pub fn attach_watcher(&self, watcher: Arc<dyn FileWatcher>) -> std::result::Result<Vec<WatchToken>, WatchError> {
        self.detach_watcher();

        let kinds = [
            WatchEventKind::Created,
            WatchEventKind::Modified,
            WatchEventKind::Removed,
        ];
        let mut tokens = Vec::new();
        for root in self.registry.locator().roots() {
            let signals = Arc::clone(&self.signals);
            let registry = Arc::clone(&self.registry);
            let callback = Box::new(move |event: &WatchEvent| {
                match event.kind {
                    WatchEventKind::Removed => {
                        signals.deleted.lock().extend(event.paths.iter().cloned());
                    }
                    WatchEventKind::Created => {
                        for path in &event.paths {
                            registry.notify_file_created(path);
                        }
                    }
                    WatchEventKind::Modified => {}
                }
                signals.rescan.store(true, Ordering::Release);
            });

            match watcher.register_watcher(root, &kinds, callback) {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    for token in tokens {
                        let _ = watcher.unregister_watcher(token);
                    }
                    return Err(e);
                }
            }
        }

        self.signals.attached.store(true, Ordering::Release);
        *self.attachment.lock() = Some(Attachment {
            watcher,
            tokens: tokens.clone(),
        });
        debug!("Watcher attached to {} root(s)", tokens.len());
        Ok(tokens)
    }

    pub fn detach_watcher(&self) {
        let Some(attachment) = self.attachment.lock().take() else {
            return;
        };
        self.signals.attached.store(false, Ordering::Release);
        for token in attachment.tokens {
            if let Err(e) = attachment.watcher.unregister_watcher(token) {
                warn!("Failed to unregister watch {:?}: {}", token, e);
            }
        }
    }

    /// Run one detection pass.
    ///
    /// With a watcher attached and no event since the last pass this is a
    /// no-op. Returns `Err(RestartRequired)` when the change cannot be
    /// absorbed in place and `Err(Compile)` on the first compile error.
    pub fn detect_changes(&self) -> Result<PassReport> {
        let _pass = self.pass_lock.write();

        if self.signals.attached.load(Ordering::Acquire)
            && !self.signals.rescan.swap(false, Ordering::AcqRel)
        {
            return Ok(PassReport {
                generation: self.generation.current(),
                ..PassReport::default()
            });
        }

        let result = self.run_pass();
        self.set_state(DetectorState::Idle);
        result
    }

    fn run_pass(&self) -> Result<PassReport> {
        self.set_state(DetectorState::Scanning);
        let deleted = self.drain_deletions();
        let changed = self.scan();

        let mut report = PassReport::default();
        let mut dirty = Vec::new();
        if !changed.is_empty() {
            self.set_state(DetectorState::Recompiling);
            let (recompiled, signature_changed) = self.recompile(&changed)?;
            if !recompiled.is_empty() {
                self.generation.advance();
            }
            report.recompiled = recompiled;
            dirty = signature_changed;
            self.set_state(if dirty.is_empty() {
                DetectorState::HotSwapReady
            } else {
                DetectorState::SignatureDirty
            });
        }

        // structural changes win over anything the swap could absorb
        self.check_source_set(deleted)?;

        if !dirty.is_empty() {
            return Err(self.require_restart(RestartReason::SignatureChanged { units: dirty }));
        }
        if !report.recompiled.is_empty() {
            report.hot_swapped = self.apply_hot_swap(&report.recompiled)?;
        }

        report.generation = self.generation.current();
        if !report.is_unchanged() {
            info!(
                "Recompiled {} unit(s), hot swapped {}",
                report.recompiled.len(),
                report.hot_swapped.len()
            );
        }
        Ok(report)
    }

    fn require_restart(&self, reason: RestartReason) -> ReloadError {
        self.set_state(DetectorState::RequireRestart);
        info!("Restart required: {}", reason);
        ReloadError::RestartRequired(reason)
    }

    /// Remove units whose files the watcher saw disappear
    fn drain_deletions(&self) -> Vec<String> {
        let paths = std::mem::take(&mut *self.signals.deleted.lock());
        let fs = self.registry.locator().fs();
        paths
            .iter()
            .filter(|path| !fs.exists(path))
            .flat_map(|path| self.registry.remove_by_file(path))
            .collect()
    }

    /// Units whose file changed since their source was read, failed units
    /// whose file changed since the failure, and defined classes whose
    /// running bytecode was built from an older source
    fn scan(&self) -> BTreeMap<String, Changed> {
        let fs = self.registry.locator().fs();
        let mut changed = BTreeMap::new();

        let waiting: FxHashSet<String> = {
            let mut retry = self.retry.lock();
            let pending = std::mem::take(&mut *retry);
            for (name, entry) in pending {
                let Some(path) = self.registry.locator().locate(&name) else {
                    continue;
                };
                if entry.modified.is_some() && fs.modified(&path).ok() == entry.modified {
                    retry.insert(name, entry);
                    continue;
                }
                let Some(unit) = self.registry.get_or_create(&name) else {
                    continue;
                };
                changed.insert(
                    name,
                    Changed {
                        unit,
                        previous_signature: entry.previous_signature,
                    },
                );
            }
            retry.keys().cloned().collect()
        };

        for unit in self.registry.units() {
            if changed.contains_key(unit.name()) {
                continue;
            }
            if unit.timestamp().is_some() && self.registry.is_stale(&unit) && fs.exists(unit.path()) {
                let previous_signature = match self.classes.get(unit.name()).and_then(|c| c.origin()) {
                    Some(origin) => origin.signature_checksum,
                    None => unit.signature_checksum(),
                };
                changed.insert(
                    unit.name().to_string(),
                    Changed {
                        unit,
                        previous_signature,
                    },
                );
            }
        }

        // a load may have refreshed a defined class's unit without the class
        // itself being redefined
        for class in self.classes.all() {
            let name = class.name();
            if changed.contains_key(name) || waiting.contains(name) {
                continue;
            }
            let Some(origin) = class.origin() else {
                continue;
            };
            let Some(unit) = self.registry.get_or_create(name) else {
                continue;
            };
            if !fs.exists(unit.path()) || self.registry.load_source(&unit).is_err() {
                continue;
            }
            if unit.content_hash(self.cache.salt()) != Some(origin.source_hash) {
                debug!("{} is running bytecode from an older source", name);
                changed.insert(
                    name.to_string(),
                    Changed {
                        unit,
                        previous_signature: origin.signature_checksum,
                    },
                );
            }
        }

        if !changed.is_empty() {
            debug!("Scan found {} changed unit(s)", changed.len());
        }
        changed
    }

    /// Compile and enhance the changed set, storing every result. Returns
    /// the recompiled names and those whose signature changed.
    fn recompile(&self, changed: &BTreeMap<String, Changed>) -> Result<(Vec<String>, Vec<String>)> {
        let mut sources: BTreeMap<&str, Arc<str>> = BTreeMap::new();
        let mut requests = Vec::new();
        let mut files = FxHashSet::default();

        for (name, entry) in changed {
            self.registry.refresh(&entry.unit);
            let source = match self.registry.load_source(&entry.unit) {
                Ok(source) => source,
                Err(e) => {
                    debug!("Skipping {}: {}", name, e);
                    continue;
                }
            };
            // one request per file; the compiler emits its nested units
            if files.insert(entry.unit.path().to_path_buf()) {
                requests.push(CompileRequest {
                    name: outer_name(name).to_string(),
                    source: Arc::clone(&source),
                });
            }
            sources.insert(name.as_str(), source);
        }

        let mut outputs: FxHashMap<String, _> = match self.compiler.compile(&requests) {
            Ok(outputs) => outputs.into_iter().map(|o| (o.name.clone(), o)).collect(),
            Err(diagnostic) => return Err(self.record_failure(changed, diagnostic)),
        };

        let mut recompiled = Vec::new();
        let mut dirty = Vec::new();
        for (name, source) in sources {
            let entry = &changed[name];
            let Some(output) = outputs.remove(name) else {
                // the type no longer exists in its file
                dirty.push(name.to_string());
                continue;
            };

            let enhanced = match self.enhancer.enhance(&EnhanceRequest {
                name,
                bytecode: &output.bytecode,
                source: &source,
            }) {
                Ok(enhanced) => enhanced,
                Err(diagnostic) => return Err(self.record_failure(changed, diagnostic)),
            };
            entry
                .unit
                .set_compiled(&source, output.bytecode, output.dependencies);
            entry.unit.set_enhanced(
                &source,
                enhanced.bytecode.clone(),
                enhanced.signature_checksum,
                enhanced.static_final_checksum,
            );

            if entry
                .previous_signature
                .is_some_and(|previous| previous != enhanced.signature_checksum)
            {
                dirty.push(name.to_string());
            }
            if let Err(e) = self.cache.store(name, &enhanced.bytecode, &source) {
                warn!("Failed to cache {}: {}", name, e);
            }
            recompiled.push(name.to_string());
        }

        Ok((recompiled, dirty))
    }

    /// Purge every unit of the failing file and queue the whole batch for
    /// the next pass. Units of the failing file wait for it to change again.
    fn record_failure(
        &self,
        changed: &BTreeMap<String, Changed>,
        diagnostic: CompileDiagnostic,
    ) -> ReloadError {
        let failing = self.failing_file(changed, &diagnostic);
        let fs = self.registry.locator().fs();
        let failed_at = failing.as_ref().and_then(|path| fs.modified(path).ok());
        if let Some(path) = &failing {
            let removed = self.registry.remove_by_file(path);
            debug!("Purged {:?} after compile failure", removed);
        }

        let mut retry = self.retry.lock();
        for (name, entry) in changed {
            let modified = if failing.as_deref() == Some(entry.unit.path()) {
                failed_at
            } else {
                None
            };
            retry.insert(
                name.clone(),
                Pending {
                    previous_signature: entry.previous_signature,
                    modified,
                },
            );
        }
        info!("Recompile failed: {}", diagnostic);
        ReloadError::Compile(diagnostic)
    }

    /// File behind a diagnostic. The compiler may name the outer unit of a
    /// file whose only registered unit is nested.
    fn failing_file(
        &self,
        changed: &BTreeMap<String, Changed>,
        diagnostic: &CompileDiagnostic,
    ) -> Option<PathBuf> {
        let outer = outer_name(&diagnostic.unit);
        changed
            .values()
            .find(|entry| outer_name(entry.unit.name()) == outer)
            .map(|entry| entry.unit.path().to_path_buf())
            .or_else(|| self.registry.get(&diagnostic.unit).map(|u| u.path().to_path_buf()))
            .or_else(|| self.registry.locator().locate(&diagnostic.unit))
    }

    fn check_source_set(&self, mut removed: Vec<String>) -> Result<()> {
        let current = path_listing_hash(&self.registry.locator().list_sources());
        {
            let mut listing = self.listing.lock();
            if *listing == current {
                return Ok(());
            }
            *listing = current;
        }

        let fs = self.registry.locator().fs();
        for path in self.registry.files() {
            if !fs.exists(&path) {
                removed.extend(self.registry.remove_by_file(&path));
            }
        }
        removed.sort();
        self.generation.advance();
        Err(self.require_restart(RestartReason::SourceSetChanged { removed }))
    }

    /// Redefine every recompiled class that is already defined, atomically
    fn apply_hot_swap(&self, recompiled: &[String]) -> Result<Vec<String>> {
        if !self.hot_swap_enabled {
            return Err(self.require_restart(RestartReason::HotSwapUnsupported {
                units: recompiled.to_vec(),
            }));
        }

        let mut batch = Vec::new();
        let mut origins = Vec::new();
        for name in recompiled {
            let (Some(class), Some(unit)) = (self.classes.get(name), self.registry.get(name)) else {
                continue;
            };
            let Some(bytecode) = unit.enhanced_bytecode() else {
                continue;
            };
            origins.push(ClassOrigin::of_unit(&unit, self.cache.salt()));
            batch.push(Redefinition { class, bytecode });
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        self.set_state(DetectorState::ApplyHotSwap);
        match self.hot_swap.redefine(&batch) {
            Ok(()) => Ok(batch
                .into_iter()
                .zip(origins)
                .map(|(r, origin)| {
                    r.class.redefine(r.bytecode, origin);
                    r.class.name().to_string()
                })
                .collect()),
            Err(rejection) => Err(self.require_restart(RestartReason::HotSwapRejected {
                reason: rejection.reason,
            })),
        }
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.detach_watcher();
    }
}

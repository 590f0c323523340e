use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::{
    ClassDefiner, CompileAdapter, EnhanceAdapter, HotSwapFacility, ResourceProvider,
    UnsupportedHotSwap,
};
use crate::cache::BytecodeCache;
use crate::class::{ClassTable, RuntimeClass};
use crate::config::ReloaderConfig;
use crate::detector::{ChangeDetector, DetectorState, PassReport};
use crate::diagnostics::{DiagnosticHandler, LoggingDiagnosticHandler};
use crate::errors::{ReloadError, RestartReason, Result};
use crate::fs::{FileSystem, RealFileSystem, SourceLocator};
use crate::generation::WorldGeneration;
use crate::loader::ClassLoaderOrchestrator;
use crate::registry::SourceRegistry;
use crate::watcher::FileWatcher;

/// What the request layer observes between requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    Running,
    ChangeDetected,
    RecompiledClean,
    RecompileFailed,
    RestartRequired,
}

/// External collaborators wired into a [`ReloadContext`]
#[derive(Clone)]
pub struct Adapters {
    pub compiler: Arc<dyn CompileAdapter>,
    pub enhancer: Arc<dyn EnhanceAdapter>,
    pub definer: Arc<dyn ClassDefiner>,
    pub hot_swap: Arc<dyn HotSwapFacility>,
    pub file_system: Arc<dyn FileSystem>,
    pub watcher: Option<Arc<dyn FileWatcher>>,
    pub resources: Option<Arc<dyn ResourceProvider>>,
    pub diagnostics: Arc<dyn DiagnosticHandler>,
}

impl Adapters {
    /// Production defaults: real file system, no hot swap, logged diagnostics
    pub fn new(
        compiler: Arc<dyn CompileAdapter>,
        enhancer: Arc<dyn EnhanceAdapter>,
        definer: Arc<dyn ClassDefiner>,
    ) -> Self {
        Self {
            compiler,
            enhancer,
            definer,
            hot_swap: Arc::new(UnsupportedHotSwap),
            file_system: Arc::new(RealFileSystem::new()),
            watcher: None,
            resources: None,
            diagnostics: Arc::new(LoggingDiagnosticHandler::new()),
        }
    }

    pub fn with_hot_swap(mut self, hot_swap: Arc<dyn HotSwapFacility>) -> Self {
        self.hot_swap = hot_swap;
        self
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn FileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticHandler>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Process-scoped owner of the registry, cache, detector and loader.
///
/// A restart means dropping this context and building a new one from the
/// same configuration; nothing survives except the on-disk cache.
pub struct ReloadContext {
    config: Arc<ReloaderConfig>,
    adapters: Adapters,
    registry: Arc<SourceRegistry>,
    cache: Arc<BytecodeCache>,
    generation: Arc<WorldGeneration>,
    detector: ChangeDetector,
    loader: ClassLoaderOrchestrator,
    status: Mutex<ReloadStatus>,
    restart: Mutex<Option<RestartReason>>,
}

impl ReloadContext {
    pub fn new(config: ReloaderConfig, adapters: Adapters) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let locator = Arc::new(SourceLocator::new(
            Arc::clone(&adapters.file_system),
            config.source_roots.clone(),
            config.source_extension.clone(),
        ));
        let registry = Arc::new(SourceRegistry::new(locator));
        let cache = Arc::new(
            BytecodeCache::open(
                &config.cache_dir,
                &config.run_mode,
                &config.runtime_version,
                Arc::clone(&registry),
            )
            .with_constant_reader(Arc::clone(&adapters.enhancer)),
        );
        let classes = Arc::new(ClassTable::new());
        let generation = Arc::new(WorldGeneration::new());

        let detector = ChangeDetector::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::clone(&classes),
            Arc::clone(&generation),
            Arc::clone(&adapters.compiler),
            Arc::clone(&adapters.enhancer),
        )
        .with_hot_swap(Arc::clone(&adapters.hot_swap), config.hot_swap);
        if config.watch {
            if let Some(watcher) = &adapters.watcher {
                detector.attach_watcher(Arc::clone(watcher))?;
            }
        }

        let mut loader = ClassLoaderOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            classes,
            Arc::clone(&generation),
            Arc::clone(&adapters.compiler),
            Arc::clone(&adapters.enhancer),
            Arc::clone(&adapters.definer),
        )
        .with_pass_lock(detector.pass_lock());
        if let Some(resources) = &adapters.resources {
            loader = loader.with_resources(Arc::clone(resources));
        }

        info!(
            "Reload context ready: mode {}, {} root(s), hot swap {}",
            config.run_mode,
            config.source_roots.len(),
            if config.hot_swap { "on" } else { "off" }
        );
        Ok(Self {
            config,
            adapters,
            registry,
            cache,
            generation,
            detector,
            loader,
            status: Mutex::new(ReloadStatus::Running),
            restart: Mutex::new(None),
        })
    }

    /// Tear this context down and build a fresh one from the same inputs
    pub fn rebuild(self) -> Result<Self> {
        let config = ReloaderConfig::clone(&self.config);
        let adapters = self.adapters.clone();
        drop(self);
        debug!("Rebuilding reload context");
        Self::new(config, adapters)
    }

    /// Run change detection ahead of a request.
    ///
    /// Compile errors are reported to the diagnostic handler and returned;
    /// the next call starts over. A restart signal is sticky: every later
    /// call returns it until the context is rebuilt.
    pub fn before_request(&self) -> Result<PassReport> {
        self.check_restart()?;

        match self.detector.detect_changes() {
            Ok(report) => {
                *self.status.lock() = if report.is_unchanged() {
                    ReloadStatus::Running
                } else {
                    ReloadStatus::RecompiledClean
                };
                Ok(report)
            }
            Err(ReloadError::Compile(diagnostic)) => {
                *self.status.lock() = ReloadStatus::RecompileFailed;
                self.adapters.diagnostics.report(diagnostic.clone());
                Err(ReloadError::Compile(diagnostic))
            }
            Err(ReloadError::RestartRequired(reason)) => {
                *self.status.lock() = ReloadStatus::RestartRequired;
                *self.restart.lock() = Some(reason.clone());
                Err(ReloadError::RestartRequired(reason))
            }
            Err(e) => Err(e),
        }
    }

    fn check_restart(&self) -> Result<()> {
        match &*self.restart.lock() {
            Some(reason) => Err(ReloadError::RestartRequired(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> ReloadStatus {
        let status = *self.status.lock();
        if status != ReloadStatus::RestartRequired && self.detector.state() != DetectorState::Idle {
            return ReloadStatus::ChangeDetected;
        }
        status
    }

    pub fn restart_reason(&self) -> Option<RestartReason> {
        self.restart.lock().clone()
    }

    pub fn load(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        self.check_restart()?;
        self.loader.load(name)
    }

    pub fn find(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.loader.find(name)
    }

    pub fn resource(&self, name: &str) -> Option<PathBuf> {
        self.loader.resource(name)
    }

    pub fn config(&self) -> &Arc<ReloaderConfig> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<BytecodeCache> {
        &self.cache
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn loader(&self) -> &ClassLoaderOrchestrator {
        &self.loader
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticHandler> {
        &self.adapters.diagnostics
    }
}

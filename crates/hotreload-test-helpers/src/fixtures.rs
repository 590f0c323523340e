//! A scripted source tree wired into a `ReloadContext`

use hotreload_core::config::ReloaderConfig;
use hotreload_core::context::{Adapters, ReloadContext};
use hotreload_core::diagnostics::CollectingDiagnosticHandler;
use hotreload_core::fs::MockFileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::compile::{FakeDefiner, FakeEnhancer, RecordingHotSwap, ScriptedCompiler};
use crate::mocks::ManualWatcher;

/// Source root of the in-memory tree
pub const ROOT: &str = "/app/src";

pub const EXTENSION: &str = "src";

pub const RUN_MODE: &str = "test";

/// In-memory sources, fake collaborators and a real on-disk cache directory.
///
/// The collaborators outlive any context built from the harness, so a
/// second context sees the first one's cache and compile counts.
pub struct Harness {
    pub fs: Arc<MockFileSystem>,
    pub compiler: Arc<ScriptedCompiler>,
    pub enhancer: Arc<FakeEnhancer>,
    pub definer: Arc<FakeDefiner>,
    pub hot_swap: Arc<RecordingHotSwap>,
    pub diagnostics: Arc<CollectingDiagnosticHandler>,
    pub watcher: Option<Arc<ManualWatcher>>,
    cache_dir: TempDir,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            fs: Arc::new(MockFileSystem::new()),
            compiler: Arc::new(ScriptedCompiler::new()),
            enhancer: Arc::new(FakeEnhancer::new()),
            definer: Arc::new(FakeDefiner::new()),
            hot_swap: Arc::new(RecordingHotSwap::accepting()),
            diagnostics: Arc::new(CollectingDiagnosticHandler::new()),
            watcher: None,
            cache_dir: tempfile::tempdir().expect("create cache dir"),
        }
    }

    pub fn with_hot_swap(mut self, hot_swap: RecordingHotSwap) -> Self {
        self.hot_swap = Arc::new(hot_swap);
        self
    }

    pub fn with_watcher(mut self) -> Self {
        self.watcher = Some(Arc::new(ManualWatcher::new()));
        self
    }

    /// `app.models.User` -> `/app/src/app/models/User.src`
    pub fn source_path(&self, name: &str) -> PathBuf {
        let mut path: PathBuf = Path::new(ROOT).join(name.split('.').collect::<PathBuf>());
        path.set_extension(EXTENSION);
        path
    }

    pub fn write(&self, name: &str, source: &str) {
        self.fs.write_file(self.source_path(name), source);
    }

    pub fn remove(&self, name: &str) {
        self.fs.remove_file(&self.source_path(name));
    }

    /// Bump the file's modification time without changing its content
    pub fn touch(&self, name: &str) {
        self.fs.touch(&self.source_path(name));
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.path()
    }

    pub fn config(&self) -> ReloaderConfig {
        ReloaderConfig {
            source_roots: vec![PathBuf::from(ROOT)],
            run_mode: RUN_MODE.to_string(),
            hot_swap: true,
            watch: self.watcher.is_some(),
            cache_dir: self.cache_dir.path().to_path_buf(),
            source_extension: EXTENSION.to_string(),
            ..ReloaderConfig::default()
        }
    }

    pub fn adapters(&self) -> Adapters {
        let mut adapters = Adapters::new(
            self.compiler.clone(),
            self.enhancer.clone(),
            self.definer.clone(),
        )
        .with_hot_swap(self.hot_swap.clone())
        .with_file_system(self.fs.clone())
        .with_diagnostics(self.diagnostics.clone());
        if let Some(watcher) = &self.watcher {
            adapters = adapters.with_watcher(watcher.clone());
        }
        adapters
    }

    pub fn context(&self) -> ReloadContext {
        self.context_with(self.config())
    }

    pub fn context_with(&self, config: ReloaderConfig) -> ReloadContext {
        ReloadContext::new(config, self.adapters()).expect("build reload context")
    }
}

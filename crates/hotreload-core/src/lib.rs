pub mod adapters;
pub mod cache;
pub mod class;
pub mod config;
pub mod context;
pub mod detector;
pub mod diagnostics;
pub mod errors;
pub mod fs;
pub mod generation;
pub mod hash;
pub mod loader;
pub mod registry;
pub mod watcher;

pub use adapters::{
    ClassDefiner, ClassShape, CompileAdapter, CompileRequest, CompiledUnit, DefineError,
    EnhanceAdapter, EnhanceRequest, Enhanced, HotSwapFacility, HotSwapRejection, Redefinition,
    ResourceProvider, UnsupportedHotSwap,
};
pub use cache::{BytecodeCache, CacheEntry, CacheError, CacheStats};
pub use class::{ClassOrigin, ClassTable, RuntimeClass};
pub use config::{ConfigError, ReloaderConfig};
pub use context::{Adapters, ReloadContext, ReloadStatus};
pub use detector::{ChangeDetector, DetectorState, PassReport};
pub use diagnostics::{CompileDiagnostic, DiagnosticHandler};
pub use errors::{ReloadError, RestartReason, Result};
pub use fs::{FileSystem, MockFileSystem, RealFileSystem, SourceLocator};
pub use generation::WorldGeneration;
pub use hash::ContentHash;
pub use loader::ClassLoaderOrchestrator;
pub use registry::{SourceRegistry, SourceUnit};
pub use watcher::{FileWatcher, NotifyWatcher, WatchError, WatchEvent, WatchEventKind, WatchToken};

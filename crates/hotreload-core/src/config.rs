use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings supplied by the owning process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloaderConfig {
    /// Directories searched for source units, in priority order
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<PathBuf>,

    /// Run-mode tag; each mode gets its own cache partition (default: dev)
    #[serde(default = "default_run_mode")]
    pub run_mode: String,

    /// Allow in-place redefinition of changed classes (default: true)
    #[serde(default = "default_true")]
    pub hot_swap: bool,

    /// Attach a file system watcher to the source roots (default: true)
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Root of the persistent bytecode cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// File extension of source units, without the dot (default: src)
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Salt mixed into every content hash; changing it invalidates the cache
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
}

fn default_true() -> bool {
    true
}

fn default_source_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}

fn default_run_mode() -> String {
    "dev".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".hotreload-cache")
}

fn default_source_extension() -> String {
    "src".to_string()
}

pub fn default_runtime_version() -> String {
    concat!("hotreload-", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ReloaderConfig {
    fn default() -> Self {
        Self {
            source_roots: default_source_roots(),
            run_mode: default_run_mode(),
            hot_swap: true,
            watch: true,
            cache_dir: default_cache_dir(),
            source_extension: default_source_extension(),
            runtime_version: default_runtime_version(),
        }
    }
}

impl ReloaderConfig {
    /// Load configuration from a YAML (`.yaml`/`.yml`) or JSON file.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ReloaderConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = config.with_base_dir(base);
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration and write it to a YAML file
    pub fn init_file(path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(&ReloaderConfig::default())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Make relative roots and cache directory absolute against `base`
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        for root in &mut self.source_roots {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        if self.cache_dir.is_relative() {
            self.cache_dir = base.join(&self.cache_dir);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_roots.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one source root is required".to_string(),
            ));
        }
        if self.run_mode.is_empty()
            || !self
                .run_mode
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "run mode {:?} must be non-empty and contain only [A-Za-z0-9_-]",
                self.run_mode
            )));
        }
        if self.source_extension.is_empty() || self.source_extension.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "source extension {:?} must be non-empty and given without a dot",
                self.source_extension
            )));
        }
        Ok(())
    }
}

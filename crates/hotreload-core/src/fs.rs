//! File system access and unit-name resolution over the source roots.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Separator between an outer unit name and a nested unit name
pub const NESTED_SEPARATOR: char = '$';

/// Abstraction over the file system so tests can drive modification times
pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<String>;

    fn modified(&self, path: &Path) -> io::Result<SystemTime>;

    fn exists(&self, path: &Path) -> bool;

    /// Every regular file below `root`, sorted
    fn walk(&self, root: &Path) -> Vec<PathBuf>;
}

/// Production file system backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        files
    }
}

#[derive(Debug, Clone)]
struct MockFile {
    content: String,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, MockFile>,
    clock: u64,
}

/// In-memory file system with a logical clock.
///
/// Every write advances the clock by one second, so modification times are
/// strictly increasing regardless of the host's timestamp granularity.
#[derive(Debug, Default)]
pub struct MockFileSystem {
    state: Mutex<MockState>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        let mut state = self.state.lock();
        state.clock += 1;
        let modified = UNIX_EPOCH + Duration::from_secs(state.clock);
        state.files.insert(
            path.into(),
            MockFile {
                content: content.into(),
                modified,
            },
        );
    }

    pub fn remove_file(&self, path: &Path) -> bool {
        self.state.lock().files.remove(path).is_some()
    }

    /// Bump the modification time without changing the content
    pub fn touch(&self, path: &Path) {
        let mut state = self.state.lock();
        state.clock += 1;
        let modified = UNIX_EPOCH + Duration::from_secs(state.clock);
        if let Some(file) = state.files.get_mut(path) {
            file.modified = modified;
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        self.state
            .lock()
            .files
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        self.state
            .lock()
            .files
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect()
    }
}

/// Outer (file-owning) part of a unit name: `app.User$Address` -> `app.User`
pub fn outer_name(name: &str) -> &str {
    name.split(NESTED_SEPARATOR).next().unwrap_or(name)
}

/// Package of a unit: `app.models.User` -> `app.models`
pub fn package_of(name: &str) -> Option<&str> {
    outer_name(name).rsplit_once('.').map(|(package, _)| package)
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Maps unit names to files under the configured source roots and back
pub struct SourceLocator {
    fs: Arc<dyn FileSystem>,
    roots: Vec<PathBuf>,
    extension: String,
}

impl SourceLocator {
    pub fn new(fs: Arc<dyn FileSystem>, roots: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            fs,
            roots,
            extension: extension.into(),
        }
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Relative path a unit name maps to, or `None` for malformed names
    fn relative_path(&self, name: &str) -> Option<PathBuf> {
        let outer = outer_name(name);
        if !outer.split('.').all(is_valid_segment) {
            return None;
        }
        let mut relative: PathBuf = outer.split('.').collect();
        relative.set_extension(&self.extension);
        Some(relative)
    }

    /// Resolve a unit name to its backing file; the first root wins
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let relative = self.relative_path(name)?;
        self.roots
            .iter()
            .map(|root| root.join(&relative))
            .find(|path| self.fs.exists(path))
    }

    /// Unit name of a source file, if it lives under one of the roots
    pub fn unit_name(&self, path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            return None;
        }
        let root = self.roots.iter().find(|root| path.starts_with(root))?;
        let relative = path.strip_prefix(root).ok()?.with_extension("");

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_str()?.to_string()),
                _ => return None,
            }
        }
        if segments.is_empty() || !segments.iter().all(|s| is_valid_segment(s)) {
            return None;
        }
        Some(segments.join("."))
    }

    /// Every source file under the roots, sorted
    pub fn list_sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self
            .roots
            .iter()
            .flat_map(|root| self.fs.walk(root))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str()))
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Every discoverable top-level unit name, sorted
    pub fn list_units(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .list_sources()
            .iter()
            .filter_map(|p| self.unit_name(p))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Non-code resource lookup against the live source roots
    pub fn find_resource(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|path| self.fs.exists(path))
    }
}

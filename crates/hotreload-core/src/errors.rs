use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::adapters::DefineError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::diagnostics::CompileDiagnostic;
use crate::watcher::WatchError;

/// Why the running process cannot absorb a change in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// The externally observable shape of these units changed
    SignatureChanged { units: Vec<String> },
    /// Bytecode changed and hot swap is disabled
    HotSwapUnsupported { units: Vec<String> },
    /// The host refused the redefinition
    HotSwapRejected { reason: String },
    /// Source files were added or removed
    SourceSetChanged { removed: Vec<String> },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::SignatureChanged { units } => {
                write!(f, "signature changed in {}", units.join(", "))
            }
            RestartReason::HotSwapUnsupported { units } => {
                write!(f, "hot swap disabled, {} changed", units.join(", "))
            }
            RestartReason::HotSwapRejected { reason } => {
                write!(f, "hot swap rejected: {}", reason)
            }
            RestartReason::SourceSetChanged { removed } if removed.is_empty() => {
                write!(f, "source set changed")
            }
            RestartReason::SourceSetChanged { removed } => {
                write!(f, "source set changed, removed {}", removed.join(", "))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileDiagnostic),

    #[error("Restart required: {0}")]
    RestartRequired(RestartReason),

    #[error("Class not found: {name}")]
    ClassNotFound { name: String },

    #[error("Failed to read source {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Define(#[from] DefineError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

impl ReloadError {
    pub fn is_restart_required(&self) -> bool {
        matches!(self, ReloadError::RestartRequired(_))
    }

    pub fn restart_reason(&self) -> Option<&RestartReason> {
        match self {
            ReloadError::RestartRequired(reason) => Some(reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReloadError>;

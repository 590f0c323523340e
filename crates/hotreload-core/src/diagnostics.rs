use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// A compile error reported by the external compiler or enhancer.
///
/// Carries the first error only; compilation stops there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{unit}:{line}:{column}: {message}")]
pub struct CompileDiagnostic {
    pub unit: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CompileDiagnostic {
    pub fn new(unit: impl Into<String>, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// Trait for handling compile diagnostics
/// This allows the owning process to surface them however it likes
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: CompileDiagnostic);

    fn error_count(&self) -> usize;

    fn get_diagnostics(&self) -> Vec<CompileDiagnostic>;

    fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Handler that logs every diagnostic through `tracing`.
///
/// Only the count and the most recent diagnostic are retained.
#[derive(Debug, Default)]
pub struct LoggingDiagnosticHandler {
    count: AtomicUsize,
    last: Mutex<Option<CompileDiagnostic>>,
}

impl LoggingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for LoggingDiagnosticHandler {
    fn report(&self, diagnostic: CompileDiagnostic) {
        error!("Compilation failed at {}", diagnostic);
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn get_diagnostics(&self) -> Vec<CompileDiagnostic> {
        self.last.lock().iter().cloned().collect()
    }
}

/// Collecting diagnostic handler for testing
/// Collects all diagnostics without logging
#[derive(Debug, Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<CompileDiagnostic>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: CompileDiagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.diagnostics.lock().len()
    }

    fn get_diagnostics(&self) -> Vec<CompileDiagnostic> {
        self.diagnostics.lock().clone()
    }
}

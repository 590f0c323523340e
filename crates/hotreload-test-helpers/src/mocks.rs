//! Mock implementations for testing

use hotreload_core::watcher::{
    FileWatcher, WatchCallback, WatchError, WatchEvent, WatchEventKind, WatchToken,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Registration {
    token: WatchToken,
    root: PathBuf,
    kinds: Vec<WatchEventKind>,
    callback: Arc<WatchCallback>,
}

/// Watcher whose events are emitted by the test
#[derive(Default)]
pub struct ManualWatcher {
    next: Mutex<u64>,
    registrations: Mutex<Vec<Registration>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every registration watching `path`
    pub fn emit(&self, kind: WatchEventKind, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let callbacks: Vec<Arc<WatchCallback>> = self
            .registrations
            .lock()
            .iter()
            .filter(|r| path.starts_with(&r.root) && r.kinds.contains(&kind))
            .map(|r| Arc::clone(&r.callback))
            .collect();

        let event = WatchEvent::new(kind, vec![path]);
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn active(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl FileWatcher for ManualWatcher {
    fn register_watcher(
        &self,
        path: &Path,
        kinds: &[WatchEventKind],
        callback: WatchCallback,
    ) -> Result<WatchToken, WatchError> {
        let mut next = self.next.lock();
        let token = WatchToken(*next);
        *next += 1;
        self.registrations.lock().push(Registration {
            token,
            root: path.to_path_buf(),
            kinds: kinds.to_vec(),
            callback: Arc::new(callback),
        });
        Ok(token)
    }

    fn unregister_watcher(&self, token: WatchToken) -> Result<(), WatchError> {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.token != token);
        if registrations.len() == before {
            return Err(WatchError::UnknownToken);
        }
        Ok(())
    }
}

//! File-watch registration.
//!
//! The detector only needs "something under this root changed" plus the
//! paths of created and removed files; [`NotifyWatcher`] maps native events
//! onto that vocabulary.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub paths: Vec<PathBuf>,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, paths: Vec<PathBuf>) -> Self {
        Self { kind, paths }
    }
}

/// Handle returned by [`FileWatcher::register_watcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken(pub u64);

pub type WatchCallback = Box<dyn Fn(&WatchEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("File watch failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("Unknown watch token")]
    UnknownToken,
}

pub trait FileWatcher: Send + Sync {
    /// Watch `path` recursively, invoking `callback` for events of `kinds`
    fn register_watcher(
        &self,
        path: &Path,
        kinds: &[WatchEventKind],
        callback: WatchCallback,
    ) -> Result<WatchToken, WatchError>;

    fn unregister_watcher(&self, token: WatchToken) -> Result<(), WatchError>;
}

/// Native watcher backed by `notify`
#[derive(Default)]
pub struct NotifyWatcher {
    next_token: AtomicU64,
    watchers: Mutex<FxHashMap<WatchToken, RecommendedWatcher>>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Translate a native event; a rename with both ends yields two events
fn translate(event: Event) -> Vec<WatchEvent> {
    let Event { kind, mut paths, .. } = event;
    match kind {
        EventKind::Create(_) => vec![WatchEvent::new(WatchEventKind::Created, paths)],
        EventKind::Remove(_) => vec![WatchEvent::new(WatchEventKind::Removed, paths)],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![WatchEvent::new(WatchEventKind::Removed, paths)]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![WatchEvent::new(WatchEventKind::Created, paths)]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let to = paths.split_off(1);
            vec![
                WatchEvent::new(WatchEventKind::Removed, paths),
                WatchEvent::new(WatchEventKind::Created, to),
            ]
        }
        EventKind::Modify(_) => vec![WatchEvent::new(WatchEventKind::Modified, paths)],
        _ => Vec::new(),
    }
}

impl FileWatcher for NotifyWatcher {
    fn register_watcher(
        &self,
        path: &Path,
        kinds: &[WatchEventKind],
        callback: WatchCallback,
    ) -> Result<WatchToken, WatchError> {
        let kinds = kinds.to_vec();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for event in translate(event) {
                        if kinds.contains(&event.kind) {
                            callback(&event);
                        }
                    }
                }
                Err(e) => warn!("File watch error: {}", e),
            })?;
        watcher.watch(path, RecursiveMode::Recursive)?;

        let token = WatchToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.watchers.lock().insert(token, watcher);
        debug!("Watching {:?} ({:?})", path, token);
        Ok(token)
    }

    fn unregister_watcher(&self, token: WatchToken) -> Result<(), WatchError> {
        // dropping the native watcher stops delivery
        self.watchers
            .lock()
            .remove(&token)
            .map(|_| debug!("Stopped watch {:?}", token))
            .ok_or(WatchError::UnknownToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_translate_create_and_remove() {
        let created = translate(event(EventKind::Create(CreateKind::File), &["/a"]));
        assert_eq!(created[0].kind, WatchEventKind::Created);

        let removed = translate(event(EventKind::Remove(RemoveKind::File), &["/a"]));
        assert_eq!(removed[0].kind, WatchEventKind::Removed);
    }

    #[test]
    fn test_translate_content_change() {
        let events = translate(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/a"],
        ));
        assert_eq!(events, vec![WatchEvent::new(WatchEventKind::Modified, vec!["/a".into()])]);
    }

    #[test]
    fn test_translate_rename_both_splits() {
        let events = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/old", "/new"],
        ));
        assert_eq!(
            events,
            vec![
                WatchEvent::new(WatchEventKind::Removed, vec!["/old".into()]),
                WatchEvent::new(WatchEventKind::Created, vec!["/new".into()]),
            ]
        );
    }

    #[test]
    fn test_access_events_ignored() {
        let events = translate(event(EventKind::Access(notify::event::AccessKind::Any), &["/a"]));
        assert!(events.is_empty());
    }

    #[test]
    fn test_unregister_unknown_token() {
        let watcher = NotifyWatcher::new();
        assert!(matches!(
            watcher.unregister_watcher(WatchToken(99)),
            Err(WatchError::UnknownToken)
        ));
    }

    #[test]
    fn test_register_then_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = NotifyWatcher::new();
        let token = watcher
            .register_watcher(dir.path(), &[WatchEventKind::Created], Box::new(|_| {}))
            .unwrap();
        watcher.unregister_watcher(token).unwrap();
    }
}

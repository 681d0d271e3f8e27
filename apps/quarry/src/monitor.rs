//! # Filesystem Monitor
//!
//! Turns `notify` callbacks into `MonitorEvent`s on a channel. The engine
//! loop is the only consumer, so nothing here touches the graph: every
//! event is just a path whose state must be re-checked.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use quarry_core::DataSourceKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// A change reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Something happened at this path (created, written, removed, renamed
    /// from or to).
    Changed(PathBuf),
    /// Events were dropped; roots have to be walked again.
    Overflow,
}

/// Convert one notify event into monitor events.
fn translate(event: Event) -> Vec<MonitorEvent> {
    if event.need_rescan() {
        return vec![MonitorEvent::Overflow];
    }
    match event.kind {
        EventKind::Access(_) => Vec::new(),
        _ => event.paths.into_iter().map(MonitorEvent::Changed).collect(),
    }
}

/// Watches data source roots.
pub struct Monitor {
    watcher: RecommendedWatcher,
    watched: BTreeMap<PathBuf, DataSourceKind>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor delivering events to `tx`.
    pub fn new(tx: mpsc::UnboundedSender<MonitorEvent>) -> Result<Self, notify::Error> {
        let watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for e in translate(event) {
                    if tx.send(e).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Filesystem watcher error");
                let _ = tx.send(MonitorEvent::Overflow);
            }
        })?;
        Ok(Self {
            watcher,
            watched: BTreeMap::new(),
        })
    }

    /// Start watching a root. Watching an already watched root with another
    /// kind re-registers it.
    pub fn watch(&mut self, root: &Path, kind: DataSourceKind) {
        if self.watched.get(root) == Some(&kind) {
            return;
        }
        if self.watched.remove(root).is_some() {
            let _ = self.watcher.unwatch(root);
        }
        let mode = if kind.is_recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        match self.watcher.watch(root, mode) {
            Ok(()) => {
                tracing::debug!(root = %root.display(), ?mode, "Watching");
                self.watched.insert(root.to_path_buf(), kind);
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Cannot watch root");
            }
        }
    }

    /// Stop watching a root.
    pub fn unwatch(&mut self, root: &Path) {
        if self.watched.remove(root).is_some() {
            if let Err(e) = self.watcher.unwatch(root) {
                tracing::debug!(root = %root.display(), error = %e, "Unwatch failed");
            }
        }
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.watched.contains_key(root)
    }
}

// =============================================================================
// TESTS
// =============================================================================

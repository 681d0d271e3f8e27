//! # Crawler
//!
//! Turns the filesystem into candidate paths for the task queue.
//!
//! - `crawl` walks a root (or a directory below one) and reports every
//!   indexable entry, plus the FileObjects under it the graph still holds but
//!   the disk no longer does.
//! - `classify` maps one live change notification to the work it implies.
//!
//! Both apply the indexing tree's filters before anything is reported, so
//! excluded paths never become tasks. Symbolic links are neither followed
//! nor indexed.

use crate::graph::ResourceGraph;
use crate::registry::DataSourceKind;
use crate::tree::IndexingTree;
use crate::types::Uri;
use crate::vocab::NIE_URL;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// =============================================================================
// CRAWL
// =============================================================================

/// One indexable entry found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CrawlEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Outcome of walking a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlResult {
    /// Indexable entries, parents before children.
    pub entries: Vec<CrawlEntry>,
    /// Paths the graph knows below the start directory that are gone or
    /// no longer indexable.
    pub stale: Vec<PathBuf>,
}

/// Walk `start` and compare it against the graph. Nested roots are left to
/// their own crawl.
#[must_use]
pub fn crawl(graph: &ResourceGraph, tree: &IndexingTree, start: &Path) -> CrawlResult {
    let entries = walk(tree, start);
    let seen: BTreeSet<&Path> = entries.iter().map(|e| e.path.as_path()).collect();
    let stale = stale_paths(graph, tree, start, &seen);
    tracing::debug!(
        start = %start.display(),
        entries = entries.len(),
        stale = stale.len(),
        "Crawl finished"
    );
    CrawlResult { entries, stale }
}

/// Every indexable entry at or below `start`.
#[must_use]
pub fn walk(tree: &IndexingTree, start: &Path) -> Vec<CrawlEntry> {
    let Some((root, kind)) = tree.root_for(start) else {
        return Vec::new();
    };
    if !start.is_dir() || !tree.is_indexable(start, true) {
        return Vec::new();
    }
    let max_depth = match kind {
        DataSourceKind::SingleDirectory if start == root => 1,
        DataSourceKind::SingleDirectory => 0,
        _ => usize::MAX,
    };

    let filters = tree.filters();
    let walker = WalkDir::new(start)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                return false;
            }
            let name = entry.file_name().to_string_lossy();
            let is_dir = file_type.is_dir();
            if is_dir && tree.is_root(entry.path()) {
                return false;
            }
            !filters.ignores_name(&name, is_dir) && !(is_dir && filters.has_marker(entry.path()))
        });

    let mut entries = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => entries.push(CrawlEntry {
                is_dir: entry.file_type().is_dir(),
                path: entry.into_path(),
            }),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
            }
        }
    }
    entries
}

/// FileObjects at or below `start` that are not in `seen`, skipping those
/// governed by a deeper root.
#[must_use]
pub fn stale_paths(
    graph: &ResourceGraph,
    tree: &IndexingTree,
    start: &Path,
    seen: &BTreeSet<&Path>,
) -> Vec<PathBuf> {
    let owner = tree.root_for(start).map(|(root, _)| root.to_path_buf());
    let start_url = Uri::from_path(start);
    let prefix = format!("{}/", start_url);

    let mut known: Vec<PathBuf> = Vec::new();
    if graph.subject_with(NIE_URL, start_url.as_str()).is_some() {
        known.push(start.to_path_buf());
    }
    known.extend(
        graph
            .unique_values_with_prefix(NIE_URL, &prefix)
            .into_iter()
            .filter_map(|(url, _)| Uri::new(url).to_path()),
    );

    known
        .into_iter()
        .filter(|path| !seen.contains(path.as_path()))
        .filter(|path| match tree.root_for(path) {
            Some((root, _)) => Some(root) == owner.as_deref(),
            None => true,
        })
        .collect()
}

// =============================================================================
// LIVE CHANGES
// =============================================================================

/// Work implied by a change notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    /// (Re)index a single path.
    Index(PathBuf),
    /// Walk a directory that appeared or became indexable.
    Walk(PathBuf),
    /// Remove a path and everything below it.
    Remove(PathBuf),
    /// Nothing to do.
    Ignore,
}

/// Decide what a change at `path` means, looking at the disk as it is now.
#[must_use]
pub fn classify(graph: &ResourceGraph, tree: &IndexingTree, path: &Path) -> ChangeAction {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if tree.filters().is_marker(&name) {
        let Some(parent) = path.parent() else {
            return ChangeAction::Ignore;
        };
        return if tree.is_indexable(parent, true) {
            ChangeAction::Walk(parent.to_path_buf())
        } else if graph.contains_subject(&Uri::from_path(parent)) {
            ChangeAction::Remove(parent.to_path_buf())
        } else {
            ChangeAction::Ignore
        };
    }

    let known = graph.contains_subject(&Uri::from_path(path));
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return if known {
            ChangeAction::Remove(path.to_path_buf())
        } else {
            ChangeAction::Ignore
        };
    };
    if meta.file_type().is_symlink() {
        return ChangeAction::Ignore;
    }

    let is_dir = meta.is_dir();
    if !tree.is_indexable(path, is_dir) {
        return if known {
            ChangeAction::Remove(path.to_path_buf())
        } else {
            ChangeAction::Ignore
        };
    }
    if is_dir && !known {
        ChangeAction::Walk(path.to_path_buf())
    } else {
        ChangeAction::Index(path.to_path_buf())
    }
}

// =============================================================================
// TESTS
// =============================================================================

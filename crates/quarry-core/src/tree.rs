//! # Indexing Tree
//!
//! The set of configured roots plus the rules deciding which paths under
//! them become resources.
//!
//! Rules, in the order they are checked for every path component below the
//! root:
//! - hidden names (leading `.`) when `filter_hidden` is set
//! - `ignored_directories` globs on directory names
//! - `ignored_files` globs on file names
//! - marker files (`ignored_directories_with_content`): a directory holding
//!   one is excluded together with its subtree; its parent is not affected
//!
//! A single-directory root covers its direct children only. A path is
//! governed by the deepest root above it.

use crate::config::IndexingConfig;
use crate::registry::DataSourceKind;
use crate::types::QuarryError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILTERS
// =============================================================================

/// Compiled inclusion/exclusion rules.
#[derive(Debug, Clone)]
pub struct Filters {
    ignored_files: GlobSet,
    ignored_directories: GlobSet,
    markers: Vec<String>,
    text_allowlist: GlobSet,
    filter_hidden: bool,
}

fn compile(patterns: &[String]) -> Result<GlobSet, QuarryError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| QuarryError::Glob(format!("{}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| QuarryError::Glob(e.to_string()))
}

impl Filters {
    /// Compile the rules of an indexing configuration.
    pub fn from_config(config: &IndexingConfig) -> Result<Self, QuarryError> {
        Ok(Self {
            ignored_files: compile(&config.ignored_files)?,
            ignored_directories: compile(&config.ignored_directories)?,
            markers: config.ignored_directories_with_content.clone(),
            text_allowlist: compile(&config.text_allowlist)?,
            filter_hidden: config.filter_hidden,
        })
    }

    /// Whether a single path component is excluded by name.
    #[must_use]
    pub fn ignores_name(&self, name: &str, is_dir: bool) -> bool {
        if self.filter_hidden && name.starts_with('.') {
            return true;
        }
        if is_dir {
            self.ignored_directories.is_match(name)
        } else {
            self.ignored_files.is_match(name)
        }
    }

    /// Whether a file name is one of the exclusion markers.
    #[must_use]
    pub fn is_marker(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m == name)
    }

    /// Whether a directory currently holds an exclusion marker.
    #[must_use]
    pub fn has_marker(&self, dir: &Path) -> bool {
        self.markers.iter().any(|m| dir.join(m).is_file())
    }

    /// Whether a plain-text file gets full extraction.
    #[must_use]
    pub fn is_text_allowlisted(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.text_allowlist.is_match(Path::new(name)))
    }
}

// =============================================================================
// INDEXING TREE
// =============================================================================

/// Configured roots and the filters applied below them.
#[derive(Debug, Clone)]
pub struct IndexingTree {
    roots: BTreeMap<PathBuf, DataSourceKind>,
    filters: Filters,
}

impl IndexingTree {
    #[must_use]
    pub fn new(filters: Filters) -> Self {
        Self {
            roots: BTreeMap::new(),
            filters,
        }
    }

    /// Tree with the filters of a configuration and no roots.
    pub fn from_config(config: &IndexingConfig) -> Result<Self, QuarryError> {
        Ok(Self::new(Filters::from_config(config)?))
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>, kind: DataSourceKind) {
        self.roots.insert(root.into(), kind);
    }

    pub fn remove_root(&mut self, root: &Path) -> bool {
        self.roots.remove(root).is_some()
    }

    pub fn set_filters(&mut self, filters: Filters) {
        self.filters = filters;
    }

    #[must_use]
    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn roots(&self) -> impl Iterator<Item = (&Path, DataSourceKind)> {
        self.roots.iter().map(|(p, k)| (p.as_path(), *k))
    }

    #[must_use]
    pub fn is_root(&self, path: &Path) -> bool {
        self.roots.contains_key(path)
    }

    /// The deepest root at or above `path`, if it covers the path.
    #[must_use]
    pub fn root_for(&self, path: &Path) -> Option<(&Path, DataSourceKind)> {
        let (root, kind) = path
            .ancestors()
            .find_map(|a| self.roots.get_key_value(a))?;
        let covered = match kind {
            DataSourceKind::SingleDirectory => path == root || path.parent() == Some(root),
            _ => true,
        };
        covered.then_some((root.as_path(), *kind))
    }

    /// Whether a path becomes a resource. Markers are looked up on disk.
    #[must_use]
    pub fn is_indexable(&self, path: &Path, is_dir: bool) -> bool {
        let Some((root, _)) = self.root_for(path) else {
            return false;
        };
        if self.filters.has_marker(root) {
            return false;
        }
        if path == root {
            return true;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };

        let mut current = root.to_path_buf();
        let components: Vec<_> = relative.components().collect();
        let last = components.len().saturating_sub(1);
        for (i, component) in components.iter().enumerate() {
            let name = component.as_os_str().to_string_lossy();
            current.push(component);
            let component_is_dir = i < last || is_dir;
            if self.filters.ignores_name(&name, component_is_dir) {
                return false;
            }
            if component_is_dir && self.filters.has_marker(&current) {
                return false;
            }
        }
        true
    }

    /// Whether a plain-text file gets full extraction.
    #[must_use]
    pub fn is_text_allowlisted(&self, path: &Path) -> bool {
        self.filters.is_text_allowlisted(path)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree_at(root: &Path, kind: DataSourceKind) -> IndexingTree {
        let mut tree = IndexingTree::from_config(&IndexingConfig::default()).expect("filters");
        tree.add_root(root, kind);
        tree
    }

    #[test]
    fn hidden_and_glob_exclusions() {
        let tree = tree_at(Path::new("/r"), DataSourceKind::RecursiveDirectory);
        assert!(tree.is_indexable(Path::new("/r/a.txt"), false));
        assert!(!tree.is_indexable(Path::new("/r/.secret"), false));
        assert!(!tree.is_indexable(Path::new("/r/.git/config"), false));
        assert!(!tree.is_indexable(Path::new("/r/notes.txt~"), false));
        assert!(!tree.is_indexable(Path::new("/r/node_modules/x.js"), false));
        assert!(!tree.is_indexable(Path::new("/elsewhere/a.txt"), false));
    }

    #[test]
    fn single_root_covers_direct_children_only() {
        let tree = tree_at(Path::new("/home/u"), DataSourceKind::SingleDirectory);
        assert!(tree.is_indexable(Path::new("/home/u/a.txt"), false));
        assert!(tree.is_indexable(Path::new("/home/u/sub"), true));
        assert!(!tree.is_indexable(Path::new("/home/u/sub/b.txt"), false));
    }

    #[test]
    fn deepest_root_wins() {
        let mut tree = tree_at(Path::new("/home/u"), DataSourceKind::SingleDirectory);
        tree.add_root("/home/u/Music", DataSourceKind::RecursiveDirectory);
        assert_eq!(
            tree.root_for(Path::new("/home/u/Music/a/b.mp3")),
            Some((Path::new("/home/u/Music"), DataSourceKind::RecursiveDirectory))
        );
        assert!(tree.root_for(Path::new("/home/u/Other/x")).is_none());
    }

    #[test]
    fn marker_file_excludes_subtree_but_not_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("keep/skip/deep")).expect("mkdir");
        fs::write(root.join("keep/skip/.nomedia"), b"").expect("marker");

        let tree = tree_at(root, DataSourceKind::RecursiveDirectory);
        assert!(tree.is_indexable(&root.join("keep"), true));
        assert!(!tree.is_indexable(&root.join("keep/skip"), true));
        assert!(!tree.is_indexable(&root.join("keep/skip/deep/f.txt"), false));

        fs::remove_file(root.join("keep/skip/.nomedia")).expect("unmark");
        assert!(tree.is_indexable(&root.join("keep/skip/deep/f.txt"), false));
    }

    #[test]
    fn text_allowlist_matches_basename() {
        let tree = tree_at(Path::new("/r"), DataSourceKind::RecursiveDirectory);
        assert!(tree.is_text_allowlisted(Path::new("/r/deep/notes.md")));
        assert!(!tree.is_text_allowlisted(Path::new("/r/data.csv")));
    }

    #[test]
    fn bad_glob_is_rejected() {
        let config = IndexingConfig {
            ignored_files: vec!["[".to_string()],
            ..IndexingConfig::default()
        };
        assert!(matches!(
            Filters::from_config(&config),
            Err(QuarryError::Glob(_))
        ));
    }
}

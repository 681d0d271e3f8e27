//! # Configuration
//!
//! TOML configuration for the indexer. Every field has a default, so an
//! empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [indexing]
//! recursive_directories = ["~/Documents", "~/Music"]
//! single_directories = ["~"]
//! ignored_files = ["*.tmp", "*~"]
//! ignored_directories_with_content = [".nomedia"]
//! index_removable_devices = true
//! removable_policy = "preserve"
//!
//! [engine]
//! commit_interval_ms = 500
//! isolation = "process"
//! low_disk_space_limit = 5
//!
//! [storage]
//! database = "~/.cache/quarry/index.db"
//! ```

use crate::registry::{DataSourceKind, RemovalPolicy};
use crate::types::QuarryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// SECTIONS
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub indexing: IndexingConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
}

/// What gets indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexingConfig {
    /// Roots indexed with every descendant.
    pub recursive_directories: Vec<PathBuf>,
    /// Roots indexed with their direct children only.
    pub single_directories: Vec<PathBuf>,
    /// Globs matched against file names.
    pub ignored_files: Vec<String>,
    /// Globs matched against directory names.
    pub ignored_directories: Vec<String>,
    /// File names whose presence excludes the containing directory.
    pub ignored_directories_with_content: Vec<String>,
    /// Globs of plain-text files that get full text extraction. Other
    /// `text/*` files are recorded without content.
    pub text_allowlist: Vec<String>,
    /// Skip dot-files and dot-directories.
    pub filter_hidden: bool,
    /// Index mounted removable volumes.
    pub index_removable_devices: bool,
    /// What happens to a volume's resources when it is unmounted.
    pub removable_policy: RemovalPolicy,
    /// Watch indexed roots for live changes.
    pub enable_monitors: bool,
    /// Keep indexing (throttled) while on battery power.
    pub index_on_battery: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        let strings = |v: &[&str]| v.iter().map(|s| (*s).to_string()).collect();
        Self {
            recursive_directories: ["~/Documents", "~/Music", "~/Pictures", "~/Videos"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            single_directories: ["~", "~/Downloads"].iter().map(PathBuf::from).collect(),
            ignored_files: strings(&[
                "*~", "*.o", "*.la", "*.lo", "*.tmp", "*.part", "*.swp", "*.rej", "*.orig",
                "*.pyc", "#*#", "*.desktop", "*.directory",
            ]),
            ignored_directories: strings(&[
                "po",
                "CVS",
                "core-dumps",
                "lost+found",
                "node_modules",
            ]),
            ignored_directories_with_content: strings(&[".quarryignore", ".nomedia"]),
            text_allowlist: strings(&["*.txt", "*.md", "*.mkd", "*.rst", "*.org"]),
            filter_hidden: true,
            index_removable_devices: true,
            removable_policy: RemovalPolicy::PreserveOnRemove,
            enable_monitors: true,
            index_on_battery: true,
        }
    }
}

/// How extraction runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Blocking thread pool with panic containment.
    Thread,
    /// One short-lived worker process per file.
    #[default]
    Process,
}

/// Scheduling and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Coalescing window for graph commits.
    pub commit_interval_ms: u64,
    /// Maximum change sets per commit.
    pub commit_batch_size: usize,
    /// Extractions running at the same time.
    pub max_concurrent_extractions: usize,
    /// Time limit for one extraction.
    pub extractor_timeout_secs: u64,
    pub isolation: Isolation,
    /// Stay paused until a readiness signal arrives.
    pub wait_for_ready: bool,
    /// Pause while free space on the index volume is at or below this
    /// percentage. Unset or 0 disables the check.
    pub low_disk_space_limit: Option<u8>,
    /// Seconds between free space checks.
    pub disk_check_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_interval_ms: 1000,
            commit_batch_size: 100,
            max_concurrent_extractions: 4,
            extractor_timeout_secs: 30,
            isolation: Isolation::Process,
            wait_for_ready: false,
            low_disk_space_limit: Some(1),
            disk_check_interval_secs: 10,
        }
    }
}

/// Where the graph lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub database: PathBuf,
    /// Move a corrupt database aside and rebuild from the filesystem.
    pub rebuild_on_corruption: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("~/.cache/quarry/index.db"),
            rebuild_on_corruption: true,
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, QuarryError> {
        toml::from_str(s).map_err(|e| QuarryError::InvalidConfig(e.to_string()))
    }

    /// Read, expand and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, QuarryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuarryError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&text)?;
        config.expand_home(home_dir().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Replace a leading `~` or `$HOME` in every configured path.
    pub fn expand_home(&mut self, home: Option<&Path>) {
        let Some(home) = home else {
            return;
        };
        for path in self
            .indexing
            .recursive_directories
            .iter_mut()
            .chain(self.indexing.single_directories.iter_mut())
            .chain(std::iter::once(&mut self.storage.database))
        {
            *path = expand_path(path, home);
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), QuarryError> {
        for root in self.indexing.roots().keys() {
            if !root.is_absolute() {
                return Err(QuarryError::InvalidConfig(format!(
                    "indexed directory must be absolute: {}",
                    root.display()
                )));
            }
        }
        if self.engine.max_concurrent_extractions == 0 {
            return Err(QuarryError::InvalidConfig(
                "max_concurrent_extractions must be at least 1".to_string(),
            ));
        }
        if self.engine.extractor_timeout_secs == 0 {
            return Err(QuarryError::InvalidConfig(
                "extractor_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.engine.low_disk_space_limit.is_some_and(|limit| limit > 100) {
            return Err(QuarryError::InvalidConfig(
                "low_disk_space_limit is a percentage".to_string(),
            ));
        }
        if self.engine.disk_check_interval_secs == 0 {
            return Err(QuarryError::InvalidConfig(
                "disk_check_interval_secs must be at least 1".to_string(),
            ));
        }
        crate::tree::Filters::from_config(&self.indexing)?;
        Ok(())
    }
}

/// The current user's home directory, from `$HOME`.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn expand_path(path: &Path, home: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    for prefix in ["~", "$HOME"] {
        if s == prefix {
            return home.to_path_buf();
        }
        if let Some(rest) = s.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Difference between two indexing configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingDelta {
    /// Roots only present in the new configuration.
    pub added: Vec<(PathBuf, DataSourceKind)>,
    /// Roots only present in the old configuration.
    pub removed: Vec<PathBuf>,
    /// Roots present in both with a different depth.
    pub changed: Vec<(PathBuf, DataSourceKind)>,
    /// Any inclusion/exclusion rule changed.
    pub filters_changed: bool,
    /// Removable volume indexing was switched off.
    pub removable_disabled: bool,
}

impl IndexingDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.filters_changed
            && !self.removable_disabled
    }
}

impl IndexingConfig {
    /// Every configured root with its kind. A directory listed as both
    /// recursive and single is recursive.
    #[must_use]
    pub fn roots(&self) -> BTreeMap<PathBuf, DataSourceKind> {
        let mut roots = BTreeMap::new();
        for dir in &self.single_directories {
            roots.insert(dir.clone(), DataSourceKind::SingleDirectory);
        }
        for dir in &self.recursive_directories {
            roots.insert(dir.clone(), DataSourceKind::RecursiveDirectory);
        }
        roots
    }

    /// Whether two configurations include and exclude the same paths.
    #[must_use]
    pub fn same_filters(&self, other: &Self) -> bool {
        self.ignored_files == other.ignored_files
            && self.ignored_directories == other.ignored_directories
            && self.ignored_directories_with_content == other.ignored_directories_with_content
            && self.text_allowlist == other.text_allowlist
            && self.filter_hidden == other.filter_hidden
    }

    /// What changes when moving from `self` to `new`.
    #[must_use]
    pub fn diff(&self, new: &Self) -> IndexingDelta {
        let old_roots = self.roots();
        let new_roots = new.roots();

        let mut delta = IndexingDelta::default();
        for (root, kind) in &new_roots {
            match old_roots.get(root) {
                None => delta.added.push((root.clone(), *kind)),
                Some(old_kind) if old_kind != kind => delta.changed.push((root.clone(), *kind)),
                Some(_) => {}
            }
        }
        for root in old_roots.keys() {
            if !new_roots.contains_key(root) {
                delta.removed.push(root.clone());
            }
        }
        delta.filters_changed = !self.same_filters(new);
        delta.removable_disabled = self.index_removable_devices && !new.index_removable_devices;
        delta
    }
}

// =============================================================================
// TESTS
// =============================================================================

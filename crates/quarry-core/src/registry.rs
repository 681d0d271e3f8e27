//! # Data Source Registry
//!
//! Tracks the roots the indexer discovers resources under: configured
//! directories (recursive or single-level) and mounted removable volumes.
//!
//! The registry holds no graph handle. Every operation returns the
//! `RegistryAction`s the caller must carry out (crawl a root, cascade-delete
//! a data source, flip availability), which keeps the lifecycle rules
//! testable on their own.
//!
//! ## Lifecycle
//!
//! - Unregistering a directory always cascade-deletes its resources.
//! - A volume going away is flagged unavailable under the preserve policy
//!   and cascade-deleted under the delete policy.
//! - A busy root defers both until `clear_busy`, which finalizes the pending
//!   removal exactly once.

use crate::graph::ResourceGraph;
use crate::types::{Term, Uri};
use crate::vocab::{
    QUARRY_INDEXED_FOLDER, QUARRY_REMOVABLE_VOLUME, QUARRY_ROOT, RDF_TYPE, filesystem_graph,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// TYPES
// =============================================================================

/// What kind of root a data source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataSourceKind {
    RecursiveDirectory,
    SingleDirectory,
    RemovableVolume,
}

impl DataSourceKind {
    /// Whether descendants below the first level are indexed.
    #[must_use]
    pub fn is_recursive(self) -> bool {
        !matches!(self, Self::SingleDirectory)
    }

    /// Class of the data source resource.
    #[must_use]
    pub fn class(self) -> &'static str {
        match self {
            Self::RemovableVolume => QUARRY_REMOVABLE_VOLUME,
            _ => QUARRY_INDEXED_FOLDER,
        }
    }
}

/// What happens to a volume's resources when it goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    #[serde(rename = "delete")]
    DeleteOnRemove,
    #[serde(rename = "preserve")]
    PreserveOnRemove,
}

impl RemovalPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeleteOnRemove => "delete",
            Self::PreserveOnRemove => "preserve",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PendingRemoval {
    Unregister,
    Unavailable,
}

/// A registered root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub root: PathBuf,
    pub kind: DataSourceKind,
    pub policy: RemovalPolicy,
    pub urn: Uri,
    pub available: bool,
    pub busy: bool,
    #[serde(skip)]
    pending: Option<PendingRemoval>,
}

impl DataSource {
    /// Whether a removal is waiting for the root to stop being busy.
    #[must_use]
    pub fn has_pending_removal(&self) -> bool {
        self.pending.is_some()
    }
}

/// Work the caller has to carry out after a registry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAction {
    /// Write (or rewrite) the data source resource.
    Upsert(DataSource),
    /// Crawl the root.
    Crawl {
        root: PathBuf,
        kind: DataSourceKind,
        datasource: Uri,
    },
    /// Delete the data source and everything discovered under it.
    CascadeDelete { root: PathBuf, datasource: Uri },
    /// Flag the data source and its resources.
    SetAvailability {
        root: PathBuf,
        datasource: Uri,
        available: bool,
    },
}

/// A data source found in the graph at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSource {
    pub urn: Uri,
    pub root: PathBuf,
    pub is_volume: bool,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registered roots, keyed by path.
#[derive(Debug, Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<PathBuf, DataSource>,
}

impl DataSourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable URN of the data source for a root.
    #[must_use]
    pub fn urn_for(root: &Path) -> Uri {
        let digest = blake3::hash(root.to_string_lossy().as_bytes());
        Uri::new(format!(
            "urn:quarry:datasource:{}",
            &digest.to_hex().as_str()[..32]
        ))
    }

    /// Register a root. Registering an existing root with a new kind
    /// updates it; registering an unavailable volume again remounts it.
    pub fn register(
        &mut self,
        root: impl Into<PathBuf>,
        kind: DataSourceKind,
        policy: RemovalPolicy,
    ) -> Vec<RegistryAction> {
        let root = root.into();

        if let Some(existing) = self.sources.get_mut(&root) {
            existing.policy = policy;
            if existing.kind != kind {
                existing.kind = kind;
                let source = existing.clone();
                return vec![
                    RegistryAction::Upsert(source.clone()),
                    RegistryAction::Crawl {
                        root,
                        kind,
                        datasource: source.urn,
                    },
                ];
            }
            if !existing.available {
                return self.mark_available(&root, true);
            }
            if existing.pending == Some(PendingRemoval::Unregister) {
                existing.pending = None;
            }
            return Vec::new();
        }

        let source = DataSource {
            urn: Self::urn_for(&root),
            root: root.clone(),
            kind,
            policy,
            available: true,
            busy: false,
            pending: None,
        };
        tracing::info!(root = %root.display(), kind = ?kind, "Data source registered");
        self.sources.insert(root.clone(), source.clone());
        vec![
            RegistryAction::Upsert(source.clone()),
            RegistryAction::Crawl {
                root,
                kind,
                datasource: source.urn,
            },
        ]
    }

    /// Put back a data source known from a previous run without crawling.
    /// A later `register` or `mark_available(root, true)` brings it back.
    pub fn restore(
        &mut self,
        root: impl Into<PathBuf>,
        kind: DataSourceKind,
        policy: RemovalPolicy,
        available: bool,
    ) {
        let root = root.into();
        let source = DataSource {
            urn: Self::urn_for(&root),
            root: root.clone(),
            kind,
            policy,
            available,
            busy: false,
            pending: None,
        };
        self.sources.insert(root, source);
    }

    /// Remove a root and cascade-delete its resources.
    pub fn unregister(&mut self, root: &Path) -> Vec<RegistryAction> {
        let Some(source) = self.sources.get_mut(root) else {
            return Vec::new();
        };
        if source.busy {
            tracing::info!(root = %root.display(), "Data source busy, deferring removal");
            source.pending = Some(PendingRemoval::Unregister);
            return Vec::new();
        }
        self.remove(root)
    }

    /// Flag a root as busy: removals wait until it is cleared.
    pub fn mark_busy(&mut self, root: &Path) -> bool {
        match self.sources.get_mut(root) {
            Some(source) => {
                source.busy = true;
                true
            }
            None => false,
        }
    }

    /// Clear the busy flag and finalize a deferred removal, once.
    pub fn clear_busy(&mut self, root: &Path) -> Vec<RegistryAction> {
        let Some(source) = self.sources.get_mut(root) else {
            return Vec::new();
        };
        source.busy = false;
        match source.pending.take() {
            Some(PendingRemoval::Unregister) => self.remove(root),
            Some(PendingRemoval::Unavailable) => self.finalize_unavailable(root),
            None => Vec::new(),
        }
    }

    /// A root appeared (`true`) or went away (`false`).
    pub fn mark_available(&mut self, root: &Path, available: bool) -> Vec<RegistryAction> {
        let Some(source) = self.sources.get_mut(root) else {
            return Vec::new();
        };

        if available {
            if source.pending == Some(PendingRemoval::Unavailable) {
                source.pending = None;
            }
            if source.available {
                return Vec::new();
            }
            source.available = true;
            tracing::info!(root = %root.display(), "Data source available again");
            return vec![
                RegistryAction::SetAvailability {
                    root: root.to_path_buf(),
                    datasource: source.urn.clone(),
                    available: true,
                },
                RegistryAction::Crawl {
                    root: root.to_path_buf(),
                    kind: source.kind,
                    datasource: source.urn.clone(),
                },
            ];
        }

        if source.busy {
            tracing::info!(root = %root.display(), "Data source busy, deferring unmount");
            if source.pending.is_none() {
                source.pending = Some(PendingRemoval::Unavailable);
            }
            return Vec::new();
        }
        self.finalize_unavailable(root)
    }

    fn finalize_unavailable(&mut self, root: &Path) -> Vec<RegistryAction> {
        let Some(source) = self.sources.get_mut(root) else {
            return Vec::new();
        };
        if source.kind == DataSourceKind::RemovableVolume
            && source.policy == RemovalPolicy::DeleteOnRemove
        {
            return self.remove(root);
        }
        if !source.available {
            return Vec::new();
        }
        source.available = false;
        tracing::info!(root = %root.display(), "Data source unavailable, resources preserved");
        vec![RegistryAction::SetAvailability {
            root: root.to_path_buf(),
            datasource: source.urn.clone(),
            available: false,
        }]
    }

    fn remove(&mut self, root: &Path) -> Vec<RegistryAction> {
        match self.sources.remove(root) {
            Some(source) => {
                tracing::info!(root = %root.display(), "Data source removed");
                vec![RegistryAction::CascadeDelete {
                    root: source.root,
                    datasource: source.urn,
                }]
            }
            None => Vec::new(),
        }
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    #[must_use]
    pub fn get(&self, root: &Path) -> Option<&DataSource> {
        self.sources.get(root)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataSource> {
        self.sources.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Whether a data source is registered and currently available.
    #[must_use]
    pub fn is_active(&self, urn: &Uri) -> bool {
        self.sources
            .values()
            .any(|s| s.urn == *urn && s.available)
    }

    /// Data sources recorded in the graph by a previous run.
    #[must_use]
    pub fn stored(graph: &ResourceGraph) -> Vec<StoredSource> {
        let fs = filesystem_graph();
        let mut found = Vec::new();
        for (class, is_volume) in [(QUARRY_INDEXED_FOLDER, false), (QUARRY_REMOVABLE_VOLUME, true)]
        {
            for (graph_name, subject, predicate) in graph.referrers(&Uri::new(class)) {
                if graph_name != fs || predicate.as_str() != RDF_TYPE {
                    continue;
                }
                let Some(root) = graph
                    .value(&fs, &subject, QUARRY_ROOT)
                    .and_then(Term::as_literal)
                else {
                    continue;
                };
                found.push(StoredSource {
                    urn: subject,
                    root: PathBuf::from(root),
                    is_volume,
                });
            }
        }
        found
    }
}

// =============================================================================
// TESTS
// =============================================================================

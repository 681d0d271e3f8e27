//! # Data Source Reconciliation
//!
//! Keeps the registry, the indexing tree, the monitor and the graph in step
//! when roots come and go: at startup, on configuration changes, and on
//! device notifications.

use super::{Engine, EngineError, Signal};
use crate::monitor::Monitor;
use quarry_core::config::home_dir;
use quarry_core::ingestor::{self, FileFacts};
use quarry_core::registry::StoredSource;
use quarry_core::{
    Config, DataSourceKind, DataSourceRegistry, ExtractorHash, Filters, RegistryAction,
    RemovalPolicy, TaskOrigin, guess_mime,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Engine {
    // =========================================================================
    // STARTUP
    // =========================================================================

    /// Bring the registry in line with what the previous run left in the
    /// graph, then register the configured roots.
    pub(super) async fn startup(&mut self) -> Result<(), EngineError> {
        let stored = {
            let graph = self.graph.read().await;
            DataSourceRegistry::stored(&graph)
        };
        let configured = self.config.indexing.roots();
        let names: BTreeSet<PathBuf> = configured.keys().cloned().collect();

        for source in stored {
            self.reconcile_stored(source, &names).await;
        }
        for (root, kind) in configured {
            let actions = self
                .registry
                .register(root, kind, RemovalPolicy::DeleteOnRemove);
            self.apply(actions).await;
        }

        self.recover_interrupted().await;
        Ok(())
    }

    async fn reconcile_stored(&mut self, source: StoredSource, configured: &BTreeSet<PathBuf>) {
        let indexing = &self.config.indexing;
        if source.is_volume {
            let keep = indexing.index_removable_devices
                && indexing.removable_policy == RemovalPolicy::PreserveOnRemove;
            if keep {
                tracing::info!(
                    root = %source.root.display(),
                    "Volume known from a previous run, waiting for mount"
                );
                let policy = indexing.removable_policy;
                self.registry.restore(
                    &source.root,
                    DataSourceKind::RemovableVolume,
                    policy,
                    false,
                );
                self.tree_mut()
                    .add_root(&source.root, DataSourceKind::RemovableVolume);
                let _ = self
                    .commit_now(&ingestor::availability(&source.urn, false))
                    .await;
                return;
            }
        } else if configured.contains(&source.root) {
            return;
        }

        tracing::info!(
            root = %source.root.display(),
            "Dropping data source that is no longer configured"
        );
        let _ = self
            .commit_now(&ingestor::drop_datasource(&source.urn))
            .await;
    }

    /// Files that were being extracted when the previous run died are
    /// recorded as failed so they are not retried until they change.
    async fn recover_interrupted(&mut self) {
        let interrupted = {
            let graph = self.graph.read().await;
            graph.interrupted_extractions()
        };
        let paths = match interrupted {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read the extraction journal");
                Vec::new()
            }
        };

        for path in paths.iter().map(PathBuf::from) {
            tracing::warn!(
                path = %path.display(),
                "Extraction was interrupted, recording as failed"
            );
            let Some(facts) = self.facts_for(&path) else {
                continue;
            };
            let module = self
                .gateway
                .modules()
                .for_mime(&facts.mime)
                .map(|m| m.info());
            let hash = ExtractorHash::compute(facts.stamp, module.map(|m| (m.name, m.version)));
            let _ = self.commit_now(&ingestor::failed(&facts, &hash)).await;
        }

        if !paths.is_empty() {
            if let Err(e) = self.graph.write().await.clear_extractions() {
                tracing::warn!(error = %e, "Cannot clear the extraction journal");
            }
        }
    }

    fn facts_for(&self, path: &Path) -> Option<FileFacts> {
        let meta = std::fs::symlink_metadata(path).ok()?;
        if meta.file_type().is_symlink() {
            return None;
        }
        let provenance = self.provenance(path)?;
        Some(FileFacts::from_metadata(
            path,
            &meta,
            guess_mime(path, meta.is_dir()),
            provenance.datasource,
            provenance.is_root,
        ))
    }

    // =========================================================================
    // REGISTRY ACTIONS
    // =========================================================================

    /// Carry out what the registry asked for. Buffered results are committed
    /// first so they are subject to the action.
    pub(super) async fn apply(&mut self, actions: Vec<RegistryAction>) {
        for action in actions {
            match action {
                RegistryAction::Upsert(source) => {
                    self.flush().await;
                    let _ = self.commit_now(&ingestor::datasource(&source)).await;
                }
                RegistryAction::Crawl { root, kind, .. } => {
                    self.tree_mut().add_root(&root, kind);
                    if let Some(monitor) = self.monitor.as_mut() {
                        monitor.watch(&root, kind);
                    }
                    if kind == DataSourceKind::RemovableVolume {
                        self.emit(Signal::EndpointAdded { root: root.clone() });
                    }
                    self.start_walk(root, TaskOrigin::Crawl, Vec::new(), false);
                }
                RegistryAction::CascadeDelete { root, datasource } => {
                    let kind = self.tree.root_for(&root).map(|(_, kind)| kind);
                    self.tree_mut().remove_root(&root);
                    if let Some(monitor) = self.monitor.as_mut() {
                        monitor.unwatch(&root);
                    }
                    self.abandon_under(&root);
                    self.flush().await;
                    tracing::info!(root = %root.display(), "Deleting everything under data source");
                    let _ = self
                        .commit_now(&ingestor::drop_datasource(&datasource))
                        .await;
                    if kind == Some(DataSourceKind::RemovableVolume) {
                        self.emit(Signal::EndpointRemoved { root });
                    }
                }
                RegistryAction::SetAvailability {
                    root,
                    datasource,
                    available,
                } => {
                    if !available {
                        if let Some(monitor) = self.monitor.as_mut() {
                            monitor.unwatch(&root);
                        }
                        self.abandon_under(&root);
                    }
                    self.flush().await;
                    let _ = self
                        .commit_now(&ingestor::availability(&datasource, available))
                        .await;
                    if !available {
                        self.emit(Signal::EndpointRemoved { root });
                    }
                }
            }
        }
    }

    // =========================================================================
    // DEVICES
    // =========================================================================

    pub(super) async fn mount(&mut self, root: PathBuf) -> bool {
        if !self.config.indexing.index_removable_devices {
            tracing::debug!(root = %root.display(), "Removable indexing disabled, ignoring mount");
            return false;
        }
        let policy = self.config.indexing.removable_policy;
        let actions = self
            .registry
            .register(root, DataSourceKind::RemovableVolume, policy);
        self.apply(actions).await;
        true
    }

    pub(super) async fn unmount(&mut self, root: &Path) {
        let actions = self.registry.mark_available(root, false);
        self.apply(actions).await;
    }

    pub(super) async fn set_busy(&mut self, root: &Path, busy: bool) -> bool {
        if busy {
            return self.registry.mark_busy(root);
        }
        let known = self.registry.get(root).is_some();
        let actions = self.registry.clear_busy(root);
        self.apply(actions).await;
        known
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Switch to a new configuration, touching only what changed.
    pub(super) async fn reconfigure(&mut self, mut config: Config) -> Result<(), EngineError> {
        config.expand_home(home_dir().as_deref());
        config.validate()?;
        let filters = Filters::from_config(&config.indexing)?;
        let delta = self.config.indexing.diff(&config.indexing);

        self.buffer.set_limits(
            Duration::from_millis(config.engine.commit_interval_ms),
            config.engine.commit_batch_size,
        );
        self.gateway.reconfigure(&config.engine);
        self.state
            .set_index_on_battery(config.indexing.index_on_battery);
        if config.storage != self.config.storage {
            tracing::warn!("Storage settings take effect on restart");
        }

        let monitors = config.indexing.enable_monitors;
        let disk_period = config.engine.disk_check_interval_secs;
        if disk_period != self.config.engine.disk_check_interval_secs {
            self.disk_check = super::disk_interval(disk_period);
        }
        self.config = config;
        self.toggle_monitors(monitors)?;
        self.check_disk();

        if delta.is_empty() {
            return Ok(());
        }
        tracing::info!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            changed = delta.changed.len(),
            filters_changed = delta.filters_changed,
            "Applying configuration change"
        );

        if delta.filters_changed {
            self.tree_mut().set_filters(filters);
        }
        for root in &delta.removed {
            let actions = self.registry.unregister(root);
            self.apply(actions).await;
        }
        if delta.removable_disabled {
            let volumes: Vec<PathBuf> = self
                .registry
                .iter()
                .filter(|s| s.kind == DataSourceKind::RemovableVolume)
                .map(|s| s.root.clone())
                .collect();
            for root in volumes {
                let actions = self.registry.unregister(&root);
                self.apply(actions).await;
            }
        }

        let mut crawled = BTreeSet::new();
        for (root, kind) in delta.added.into_iter().chain(delta.changed) {
            crawled.insert(root.clone());
            let actions = self
                .registry
                .register(root, kind, RemovalPolicy::DeleteOnRemove);
            self.apply(actions).await;
        }

        if delta.filters_changed {
            let recheck: Vec<PathBuf> = self
                .registry
                .iter()
                .filter(|s| s.available && !crawled.contains(&s.root))
                .map(|s| s.root.clone())
                .collect();
            for root in recheck {
                self.start_walk(root, TaskOrigin::Crawl, Vec::new(), true);
            }
        }
        Ok(())
    }

    fn toggle_monitors(&mut self, enabled: bool) -> Result<(), EngineError> {
        match (enabled, self.monitor.is_some()) {
            (true, false) => {
                let mut monitor = Monitor::new(self.events_tx.clone())
                    .map_err(|e| EngineError::Monitor(e.to_string()))?;
                for source in self.registry.iter().filter(|s| s.available) {
                    monitor.watch(&source.root, source.kind);
                }
                self.monitor = Some(monitor);
            }
            (false, true) => {
                tracing::info!("Live monitoring disabled");
                self.monitor = None;
            }
            _ => {}
        }
        Ok(())
    }
}

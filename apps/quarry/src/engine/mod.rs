//! # Indexing Engine
//!
//! The async half of the indexer. One tokio task owns the queue, the data
//! source registry, the indexing tree, the commit buffer and the state
//! controller; everything else talks to it through an `EngineHandle`.
//!
//! ```text
//!   HTTP / CLI ──► EngineHandle ──commands──┐
//!                                           ▼
//!   Monitor ────────events───────►  dispatcher loop ──spawn──► jobs ──► Gateway
//!                                     │        ▲                 │
//!                                     │        └────outcomes─────┘
//!                                     ▼
//!                               CommitBuffer ──► ResourceGraph ◄── readers
//! ```
//!
//! Readers (queries, status) go straight to the shared graph under a read
//! lock. Every write goes through the loop.

mod dispatcher;
mod disk;
mod job;
mod sources;

use crate::gateway::Gateway;
use crate::monitor::{Monitor, MonitorEvent};
use quarry_core::state::Inhibitor;
use quarry_core::{
    ChangeSet, CommitBuffer, CommitReport, Config, DataSource, DataSourceRegistry, GraphEvent,
    GraphName, IndexingTree, MinerState, PauseReason, QuarryError, ResourceGraph,
    StateController, StorageConfig, TaskQueue,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinSet;

/// Capacity of the signal channel. Slow subscribers skip what they missed.
const SIGNAL_CAPACITY: usize = 1024;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("indexing engine is not running")]
    Stopped,

    #[error(transparent)]
    Core(#[from] QuarryError),

    #[error("cannot watch the filesystem: {0}")]
    Monitor(String),
}

// =============================================================================
// SIGNALS & STATUS
// =============================================================================

/// Notifications broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    StateChanged {
        #[serde(flatten)]
        state: MinerState,
        progress: u8,
        remaining: usize,
    },
    /// One path went through the dispatcher.
    FilesProcessed {
        path: PathBuf,
        success: bool,
        message: Option<String>,
    },
    GraphUpdated {
        events: Vec<GraphEvent>,
    },
    EndpointAdded {
        root: PathBuf,
    },
    EndpointRemoved {
        root: PathBuf,
    },
}

impl Signal {
    /// The `signal` tag, also used as the SSE event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::FilesProcessed { .. } => "files_processed",
            Self::GraphUpdated { .. } => "graph_updated",
            Self::EndpointAdded { .. } => "endpoint_added",
            Self::EndpointRemoved { .. } => "endpoint_removed",
        }
    }
}

/// Snapshot of the engine, refreshed on every loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(flatten)]
    pub state: MinerState,
    pub progress: u8,
    pub queued: usize,
    pub in_flight: usize,
    pub pending_commits: usize,
    pub walking: usize,
    pub running: bool,
    pub reasons: BTreeSet<PauseReason>,
    pub inhibitors: Vec<Inhibitor>,
    pub datasources: Vec<DataSource>,
}

/// Result of an on-demand index request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub path: PathBuf,
    pub success: bool,
    pub message: Option<String>,
}

impl IndexOutcome {
    fn failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            path,
            success: false,
            message: Some(message.into()),
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Index {
        path: PathBuf,
        recursive: bool,
        graphs: Option<BTreeSet<GraphName>>,
        reply: oneshot::Sender<IndexOutcome>,
    },
    Inhibit {
        application: String,
        reason: String,
        reply: oneshot::Sender<u32>,
    },
    Uninhibit {
        cookie: u32,
        reply: oneshot::Sender<bool>,
    },
    Power {
        on_battery: bool,
        low_battery: bool,
    },
    Ready(bool),
    Reconfigure {
        config: Box<Config>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Mount {
        root: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    Unmount(PathBuf),
    Busy {
        root: PathBuf,
        busy: bool,
        reply: oneshot::Sender<bool>,
    },
    LowMemory,
    Update {
        changes: ChangeSet,
        reply: oneshot::Sender<Result<CommitReport, EngineError>>,
    },
    Changed(MonitorEvent),
    WaitIdle(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable access to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    graph: Arc<RwLock<ResourceGraph>>,
    signals: broadcast::Sender<Signal>,
    status: watch::Receiver<Status>,
}

impl EngineHandle {
    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// The shared graph. Hold the read lock briefly: the loop needs the
    /// write lock to commit.
    #[must_use]
    pub fn graph(&self) -> &Arc<RwLock<ResourceGraph>> {
        &self.graph
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// A receiver that sees every status refresh.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start)
    }

    /// Stop dispatching. Queued work is kept for the next `start`.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    /// Index a path now, bypassing the fingerprint check, and wait for the
    /// result. With `recursive`, a directory is indexed with everything
    /// below it. `graphs` restricts which content graphs are acceptable.
    pub async fn index(
        &self,
        path: impl Into<PathBuf>,
        recursive: bool,
        graphs: Option<BTreeSet<GraphName>>,
    ) -> Result<IndexOutcome, EngineError> {
        let path = path.into();
        self.call(|reply| Command::Index {
            path,
            recursive,
            graphs,
            reply,
        })
        .await
    }

    /// Hold the engine paused. Returns the cookie that releases the hold.
    pub async fn inhibit(
        &self,
        application: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<u32, EngineError> {
        let application = application.into();
        let reason = reason.into();
        self.call(|reply| Command::Inhibit {
            application,
            reason,
            reply,
        })
        .await
    }

    pub async fn uninhibit(&self, cookie: u32) -> Result<bool, EngineError> {
        self.call(|reply| Command::Uninhibit { cookie, reply }).await
    }

    pub fn set_power(&self, on_battery: bool, low_battery: bool) -> Result<(), EngineError> {
        self.send(Command::Power {
            on_battery,
            low_battery,
        })
    }

    pub fn set_ready(&self, ready: bool) -> Result<(), EngineError> {
        self.send(Command::Ready(ready))
    }

    /// Apply a new configuration, reconciling roots and filters
    /// incrementally.
    pub async fn reconfigure(&self, config: Config) -> Result<(), EngineError> {
        let config = Box::new(config);
        self.call(|reply| Command::Reconfigure { config, reply })
            .await?
    }

    /// A removable volume was mounted at `root`. Returns whether it is
    /// indexed.
    pub async fn mount(&self, root: impl Into<PathBuf>) -> Result<bool, EngineError> {
        let root = root.into();
        self.call(|reply| Command::Mount { root, reply }).await
    }

    pub fn unmount(&self, root: impl Into<PathBuf>) -> Result<(), EngineError> {
        self.send(Command::Unmount(root.into()))
    }

    /// Flag a data source root busy (removals wait) or free it. Returns
    /// whether the root is known.
    pub async fn set_busy(
        &self,
        root: impl Into<PathBuf>,
        busy: bool,
    ) -> Result<bool, EngineError> {
        let root = root.into();
        self.call(|reply| Command::Busy { root, busy, reply }).await
    }

    pub fn low_memory(&self) -> Result<(), EngineError> {
        self.send(Command::LowMemory)
    }

    /// Commit a change set directly, after everything already buffered.
    pub async fn update(&self, changes: ChangeSet) -> Result<CommitReport, EngineError> {
        self.call(|reply| Command::Update { changes, reply }).await?
    }

    /// Feed a change notification as if the monitor had reported it.
    pub fn report_change(&self, path: impl Into<PathBuf>) -> Result<(), EngineError> {
        self.send(Command::Changed(MonitorEvent::Changed(path.into())))
    }

    /// Wait until nothing is queued, running, walking or buffered.
    pub async fn wait_idle(&self) -> Result<(), EngineError> {
        self.call(Command::WaitIdle).await
    }

    /// Finish running extractions, commit what is buffered and stop the loop.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.call(Command::Shutdown).await
    }
}

// =============================================================================
// ENGINE STATE
// =============================================================================

/// Where a path's resources are recorded.
#[derive(Debug, Clone)]
struct Provenance {
    datasource: quarry_core::Uri,
    is_root: bool,
    available: bool,
}

/// A processed path waiting in the commit buffer.
#[derive(Debug)]
struct Processed {
    path: PathBuf,
    requests: Vec<u64>,
    success: bool,
    message: Option<String>,
}

/// An on-demand request waiting for its paths.
#[derive(Debug)]
struct Pending {
    path: PathBuf,
    reply: oneshot::Sender<IndexOutcome>,
    /// Tasks carrying this request that have not reported yet.
    remaining: usize,
    /// Directory walks still expanding this request.
    walks: usize,
    failures: Vec<(PathBuf, Option<String>)>,
}

struct Engine {
    config: Config,
    graph: Arc<RwLock<ResourceGraph>>,
    gateway: Gateway,
    registry: DataSourceRegistry,
    tree: Arc<IndexingTree>,
    queue: TaskQueue,
    state: StateController,
    buffer: CommitBuffer<Processed>,
    monitor: Option<Monitor>,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
    jobs: JoinSet<job::JobResult>,
    walks: JoinSet<dispatcher::Walked>,
    walking: Vec<PathBuf>,
    held: Vec<PathBuf>,
    requests: BTreeMap<u64, Pending>,
    next_request: u64,
    resume_at: Option<Instant>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    signals: broadcast::Sender<Signal>,
    status: watch::Sender<Status>,
    disk_check: tokio::time::Interval,
    /// Consecutive extractions that saw the file change, per path.
    retries: BTreeMap<PathBuf, u32>,
}

impl Engine {
    fn tree_mut(&mut self) -> &mut IndexingTree {
        Arc::make_mut(&mut self.tree)
    }

    fn provenance(&self, path: &Path) -> Option<Provenance> {
        let (root, _) = self.tree.root_for(path)?;
        let source = self.registry.get(root)?;
        Some(Provenance {
            datasource: source.urn.clone(),
            is_root: root == path,
            available: source.available,
        })
    }

    fn emit(&self, signal: Signal) {
        let _ = self.signals.send(signal);
    }
}

// =============================================================================
// STARTUP
// =============================================================================

/// Open the configured store, creating its directory. A corrupt store is
/// moved aside when the configuration allows it.
pub fn open_graph(storage: &StorageConfig) -> Result<ResourceGraph, EngineError> {
    if let Some(parent) = storage.database.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            QuarryError::Io(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    let (graph, rebuilt) =
        ResourceGraph::open_or_rebuild(&storage.database, storage.rebuild_on_corruption)?;
    if rebuilt {
        tracing::warn!(
            path = %storage.database.display(),
            "Rebuilding the index from the filesystem"
        );
    }
    Ok(graph)
}

/// Ticks for the free space check, the first one a full period from now.
fn disk_interval(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Start the engine on a tokio runtime. Data sources are reconciled with the
/// graph before this returns; crawling continues in the background.
pub async fn spawn(
    config: Config,
    gateway: Gateway,
    graph: ResourceGraph,
) -> Result<EngineHandle, EngineError> {
    config.validate()?;

    let tree = IndexingTree::from_config(&config.indexing)?;
    let (events_tx, events) = mpsc::unbounded_channel();
    let monitor = if config.indexing.enable_monitors {
        Some(Monitor::new(events_tx.clone()).map_err(|e| EngineError::Monitor(e.to_string()))?)
    } else {
        None
    };
    let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
    let state = StateController::new(
        config.indexing.index_on_battery,
        config.engine.wait_for_ready,
    );
    let buffer = CommitBuffer::new(
        Duration::from_millis(config.engine.commit_interval_ms),
        config.engine.commit_batch_size,
    );
    let (status_tx, status_rx) = watch::channel(Status {
        state: state.state(),
        progress: 100,
        queued: 0,
        in_flight: 0,
        pending_commits: 0,
        walking: 0,
        running: true,
        reasons: state.reasons(),
        inhibitors: Vec::new(),
        datasources: Vec::new(),
    });
    let graph = Arc::new(RwLock::new(graph));
    let disk_check = disk_interval(config.engine.disk_check_interval_secs);

    let mut engine = Engine {
        config,
        graph: Arc::clone(&graph),
        gateway,
        registry: DataSourceRegistry::new(),
        tree: Arc::new(tree),
        queue: TaskQueue::new(),
        state,
        buffer,
        monitor,
        events_tx,
        events,
        jobs: JoinSet::new(),
        walks: JoinSet::new(),
        walking: Vec::new(),
        held: Vec::new(),
        requests: BTreeMap::new(),
        next_request: 1,
        resume_at: None,
        idle_waiters: Vec::new(),
        signals: signals.clone(),
        status: status_tx,
        disk_check,
        retries: BTreeMap::new(),
    };
    engine.startup().await?;

    let (commands, rx) = mpsc::unbounded_channel();
    tokio::spawn(engine.run(rx));

    Ok(EngineHandle {
        commands,
        graph,
        signals,
        status: status_rx,
    })
}

//! # Task Queue
//!
//! The serialization point between producers (crawl, monitor, on-demand
//! requests) and the dispatcher.
//!
//! ## Guarantees
//!
//! - At most one task per path is in flight. A task for a busy path waits in
//!   the queue and is skipped by `pop` until the in-flight one completes.
//! - At most one task per path is queued. Enqueueing a path that is already
//!   queued merges into the existing task: flags are or-ed, the higher
//!   priority wins, the newest sequence number is kept and every waiting
//!   request id is carried along.
//! - Order: priority first (`High` before `Normal` before `Low`), then the
//!   position at which the path was first queued.
//!
//! Sequence numbers are global and monotonic, so for any path the task with
//! the larger `seq` carries the most recent intent.

use crate::types::GraphName;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// =============================================================================
// TASKS
// =============================================================================

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Who produced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Crawl,
    Monitor,
    OnDemand,
}

impl TaskOrigin {
    #[must_use]
    pub fn priority(self) -> Priority {
        match self {
            Self::Crawl => Priority::Low,
            Self::Monitor => Priority::Normal,
            Self::OnDemand => Priority::High,
        }
    }
}

/// What a producer asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub path: PathBuf,
    pub origin: TaskOrigin,
    /// Re-extract even when the fingerprint matches.
    pub force: bool,
    /// Walk the directory and queue its entries.
    pub subtree: bool,
    /// Acceptable target graphs (`None` accepts any).
    pub graphs: Option<BTreeSet<GraphName>>,
    /// On-demand request waiting for this path.
    pub request: Option<u64>,
}

impl TaskRequest {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, origin: TaskOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
            force: origin == TaskOrigin::OnDemand,
            subtree: false,
            graphs: None,
            request: None,
        }
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn subtree(mut self, subtree: bool) -> Self {
        self.subtree = subtree;
        self
    }

    #[must_use]
    pub fn graphs(mut self, graphs: Option<BTreeSet<GraphName>>) -> Self {
        self.graphs = graphs;
        self
    }

    #[must_use]
    pub fn request(mut self, id: u64) -> Self {
        self.request = Some(id);
        self
    }
}

/// A unit of work handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub path: PathBuf,
    pub origin: TaskOrigin,
    pub priority: Priority,
    /// Sequence number of the newest request merged into this task.
    pub seq: u64,
    pub force: bool,
    pub subtree: bool,
    pub graphs: Option<BTreeSet<GraphName>>,
    /// On-demand requests to notify when the task completes.
    pub requests: Vec<u64>,
    position: u64,
}

impl Task {
    fn order_key(&self) -> (Reverse<Priority>, u64) {
        (Reverse(self.priority), self.position)
    }

    fn merge(&mut self, req: TaskRequest, seq: u64) {
        self.force |= req.force;
        self.subtree |= req.subtree;
        if req.origin.priority() > self.priority {
            self.priority = req.origin.priority();
            self.origin = req.origin;
        }
        self.graphs = match (self.graphs.take(), req.graphs) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            _ => None,
        };
        self.requests.extend(req.request);
        self.seq = seq;
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Priority queue with per-path exclusivity.
#[derive(Debug, Default)]
pub struct TaskQueue {
    next_seq: u64,
    queued: BTreeMap<PathBuf, Task>,
    order: BTreeMap<(Reverse<Priority>, u64), PathBuf>,
    in_flight: BTreeMap<PathBuf, u64>,
    processed: u64,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request, merging with a queued task for the same path.
    /// Returns the sequence number assigned to the request.
    pub fn enqueue(&mut self, req: TaskRequest) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;

        if let Some(task) = self.queued.get_mut(&req.path) {
            self.order.remove(&task.order_key());
            task.merge(req, seq);
            self.order.insert(task.order_key(), task.path.clone());
            return seq;
        }

        let task = Task {
            priority: req.origin.priority(),
            path: req.path,
            origin: req.origin,
            seq,
            force: req.force,
            subtree: req.subtree,
            graphs: req.graphs,
            requests: req.request.into_iter().collect(),
            position: seq,
        };
        self.order.insert(task.order_key(), task.path.clone());
        self.queued.insert(task.path.clone(), task);
        seq
    }

    /// Take the next task whose path is not in flight and mark it in flight.
    pub fn pop(&mut self) -> Option<Task> {
        let key = self
            .order
            .iter()
            .find(|(_, path)| !self.in_flight.contains_key(*path))
            .map(|(key, _)| *key)?;
        let path = self.order.remove(&key)?;
        let task = self.queued.remove(&path)?;
        self.in_flight.insert(path, task.seq);
        Some(task)
    }

    /// Release a path after its task finished.
    pub fn complete(&mut self, path: &Path) -> bool {
        let released = self.in_flight.remove(path).is_some();
        if released {
            self.processed += 1;
        }
        if self.is_idle() {
            self.processed = 0;
        }
        released
    }

    /// Remove every queued task at or below `root`.
    pub fn drain_under(&mut self, root: &Path) -> Vec<Task> {
        let paths: Vec<PathBuf> = self
            .queued
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        let mut drained = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(task) = self.queued.remove(&path) {
                self.order.remove(&task.order_key());
                drained.push(task);
            }
        }
        drained
    }

    /// Remove every queued task.
    pub fn clear(&mut self) -> Vec<Task> {
        self.order.clear();
        let drained = std::mem::take(&mut self.queued).into_values().collect();
        if self.in_flight.is_empty() {
            self.processed = 0;
        }
        drained
    }

    #[must_use]
    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.contains_key(path)
    }

    #[must_use]
    pub fn is_queued(&self, path: &Path) -> bool {
        self.queued.contains_key(path)
    }

    /// Queued tasks (not counting in-flight ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing queued and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    /// Percentage of known work already processed since the queue was last
    /// idle.
    #[must_use]
    pub fn progress(&self) -> u8 {
        let remaining = (self.queued.len() + self.in_flight.len()) as u64;
        let total = self.processed + remaining;
        if total == 0 {
            return 100;
        }
        (self.processed * 100 / total) as u8
    }
}

// =============================================================================
// TESTS
// =============================================================================

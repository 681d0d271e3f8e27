//! # Dispatcher Loop
//!
//! Drains the task queue into extraction jobs while the state controller
//! allows it, batches their change sets into commits, and expands walks
//! and monitor events into tasks.
//!
//! A path stays in flight in the queue from the moment its task is popped
//! until its change set is committed, so a second task for the same path
//! can never read a fingerprint that is about to be replaced.

use super::disk;
use super::job::{self, JobContext, JobOutcome, JobResult};
use super::{Command, Engine, EngineError, IndexOutcome, Pending, Processed, Signal, Status};
use crate::monitor::MonitorEvent;
use quarry_core::crawler::{self, ChangeAction, CrawlEntry};
use quarry_core::state::disk_space_low;
use quarry_core::vocab::NIE_URL;
use quarry_core::{
    ChangeSet, CommitReport, PauseReason, Task, TaskOrigin, TaskRequest, Uri,
    graph::commit_healing,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Extractions of one path in a row that may see the file change under
/// them. Past this the path waits for its next change event.
const MAX_CHANGE_RETRIES: u32 = 3;

/// A finished directory walk.
#[derive(Debug)]
pub(super) struct Walked {
    start: PathBuf,
    origin: TaskOrigin,
    requests: Vec<u64>,
    entries: Vec<CrawlEntry>,
    stale: Vec<PathBuf>,
}

impl Engine {
    // =========================================================================
    // LOOP
    // =========================================================================

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!("Indexing engine started");
        self.check_disk();
        let mut stopped_by = None;
        loop {
            self.dispatch();
            self.publish();

            let flush_at = self.buffer.deadline().map(tokio::time::Instant::from_std);
            let resume_at = self.resume_at.map(tokio::time::Instant::from_std);
            let now = tokio::time::Instant::now();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        stopped_by = Some(reply);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(event) = self.events.recv() => self.on_event(event).await,
                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => match joined {
                    Ok(result) => self.on_job(result),
                    Err(e) => tracing::error!(error = %e, "Job task failed"),
                },
                Some(joined) = self.walks.join_next(), if !self.walks.is_empty() => match joined {
                    Ok(walked) => self.on_walk(walked).await,
                    Err(e) => tracing::error!(error = %e, "Walk task failed"),
                },
                () = tokio::time::sleep_until(flush_at.unwrap_or(now)), if flush_at.is_some() => {
                    self.flush().await;
                }
                () = tokio::time::sleep_until(resume_at.unwrap_or(now)),
                    if resume_at.is_some() => {}
                _ = self.disk_check.tick() => self.check_disk(),
            }

            if self.buffer.is_due(Instant::now()) {
                self.flush().await;
            }
        }

        self.shutdown().await;
        // Release the graph before acknowledging.
        drop(self);
        if let Some(reply) = stopped_by {
            let _ = reply.send(());
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!(running = self.jobs.len(), "Indexing engine shutting down");
        self.walks.shutdown().await;
        while let Some(joined) = self.jobs.join_next().await {
            if let Ok(result) = joined {
                self.on_job(result);
            }
        }
        self.flush().await;
        for (_, pending) in std::mem::take(&mut self.requests) {
            let _ = pending
                .reply
                .send(IndexOutcome::failed(pending.path, "indexer shutting down"));
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.state.set_running(true),
            Command::Stop => self.state.set_running(false),
            Command::Index {
                path,
                recursive,
                graphs,
                reply,
            } => self.on_index(path, recursive, graphs, reply),
            Command::Inhibit {
                application,
                reason,
                reply,
            } => {
                let _ = reply.send(self.state.inhibit(&application, &reason));
            }
            Command::Uninhibit { cookie, reply } => {
                let _ = reply.send(self.state.uninhibit(cookie));
            }
            Command::Power {
                on_battery,
                low_battery,
            } => self.state.set_power(on_battery, low_battery),
            Command::Ready(ready) => self.state.set_ready(ready),
            Command::Reconfigure { config, reply } => {
                let _ = reply.send(self.reconfigure(*config).await);
            }
            Command::Mount { root, reply } => {
                let _ = reply.send(self.mount(root).await);
            }
            Command::Unmount(root) => self.unmount(&root).await,
            Command::Busy { root, busy, reply } => {
                let _ = reply.send(self.set_busy(&root, busy).await);
            }
            Command::LowMemory => {
                tracing::info!(buffered = self.buffer.len(), "Low memory, committing now");
                self.flush().await;
            }
            Command::Update { changes, reply } => {
                self.flush().await;
                let _ = reply.send(self.commit_now(&changes).await);
            }
            Command::Changed(event) => self.on_event(event).await,
            Command::WaitIdle(reply) => self.idle_waiters.push(reply),
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// Pause while the volume holding the index is short of space.
    pub(super) fn check_disk(&mut self) {
        let limit = self.config.engine.low_disk_space_limit.filter(|l| *l > 0);
        let low = limit.is_some_and(|limit| {
            match disk::usage(&self.config.storage.database) {
                Some((available, total)) => {
                    let low = disk_space_low(available, total, Some(limit));
                    if low != self.state.reasons().contains(&PauseReason::LowDiskSpace) {
                        if low {
                            tracing::warn!(available, total, limit, "Disk space low, pausing");
                        } else {
                            tracing::info!(available, total, limit, "Disk space recovered");
                        }
                    }
                    low
                }
                None => {
                    tracing::debug!(
                        path = %self.config.storage.database.display(),
                        "Free space of the index volume is unknown"
                    );
                    false
                }
            }
        });
        self.state.set_low_disk(low);
    }

    /// Refresh the externally visible state.
    fn publish(&mut self) {
        let has_work = !self.queue.is_idle()
            || !self.buffer.is_empty()
            || !self.walks.is_empty()
            || !self.jobs.is_empty();
        self.state.set_has_work(has_work);

        if let Some(state) = self.state.refresh() {
            self.emit(Signal::StateChanged {
                state,
                progress: self.queue.progress(),
                remaining: self.queue.len(),
            });
        }
        self.status.send_replace(Status {
            state: self.state.state(),
            progress: self.queue.progress(),
            queued: self.queue.len(),
            in_flight: self.queue.in_flight_len(),
            pending_commits: self.buffer.len(),
            walking: self.walks.len(),
            running: self.state.is_running(),
            reasons: self.state.reasons(),
            inhibitors: self.state.inhibitors(),
            datasources: self.registry.iter().cloned().collect(),
        });

        if !has_work {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    fn dispatch(&mut self) {
        if !self.state.can_dispatch() {
            return;
        }
        let throttle = self.state.throttle();
        let limit = match throttle {
            Some(_) => 1,
            None => self.config.engine.max_concurrent_extractions,
        };

        while self.jobs.len() < limit {
            if let Some(at) = self.resume_at {
                if Instant::now() < at {
                    break;
                }
                self.resume_at = None;
            }
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.spawn_job(task);
            if let Some(delay) = throttle {
                self.resume_at = Some(Instant::now() + delay);
            }
        }
    }

    fn spawn_job(&mut self, task: Task) {
        let ctx = JobContext {
            graph: Arc::clone(&self.graph),
            gateway: self.gateway.clone(),
            tree: Arc::clone(&self.tree),
            provenance: self.provenance(&task.path),
        };
        tracing::trace!(path = %task.path.display(), origin = ?task.origin, "Dispatching");

        let fallback = task.clone();
        self.jobs.spawn(async move {
            match tokio::spawn(job::run(ctx, task)).await {
                Ok(result) => result,
                Err(e) => JobResult::aborted(fallback, e.to_string()),
            }
        });
    }

    fn on_job(&mut self, result: JobResult) {
        let JobResult {
            task,
            outcome,
            is_dir,
            datasource,
        } = result;

        if !matches!(outcome, JobOutcome::Retry) {
            self.retries.remove(&task.path);
        }
        match outcome {
            JobOutcome::Commit {
                changes,
                success,
                message,
                removal,
            } => {
                let still_active = datasource
                    .as_ref()
                    .is_none_or(|urn| self.registry.is_active(urn));
                if !removal && !still_active {
                    tracing::debug!(
                        path = %task.path.display(),
                        "Data source went away, dropping result"
                    );
                    self.finish(
                        task.path,
                        &task.requests,
                        false,
                        Some("data source is no longer available".to_string()),
                    );
                    return;
                }
                if task.subtree && is_dir && !removal {
                    self.expand(&task);
                }
                self.buffer.push(
                    changes,
                    Processed {
                        path: task.path,
                        requests: task.requests,
                        success,
                        message,
                    },
                    Instant::now(),
                );
            }
            JobOutcome::Unchanged => {
                if task.subtree && is_dir {
                    self.expand(&task);
                }
                self.finish(task.path, &task.requests, true, None);
            }
            JobOutcome::Skipped(message) => {
                self.finish(task.path, &task.requests, false, Some(message));
            }
            JobOutcome::Retry => {
                let attempts = self.retries.entry(task.path.clone()).or_insert(0);
                *attempts += 1;
                if *attempts > MAX_CHANGE_RETRIES {
                    self.retries.remove(&task.path);
                    tracing::warn!(
                        path = %task.path.display(),
                        "File keeps changing, giving up until its next change"
                    );
                    self.finish(
                        task.path,
                        &task.requests,
                        false,
                        Some("file kept changing during extraction".to_string()),
                    );
                    return;
                }
                tracing::debug!(
                    path = %task.path.display(),
                    attempts = *attempts,
                    "Changed during extraction, requeueing"
                );
                self.queue.complete(&task.path);
                self.requeue(task);
            }
        }
    }

    /// Put a task back with every request it carried.
    fn requeue(&mut self, task: Task) {
        let request = |id: Option<u64>| {
            let req = TaskRequest::new(task.path.clone(), task.origin)
                .force(task.force)
                .subtree(task.subtree)
                .graphs(task.graphs.clone());
            match id {
                Some(id) => req.request(id),
                None => req,
            }
        };
        if task.requests.is_empty() {
            self.queue.enqueue(request(None));
        } else {
            for id in &task.requests {
                self.queue.enqueue(request(Some(*id)));
            }
        }
    }

    /// Release a path and report it.
    fn finish(&mut self, path: PathBuf, requests: &[u64], success: bool, message: Option<String>) {
        self.queue.complete(&path);
        self.report(path, requests, success, message);
    }

    fn report(&mut self, path: PathBuf, requests: &[u64], success: bool, message: Option<String>) {
        for id in requests {
            if let Some(pending) = self.requests.get_mut(id) {
                pending.remaining = pending.remaining.saturating_sub(1);
                if !success {
                    pending.failures.push((path.clone(), message.clone()));
                }
            }
            self.settle(*id);
        }
        self.emit(Signal::FilesProcessed {
            path,
            success,
            message,
        });
    }

    /// Answer a request once nothing is left for it.
    fn settle(&mut self, id: u64) {
        let done = self
            .requests
            .get(&id)
            .is_some_and(|p| p.remaining == 0 && p.walks == 0);
        if !done {
            return;
        }
        let Some(pending) = self.requests.remove(&id) else {
            return;
        };
        let outcome = match pending.failures.as_slice() {
            [] => IndexOutcome {
                path: pending.path,
                success: true,
                message: None,
            },
            [(_, message)] => IndexOutcome {
                message: message.clone().or_else(|| Some("indexing failed".to_string())),
                path: pending.path,
                success: false,
            },
            [(first, message), ..] => IndexOutcome {
                message: Some(format!(
                    "{} paths failed, first {}: {}",
                    pending.failures.len(),
                    first.display(),
                    message.as_deref().unwrap_or("indexing failed")
                )),
                path: pending.path,
                success: false,
            },
        };
        tracing::debug!(
            id,
            path = %outcome.path.display(),
            success = outcome.success,
            "Request done"
        );
        let _ = pending.reply.send(outcome);
    }

    fn on_index(
        &mut self,
        path: PathBuf,
        recursive: bool,
        graphs: Option<BTreeSet<quarry_core::GraphName>>,
        reply: tokio::sync::oneshot::Sender<IndexOutcome>,
    ) {
        if std::fs::symlink_metadata(&path).is_err() {
            let _ = reply.send(IndexOutcome::failed(path, "no such file or directory"));
            return;
        }
        match self.provenance(&path) {
            None => {
                let _ = reply.send(IndexOutcome::failed(
                    path,
                    "path is not within an indexed location",
                ));
                return;
            }
            Some(p) if !p.available => {
                let _ = reply.send(IndexOutcome::failed(path, "data source is unavailable"));
                return;
            }
            Some(_) => {}
        }

        let id = self.next_request;
        self.next_request += 1;
        tracing::info!(id, path = %path.display(), recursive, "Index requested");
        self.requests.insert(
            id,
            Pending {
                path: path.clone(),
                reply,
                remaining: 1,
                walks: 0,
                failures: Vec::new(),
            },
        );
        self.queue.enqueue(
            TaskRequest::new(path, TaskOrigin::OnDemand)
                .force(true)
                .subtree(recursive)
                .graphs(graphs)
                .request(id),
        );
    }

    // =========================================================================
    // COMMITS
    // =========================================================================

    /// Commit everything buffered and release the paths it covered.
    pub(super) async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let outcome = {
            let mut graph = self.graph.write().await;
            self.buffer.flush(&mut graph)
        };
        tracing::debug!(
            items = outcome.items.len(),
            inserted = outcome.report.inserted,
            removed = outcome.report.removed,
            "Committed batch"
        );
        if !outcome.report.events.is_empty() {
            self.emit(Signal::GraphUpdated {
                events: outcome.report.events,
            });
        }
        for (done, result) in outcome.items {
            let (success, message) = match result {
                Ok(()) => (done.success, done.message),
                Err(e) => (false, Some(e.to_string())),
            };
            self.finish(done.path, &done.requests, success, message);
        }
    }

    /// Commit one change set right away, healing a stale unique value.
    pub(super) async fn commit_now(
        &mut self,
        changes: &ChangeSet,
    ) -> Result<CommitReport, EngineError> {
        let mut healed = Vec::new();
        let result = {
            let mut graph = self.graph.write().await;
            commit_healing(&mut graph, changes, &mut healed)
        };
        match result {
            Ok(report) => {
                if !report.events.is_empty() {
                    self.emit(Signal::GraphUpdated {
                        events: report.events.clone(),
                    });
                }
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Commit failed");
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // WALKS
    // =========================================================================

    /// Walk a directory off the loop. With `delta_only`, entries the graph
    /// already knows are left out.
    pub(super) fn start_walk(
        &mut self,
        start: PathBuf,
        origin: TaskOrigin,
        requests: Vec<u64>,
        delta_only: bool,
    ) {
        let graph = Arc::clone(&self.graph);
        let tree = Arc::clone(&self.tree);
        self.walking.push(start.clone());
        tracing::debug!(start = %start.display(), ?origin, delta_only, "Walking");

        self.walks.spawn(async move {
            let walked_start = start.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut entries = crawler::walk(&tree, &walked_start);
                let graph = graph.blocking_read();
                let seen: BTreeSet<&Path> = entries.iter().map(|e| e.path.as_path()).collect();
                let stale = crawler::stale_paths(&graph, &tree, &walked_start, &seen);
                if delta_only {
                    entries.retain(|e| {
                        graph
                            .subject_with(NIE_URL, Uri::from_path(&e.path).as_str())
                            .is_none()
                    });
                }
                (entries, stale)
            })
            .await;

            let (entries, stale) = result.unwrap_or_else(|e| {
                tracing::error!(start = %start.display(), error = %e, "Walk aborted");
                (Vec::new(), Vec::new())
            });
            Walked {
                start,
                origin,
                requests,
                entries,
                stale,
            }
        });
    }

    /// A recursive on-demand task reached its directory: walk below it.
    fn expand(&mut self, task: &Task) {
        for id in &task.requests {
            if let Some(pending) = self.requests.get_mut(id) {
                pending.walks += 1;
            }
        }
        self.start_walk(
            task.path.clone(),
            TaskOrigin::OnDemand,
            task.requests.clone(),
            false,
        );
    }

    async fn on_walk(&mut self, walked: Walked) {
        if let Some(i) = self.walking.iter().position(|s| *s == walked.start) {
            self.walking.swap_remove(i);
        }
        let on_demand = !walked.requests.is_empty();
        tracing::debug!(
            start = %walked.start.display(),
            entries = walked.entries.len(),
            stale = walked.stale.len(),
            "Walk finished"
        );

        for entry in walked.entries {
            if on_demand && entry.path == walked.start {
                continue;
            }
            if !self.provenance(&entry.path).is_some_and(|p| p.available) {
                continue;
            }
            if on_demand {
                for id in &walked.requests {
                    if let Some(pending) = self.requests.get_mut(id) {
                        pending.remaining += 1;
                    }
                    self.queue.enqueue(
                        TaskRequest::new(&entry.path, TaskOrigin::OnDemand)
                            .force(true)
                            .request(*id),
                    );
                }
            } else {
                self.queue
                    .enqueue(TaskRequest::new(entry.path, walked.origin));
            }
        }
        for path in walked.stale {
            if self.provenance(&path).is_none_or(|p| p.available) {
                self.queue.enqueue(TaskRequest::new(path, TaskOrigin::Crawl));
            }
        }

        for id in &walked.requests {
            if let Some(pending) = self.requests.get_mut(id) {
                pending.walks = pending.walks.saturating_sub(1);
            }
            self.settle(*id);
        }

        let held = std::mem::take(&mut self.held);
        for path in held {
            self.on_change(path).await;
        }
    }

    // =========================================================================
    // LIVE CHANGES
    // =========================================================================

    async fn on_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Changed(path) => self.on_change(path).await,
            MonitorEvent::Overflow => {
                tracing::warn!("Change notifications were lost, walking every root again");
                let roots: Vec<PathBuf> = self
                    .registry
                    .iter()
                    .filter(|s| s.available)
                    .map(|s| s.root.clone())
                    .collect();
                for root in roots {
                    self.start_walk(root, TaskOrigin::Crawl, Vec::new(), false);
                }
            }
        }
    }

    async fn on_change(&mut self, path: PathBuf) {
        if self.walking.iter().any(|start| path.starts_with(start)) {
            self.held.push(path);
            return;
        }
        if !self.provenance(&path).is_none_or(|p| p.available) {
            return;
        }
        let action = {
            let graph = self.graph.read().await;
            crawler::classify(&graph, &self.tree, &path)
        };
        tracing::trace!(path = %path.display(), ?action, "Change observed");
        match action {
            ChangeAction::Index(path) | ChangeAction::Remove(path) => {
                self.queue
                    .enqueue(TaskRequest::new(path, TaskOrigin::Monitor));
            }
            ChangeAction::Walk(dir) => {
                self.start_walk(dir, TaskOrigin::Monitor, Vec::new(), false);
            }
            ChangeAction::Ignore => {}
        }
    }

    /// Forget queued work below a root that went away.
    pub(super) fn abandon_under(&mut self, root: &Path) {
        self.held.retain(|p| !p.starts_with(root));
        for task in self.queue.drain_under(root) {
            self.report(
                task.path,
                &task.requests,
                false,
                Some("data source removed".to_string()),
            );
        }
    }
}

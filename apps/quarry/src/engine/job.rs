//! # Jobs
//!
//! One job per popped task. A job reads the disk and the graph, decides
//! what the path needs, runs the extractor through the gateway if it has to,
//! and hands back a change set. It never writes resources itself; only the
//! extraction journal is touched directly.

use super::Provenance;
use crate::gateway::Gateway;
use quarry_core::ingestor::{self, FileFacts};
use quarry_core::{
    ChangeSet, ExtractionFailure, ExtractorHash, FileStamp, IndexingTree, ResourceGraph, Task,
    Uri, guess_mime,
};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a job needs from the engine.
pub(super) struct JobContext {
    pub graph: Arc<RwLock<ResourceGraph>>,
    pub gateway: Gateway,
    pub tree: Arc<IndexingTree>,
    pub provenance: Option<Provenance>,
}

#[derive(Debug)]
pub(super) enum JobOutcome {
    /// Buffer these changes.
    Commit {
        changes: ChangeSet,
        success: bool,
        message: Option<String>,
        /// The path is gone and the changes delete it.
        removal: bool,
    },
    /// The graph is already up to date.
    Unchanged,
    /// Nothing was done, and the caller should know why.
    Skipped(String),
    /// The file changed while it was being extracted.
    Retry,
}

#[derive(Debug)]
pub(super) struct JobResult {
    pub task: Task,
    pub outcome: JobOutcome,
    pub is_dir: bool,
    pub datasource: Option<Uri>,
}

impl JobResult {
    /// The job task itself died.
    pub(super) fn aborted(task: Task, reason: String) -> Self {
        tracing::error!(path = %task.path.display(), reason, "Job aborted");
        Self {
            task,
            outcome: JobOutcome::Skipped(format!("job aborted: {}", reason)),
            is_dir: false,
            datasource: None,
        }
    }
}

fn removal(path: &Path) -> JobOutcome {
    JobOutcome::Commit {
        changes: ingestor::removed(path),
        success: true,
        message: Some("removed".to_string()),
        removal: true,
    }
}

fn commit(changes: ChangeSet) -> JobOutcome {
    JobOutcome::Commit {
        changes,
        success: true,
        message: None,
        removal: false,
    }
}

/// Stat without following links. `None` when the path is gone or is a link.
async fn stat(path: &Path) -> Result<Option<Metadata>, std::io::Error> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => Ok(None),
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

// =============================================================================
// RUN
// =============================================================================

pub(super) async fn run(ctx: JobContext, task: Task) -> JobResult {
    let (outcome, is_dir) = process(&ctx, &task).await;
    JobResult {
        task,
        outcome,
        is_dir,
        datasource: ctx.provenance.map(|p| p.datasource),
    }
}

async fn process(ctx: &JobContext, task: &Task) -> (JobOutcome, bool) {
    let path = task.path.as_path();

    let meta = match stat(path).await {
        Ok(Some(meta)) => meta,
        Ok(None) => return (removal(path), false),
        Err(e) => return (JobOutcome::Skipped(e.to_string()), false),
    };
    let is_dir = meta.is_dir();

    let Some(provenance) = &ctx.provenance else {
        return (removal(path), is_dir);
    };
    if !provenance.available {
        return (
            JobOutcome::Skipped("data source is unavailable".to_string()),
            is_dir,
        );
    }
    if !ctx.tree.is_indexable(path, is_dir) {
        return (removal(path), is_dir);
    }

    let mime = guess_mime(path, is_dir);
    let module = if is_dir {
        None
    } else {
        ctx.gateway.modules().for_mime(&mime).map(|m| m.info())
    };
    let facts = FileFacts::from_metadata(
        path,
        &meta,
        mime.clone(),
        provenance.datasource.clone(),
        provenance.is_root,
    );
    let hash = ExtractorHash::compute(facts.stamp, module.map(|m| (m.name, m.version)));
    let file = facts.uri();
    let expected = module.map(|m| m.graph_name());

    let (stored, correction) = {
        let graph = ctx.graph.read().await;
        (
            ExtractorHash::stored(&graph, &file),
            ingestor::mismatched_graphs(&graph, &file, expected.as_ref()),
        )
    };

    if !task.force && stored.as_ref() == Some(&hash) {
        let outcome = match correction {
            Some(changes) => {
                tracing::info!(path = %path.display(), "Removing content from a mismatched graph");
                commit(changes)
            }
            None => JobOutcome::Unchanged,
        };
        return (outcome, is_dir);
    }

    if let Some(wanted) = &task.graphs {
        if !is_dir && !expected.as_ref().is_some_and(|g| wanted.contains(g)) {
            let handled_by = expected.map_or_else(|| "no graph".to_string(), |g| g.to_string());
            return (
                JobOutcome::Skipped(format!(
                    "{} belongs to {}, not a requested graph",
                    path.display(),
                    handled_by
                )),
                is_dir,
            );
        }
    }

    let Some(module) = module else {
        return (commit(ingestor::metadata_only(&facts, &hash)), is_dir);
    };
    if mime.starts_with("text/") && !ctx.tree.is_text_allowlisted(path) {
        return (
            commit(ingestor::shallow_text(&facts, &module, &hash)),
            is_dir,
        );
    }

    let key = path.to_string_lossy();
    if let Err(e) = ctx.graph.write().await.begin_extraction(&key) {
        tracing::warn!(path = %path.display(), error = %e, "Cannot journal extraction");
    }
    let result = ctx.gateway.extract(module.name, path, &mime).await;
    if let Err(e) = ctx.graph.write().await.end_extraction(&key) {
        tracing::warn!(path = %path.display(), error = %e, "Cannot clear extraction journal");
    }

    match stat(path).await {
        Ok(None) => return (removal(path), false),
        Err(e) => return (JobOutcome::Skipped(e.to_string()), is_dir),
        Ok(Some(after)) if FileStamp::from_metadata(&after) != facts.stamp => {
            return (JobOutcome::Retry, is_dir);
        }
        Ok(Some(_)) => {}
    }

    let outcome = match result {
        Ok(metadata) => commit(ingestor::extracted(&facts, &module, &hash, &metadata)),
        Err(ExtractionFailure::NotFound) => removal(path),
        Err(failure) => {
            tracing::warn!(
                path = %path.display(),
                module = module.name,
                error = %failure,
                "Extraction failed"
            );
            JobOutcome::Commit {
                changes: ingestor::failed(&facts, &hash),
                success: false,
                message: Some(failure.to_string()),
                removal: false,
            }
        }
    };
    (outcome, is_dir)
}

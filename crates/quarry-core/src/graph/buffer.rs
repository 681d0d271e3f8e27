//! # Commit Buffer
//!
//! Coalesces change sets into batched commits. Items are held until the
//! coalescing window closes or the batch is full, then committed together.
//!
//! ## Failure handling
//!
//! A batch is first committed as one transaction. If that fails, every item
//! is retried on its own so one bad item cannot sink its neighbours. An item
//! failing on a unique constraint is healed once: the stale holder of the
//! value is cascade-deleted in the same transaction as the retried item.

use super::{Change, ChangeSet, CommitReport, ResourceGraph};
use crate::types::{QuarryError, Uri};
use std::time::{Duration, Instant};

/// Result of flushing the buffer.
#[derive(Debug)]
pub struct FlushOutcome<T> {
    /// Per-item result, in push order.
    pub items: Vec<(T, Result<(), QuarryError>)>,
    /// Combined report of everything that was committed.
    pub report: CommitReport,
    /// Stale subjects removed while healing constraint violations.
    pub healed: Vec<Uri>,
}

/// Batches change sets for coalesced commits.
#[derive(Debug)]
pub struct CommitBuffer<T> {
    pending: Vec<(ChangeSet, T)>,
    opened_at: Option<Instant>,
    window: Duration,
    max_items: usize,
}

impl<T> CommitBuffer<T> {
    /// Create a buffer with a coalescing window and a batch size limit.
    #[must_use]
    pub fn new(window: Duration, max_items: usize) -> Self {
        Self {
            pending: Vec::new(),
            opened_at: None,
            window,
            max_items: max_items.max(1),
        }
    }

    /// Change the window and batch size for future batches.
    pub fn set_limits(&mut self, window: Duration, max_items: usize) {
        self.window = window;
        self.max_items = max_items.max(1);
    }

    /// Queue a change set. The window opens with the first item.
    pub fn push(&mut self, changes: ChangeSet, tag: T, now: Instant) {
        if self.pending.is_empty() {
            self.opened_at = Some(now);
        }
        self.pending.push((changes, tag));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the batch reached its size limit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_items
    }

    /// When the current window closes.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.window)
    }

    /// Whether the batch should be committed now.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        !self.pending.is_empty() && (self.is_full() || self.deadline().is_some_and(|d| now >= d))
    }

    /// Commit everything pending.
    pub fn flush(&mut self, graph: &mut ResourceGraph) -> FlushOutcome<T> {
        let pending = std::mem::take(&mut self.pending);
        self.opened_at = None;

        let mut outcome = FlushOutcome {
            items: Vec::with_capacity(pending.len()),
            report: CommitReport::default(),
            healed: Vec::new(),
        };
        if pending.is_empty() {
            return outcome;
        }

        let mut combined = ChangeSet::new();
        for (changes, _) in &pending {
            combined.extend(changes.clone());
        }

        match graph.commit(&combined) {
            Ok(report) => {
                outcome.report = report;
                outcome
                    .items
                    .extend(pending.into_iter().map(|(_, tag)| (tag, Ok(()))));
            }
            Err(e) => {
                if pending.len() > 1 {
                    tracing::debug!(
                        error = %e,
                        items = pending.len(),
                        "Batched commit failed, committing items one by one"
                    );
                }
                for (changes, tag) in pending {
                    let result = commit_healing(graph, &changes, &mut outcome.healed)
                        .map(|report| outcome.report.absorb(report));
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "Dropping change set that cannot be committed");
                    }
                    outcome.items.push((tag, result));
                }
            }
        }
        outcome
    }
}

/// Commit a change set, healing one unique-constraint violation by deleting
/// the stale holder of the value.
pub fn commit_healing(
    graph: &mut ResourceGraph,
    changes: &ChangeSet,
    healed: &mut Vec<Uri>,
) -> Result<CommitReport, QuarryError> {
    match graph.commit(changes) {
        Err(QuarryError::ConstraintViolation {
            predicate,
            value,
            existing,
        }) => {
            tracing::warn!(
                predicate = %predicate,
                value = %value,
                stale = %existing,
                "Replacing stale resource holding a unique value"
            );
            let mut retry = ChangeSet::new().with(Change::DeleteResource {
                subject: existing.clone(),
            });
            retry.extend(changes.clone());
            let report = graph.commit(&retry)?;
            healed.push(existing);
            Ok(report)
        }
        other => other,
    }
}

// =============================================================================
// TESTS
// =============================================================================

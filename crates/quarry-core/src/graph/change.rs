//! # Change Sets
//!
//! The unit of mutation for the resource graph. A `ChangeSet` is an ordered
//! list of `Change`s that is applied atomically by `ResourceGraph::commit`.

use crate::types::{GraphName, Term, Triple, Uri};
use serde::{Deserialize, Serialize};

/// A single mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Add triples to a graph.
    Insert { graph: GraphName, triples: Vec<Triple> },

    /// Remove a subject from one graph.
    ///
    /// Resources the subject owns in that graph, and resources depending on
    /// it in that graph, go with it. If the subject is then absent from
    /// every graph, the full cascade runs.
    Delete { graph: GraphName, subject: Uri },

    /// Remove a subject from every graph and run the full cascade.
    DeleteResource { subject: Uri },

    /// Remove and add properties of one subject in one graph.
    ///
    /// A removal with `None` as value removes every value of the predicate.
    Update {
        graph: GraphName,
        subject: Uri,
        removed: Vec<(Uri, Option<Term>)>,
        added: Vec<(Uri, Term)>,
    },

    /// Remove every resource interpreting a file: objects of its
    /// `nie:interpretedAs` and subjects that are `nie:isStoredAs` it,
    /// in any graph.
    DropContent { file: Uri },

    /// Set `quarry:available` on a data source and every FileObject
    /// discovered under it.
    SetAvailable { datasource: Uri, available: bool },
}

/// An ordered group of changes applied as one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Create an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Builder-style append.
    #[must_use]
    pub fn with(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    /// Append every change of another set.
    pub fn extend(&mut self, other: ChangeSet) {
        self.changes.extend(other.changes);
    }

    /// The changes in application order.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

impl From<Vec<Change>> for ChangeSet {
    fn from(changes: Vec<Change>) -> Self {
        Self { changes }
    }
}

// =============================================================================
// COMMIT RESULTS
// =============================================================================

/// What happened to a subject within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphEventKind {
    Created,
    Updated,
    Deleted,
}

/// Per-graph notification produced by a commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEvent {
    pub graph: GraphName,
    pub subject: Uri,
    pub kind: GraphEventKind,
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Quads that became visible.
    pub inserted: usize,
    /// Quads that stopped being visible.
    pub removed: usize,
    /// Subject-level events, one per touched (graph, subject).
    pub events: Vec<GraphEvent>,
}

impl CommitReport {
    /// Merge another report into this one.
    pub fn absorb(&mut self, other: CommitReport) {
        self.inserted += other.inserted;
        self.removed += other.removed;
        self.events.extend(other.events);
    }
}

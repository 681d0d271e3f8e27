//! # Resource Graph
//!
//! The store of everything the indexer knows: subjects partitioned into
//! named graphs, kept in memory with the indices cascade deletion needs,
//! and mirrored to redb one commit at a time.
//!
//! ## Indices
//!
//! - `graphs`: graph -> subject -> predicate -> objects
//! - `referrers`: target URI -> every (graph, subject, predicate) pointing at it
//! - `locations`: subject -> graphs it appears in
//! - `unique`: (predicate, value) -> holders, for unique predicates (`nie:url`)
//!
//! The `referrers` index is the adjacency list deletion walks: a cascade
//! never scans the store, it follows inbound and outbound edges of the
//! subjects being removed.
//!
//! ## Commits
//!
//! `commit` applies a `ChangeSet` against the indices while recording an
//! undo journal. Any error (validation, unique constraint, storage) rolls the
//! indices back, so a commit is either fully visible or not at all.

pub mod buffer;
pub mod change;
pub mod pattern;

pub use buffer::{CommitBuffer, FlushOutcome, commit_healing};
pub use change::{Change, ChangeSet, CommitReport, GraphEvent, GraphEventKind};
pub use pattern::{Query, Row, Slot, TriplePattern};

use crate::storage::RedbStore;
use crate::types::{GraphName, Quad, QuarryError, Term, Triple, Uri};
use crate::vocab::{
    self, COLLECTABLE_CLASSES, MAX_LITERAL_LENGTH, MAX_URI_LENGTH, NIE_DATA_SOURCE,
    NIE_INTERPRETED_AS, NIE_IS_STORED_AS, PredicateRole, QUARRY_AVAILABLE, RDF_TYPE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// predicate -> objects
pub type Properties = BTreeMap<Uri, BTreeSet<Term>>;

type Partition = BTreeMap<Uri, Properties>;

/// Metadata key holding the paths currently being extracted, one per line.
const EXTRACTING_KEY: &str = "extracting";

// =============================================================================
// INDICES
// =============================================================================

#[derive(Debug, Default)]
struct Indices {
    graphs: BTreeMap<GraphName, Partition>,
    referrers: BTreeMap<Uri, BTreeSet<(GraphName, Uri, Uri)>>,
    locations: BTreeMap<Uri, BTreeSet<GraphName>>,
    unique: BTreeMap<(Uri, String), BTreeMap<Uri, usize>>,
    quad_count: usize,
}

/// Key under which a term is stored in the unique index.
fn unique_key(term: &Term) -> String {
    match term {
        Term::Uri(u) => u.0.clone(),
        Term::Literal(s) => s.clone(),
        Term::Integer(i) => i.to_string(),
        Term::Boolean(b) => b.to_string(),
    }
}

impl Indices {
    fn contains(&self, quad: &Quad) -> bool {
        self.graphs
            .get(&quad.graph)
            .and_then(|p| p.get(&quad.subject))
            .and_then(|props| props.get(&quad.predicate))
            .is_some_and(|values| values.contains(&quad.object))
    }

    fn in_graph(&self, graph: &GraphName, subject: &Uri) -> bool {
        self.graphs
            .get(graph)
            .is_some_and(|p| p.contains_key(subject))
    }

    fn add(&mut self, quad: Quad) -> bool {
        let Quad {
            graph,
            subject,
            predicate,
            object,
        } = quad;

        let inserted = self
            .graphs
            .entry(graph.clone())
            .or_default()
            .entry(subject.clone())
            .or_default()
            .entry(predicate.clone())
            .or_default()
            .insert(object.clone());
        if !inserted {
            return false;
        }

        self.quad_count += 1;
        self.locations
            .entry(subject.clone())
            .or_default()
            .insert(graph.clone());
        if vocab::is_unique(predicate.as_str()) {
            *self
                .unique
                .entry((predicate.clone(), unique_key(&object)))
                .or_default()
                .entry(subject.clone())
                .or_default() += 1;
        }
        if let Term::Uri(target) = object {
            self.referrers
                .entry(target)
                .or_default()
                .insert((graph, subject, predicate));
        }
        true
    }

    fn remove(&mut self, quad: &Quad) -> bool {
        let mut subject_gone = false;
        let mut partition_gone = false;
        {
            let Some(partition) = self.graphs.get_mut(&quad.graph) else {
                return false;
            };
            let Some(props) = partition.get_mut(&quad.subject) else {
                return false;
            };
            let Some(values) = props.get_mut(&quad.predicate) else {
                return false;
            };
            if !values.remove(&quad.object) {
                return false;
            }
            if values.is_empty() {
                props.remove(&quad.predicate);
            }
            if props.is_empty() {
                partition.remove(&quad.subject);
                subject_gone = true;
            }
            if partition.is_empty() {
                partition_gone = true;
            }
        }
        if partition_gone {
            self.graphs.remove(&quad.graph);
        }

        self.quad_count = self.quad_count.saturating_sub(1);

        if subject_gone {
            let empty = match self.locations.get_mut(&quad.subject) {
                Some(graphs) => {
                    graphs.remove(&quad.graph);
                    graphs.is_empty()
                }
                None => false,
            };
            if empty {
                self.locations.remove(&quad.subject);
            }
        }

        if vocab::is_unique(quad.predicate.as_str()) {
            let key = (quad.predicate.clone(), unique_key(&quad.object));
            let mut key_empty = false;
            if let Some(holders) = self.unique.get_mut(&key) {
                let mut holder_empty = false;
                if let Some(count) = holders.get_mut(&quad.subject) {
                    *count = count.saturating_sub(1);
                    holder_empty = *count == 0;
                }
                if holder_empty {
                    holders.remove(&quad.subject);
                }
                key_empty = holders.is_empty();
            }
            if key_empty {
                self.unique.remove(&key);
            }
        }

        if let Term::Uri(target) = &quad.object {
            let mut empty = false;
            if let Some(refs) = self.referrers.get_mut(target) {
                refs.remove(&(
                    quad.graph.clone(),
                    quad.subject.clone(),
                    quad.predicate.clone(),
                ));
                empty = refs.is_empty();
            }
            if empty {
                self.referrers.remove(target);
            }
        }
        true
    }

    fn subject_quads(&self, graph: &GraphName, subject: &Uri) -> Vec<Quad> {
        let Some(props) = self.graphs.get(graph).and_then(|p| p.get(subject)) else {
            return Vec::new();
        };
        props
            .iter()
            .flat_map(|(predicate, values)| {
                values.iter().map(move |object| Quad {
                    graph: graph.clone(),
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object: object.clone(),
                })
            })
            .collect()
    }
}

// =============================================================================
// UNDO JOURNAL
// =============================================================================

#[derive(Debug)]
enum Op {
    Added(Quad),
    Removed(Quad),
}

#[derive(Debug, Default)]
struct Journal {
    ops: Vec<Op>,
    /// (graph, subject) -> whether the subject was present before the commit
    touched: BTreeMap<(GraphName, Uri), bool>,
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a ResourceGraph.
#[derive(Debug)]
pub enum StorageBackend {
    /// Volatile: metadata lives in a map, quads only in the indices.
    InMemory(BTreeMap<String, Vec<u8>>),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(BTreeMap::new())
    }
}

// =============================================================================
// RESOURCE GRAPH
// =============================================================================

/// The resource graph: named graphs, cascade indices, and a storage backend.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    idx: Indices,
    backend: StorageBackend,
}

impl ResourceGraph {
    /// Create an empty in-memory graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a persistent graph, loading every stored quad.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuarryError> {
        let store = RedbStore::open(path)?;
        let mut idx = Indices::default();
        for quad in store.load()? {
            idx.add(quad);
        }
        tracing::info!(
            path = %store.path().display(),
            quads = idx.quad_count,
            "Resource graph loaded"
        );
        Ok(Self {
            idx,
            backend: StorageBackend::Persistent(store),
        })
    }

    /// Open a persistent graph, replacing a corrupt store with a fresh one
    /// when `rebuild_on_corruption` is set.
    ///
    /// Returns the graph and whether it was rebuilt from scratch.
    pub fn open_or_rebuild(
        path: impl AsRef<Path>,
        rebuild_on_corruption: bool,
    ) -> Result<(Self, bool), QuarryError> {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(graph) => Ok((graph, false)),
            Err(QuarryError::Corrupted(msg)) if rebuild_on_corruption => {
                let moved = RedbStore::quarantine(path)?;
                tracing::warn!(
                    reason = %msg,
                    moved_to = %moved.display(),
                    "Resource graph corrupt, starting from an empty store"
                );
                Ok((Self::open(path)?, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Whether commits are persisted to disk.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Total number of quads.
    #[must_use]
    pub fn quad_count(&self) -> usize {
        self.idx.quad_count
    }

    /// Names of every non-empty graph.
    #[must_use]
    pub fn graph_names(&self) -> Vec<GraphName> {
        self.idx.graphs.keys().cloned().collect()
    }

    /// Number of subjects in a graph.
    #[must_use]
    pub fn subject_count(&self, graph: &GraphName) -> usize {
        self.idx.graphs.get(graph).map_or(0, BTreeMap::len)
    }

    /// Whether the subject appears in any graph.
    #[must_use]
    pub fn contains_subject(&self, subject: &Uri) -> bool {
        self.idx.locations.contains_key(subject)
    }

    /// Whether the subject appears in the given graph.
    #[must_use]
    pub fn contains_in(&self, graph: &GraphName, subject: &Uri) -> bool {
        self.idx.in_graph(graph, subject)
    }

    /// Graphs the subject appears in.
    #[must_use]
    pub fn graphs_of(&self, subject: &Uri) -> Vec<GraphName> {
        self.idx
            .locations
            .get(subject)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every property of a subject in one graph.
    #[must_use]
    pub fn properties(&self, graph: &GraphName, subject: &Uri) -> Option<&Properties> {
        self.idx.graphs.get(graph).and_then(|p| p.get(subject))
    }

    /// First value of a property, in term order.
    #[must_use]
    pub fn value(&self, graph: &GraphName, subject: &Uri, predicate: &str) -> Option<&Term> {
        self.properties(graph, subject)
            .and_then(|props| props.get(&Uri::new(predicate)))
            .and_then(|values| values.iter().next())
    }

    /// Every value of a property.
    #[must_use]
    pub fn values(&self, graph: &GraphName, subject: &Uri, predicate: &str) -> Vec<&Term> {
        self.properties(graph, subject)
            .and_then(|props| props.get(&Uri::new(predicate)))
            .map(|values| values.iter().collect())
            .unwrap_or_default()
    }

    /// Whether the subject has the class in any graph.
    #[must_use]
    pub fn has_type(&self, subject: &Uri, class: &str) -> bool {
        let class = Term::uri(class);
        self.idx.locations.get(subject).is_some_and(|graphs| {
            graphs.iter().any(|g| {
                self.properties(g, subject)
                    .and_then(|props| props.get(&Uri::new(RDF_TYPE)))
                    .is_some_and(|types| types.contains(&class))
            })
        })
    }

    /// The subject holding a unique property value, if any.
    #[must_use]
    pub fn subject_with(&self, predicate: &str, value: &str) -> Option<&Uri> {
        self.idx
            .unique
            .get(&(Uri::new(predicate), value.to_string()))
            .and_then(|holders| holders.keys().next())
    }

    /// Every (value, subject) of a unique predicate whose value starts with
    /// `prefix`, in value order.
    #[must_use]
    pub fn unique_values_with_prefix(&self, predicate: &str, prefix: &str) -> Vec<(String, Uri)> {
        let predicate = Uri::new(predicate);
        self.idx
            .unique
            .range((predicate.clone(), prefix.to_string())..)
            .take_while(|((p, v), _)| *p == predicate && v.starts_with(prefix))
            .flat_map(|((_, v), holders)| holders.keys().map(move |s| (v.clone(), s.clone())))
            .collect()
    }

    /// Every (graph, subject, predicate) pointing at the target.
    #[must_use]
    pub fn referrers(&self, target: &Uri) -> Vec<(GraphName, Uri, Uri)> {
        self.idx
            .referrers
            .get(target)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Insert triples into a graph.
    pub fn insert(
        &mut self,
        graph: GraphName,
        triples: Vec<Triple>,
    ) -> Result<CommitReport, QuarryError> {
        self.commit(&ChangeSet::from(vec![Change::Insert { graph, triples }]))
    }

    /// Delete a subject from a graph, cascading when it vanishes everywhere.
    pub fn delete(&mut self, graph: GraphName, subject: Uri) -> Result<CommitReport, QuarryError> {
        self.commit(&ChangeSet::from(vec![Change::Delete { graph, subject }]))
    }

    /// Delete a subject from every graph with full cascade.
    pub fn delete_resource(&mut self, subject: Uri) -> Result<CommitReport, QuarryError> {
        self.commit(&ChangeSet::from(vec![Change::DeleteResource { subject }]))
    }

    /// Replace properties of a subject in a graph.
    pub fn update(
        &mut self,
        graph: GraphName,
        subject: Uri,
        removed: Vec<(Uri, Option<Term>)>,
        added: Vec<(Uri, Term)>,
    ) -> Result<CommitReport, QuarryError> {
        self.commit(&ChangeSet::from(vec![Change::Update {
            graph,
            subject,
            removed,
            added,
        }]))
    }

    /// Apply a change set atomically.
    ///
    /// # Errors
    ///
    /// On any error the graph is left exactly as it was before the call:
    /// - `InvalidResource` if a triple fails validation
    /// - `ConstraintViolation` if a unique value would gain a second holder
    /// - `Storage` if the backend could not persist the commit
    pub fn commit(&mut self, changes: &ChangeSet) -> Result<CommitReport, QuarryError> {
        let mut journal = Journal::default();

        for change in changes.changes() {
            if let Err(e) = self.apply_change(change, &mut journal) {
                self.rollback(journal);
                return Err(e);
            }
        }

        // Net effect: quads whose presence differs from before the commit.
        let mut initial: BTreeMap<&Quad, bool> = BTreeMap::new();
        for op in &journal.ops {
            match op {
                Op::Added(q) => {
                    initial.entry(q).or_insert(false);
                }
                Op::Removed(q) => {
                    initial.entry(q).or_insert(true);
                }
            }
        }
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for (quad, was_present) in initial {
            let now_present = self.idx.contains(quad);
            if now_present && !was_present {
                added.push(quad.clone());
            } else if was_present && !now_present {
                removed.push(quad.clone());
            }
        }

        if let StorageBackend::Persistent(store) = &self.backend {
            if let Err(e) = store.apply(&added, &removed) {
                tracing::error!(error = %e, "Commit could not be persisted, rolling back");
                self.rollback(journal);
                return Err(e);
            }
        }

        let changed: BTreeSet<(&GraphName, &Uri)> = added
            .iter()
            .chain(removed.iter())
            .map(|q| (&q.graph, &q.subject))
            .collect();
        let mut events = Vec::new();
        for ((graph, subject), was_present) in &journal.touched {
            if !changed.contains(&(graph, subject)) {
                continue;
            }
            let kind = match (*was_present, self.idx.in_graph(graph, subject)) {
                (false, true) => GraphEventKind::Created,
                (true, true) => GraphEventKind::Updated,
                (true, false) => GraphEventKind::Deleted,
                (false, false) => continue,
            };
            events.push(GraphEvent {
                graph: graph.clone(),
                subject: subject.clone(),
                kind,
            });
        }

        Ok(CommitReport {
            inserted: added.len(),
            removed: removed.len(),
            events,
        })
    }

    fn rollback(&mut self, journal: Journal) {
        for op in journal.ops.into_iter().rev() {
            match op {
                Op::Added(q) => {
                    self.idx.remove(&q);
                }
                Op::Removed(q) => {
                    self.idx.add(q);
                }
            }
        }
    }

    fn touch(&self, journal: &mut Journal, graph: &GraphName, subject: &Uri) {
        if !journal
            .touched
            .contains_key(&(graph.clone(), subject.clone()))
        {
            let present = self.idx.in_graph(graph, subject);
            journal
                .touched
                .insert((graph.clone(), subject.clone()), present);
        }
    }

    fn add_quad(&mut self, quad: Quad, journal: &mut Journal) -> bool {
        self.touch(journal, &quad.graph, &quad.subject);
        if self.idx.add(quad.clone()) {
            journal.ops.push(Op::Added(quad));
            true
        } else {
            false
        }
    }

    fn remove_quad(&mut self, quad: &Quad, journal: &mut Journal) -> bool {
        self.touch(journal, &quad.graph, &quad.subject);
        if self.idx.remove(quad) {
            journal.ops.push(Op::Removed(quad.clone()));
            true
        } else {
            false
        }
    }

    /// Validate and add one quad, enforcing unique predicates.
    fn insert_checked(&mut self, quad: Quad, journal: &mut Journal) -> Result<(), QuarryError> {
        validate_uri(&quad.subject, "subject")?;
        validate_uri(&quad.predicate, "predicate")?;
        match &quad.object {
            Term::Uri(u) => validate_uri(u, "object")?,
            Term::Literal(s) if s.len() > MAX_LITERAL_LENGTH => {
                return Err(QuarryError::InvalidResource(format!(
                    "literal for {} exceeds {} bytes",
                    quad.predicate, MAX_LITERAL_LENGTH
                )));
            }
            _ => {}
        }

        if vocab::is_unique(quad.predicate.as_str()) {
            let value = unique_key(&quad.object);
            if let Some(holders) = self.idx.unique.get(&(quad.predicate.clone(), value.clone()))
            {
                if let Some(existing) = holders.keys().find(|s| **s != quad.subject) {
                    return Err(QuarryError::ConstraintViolation {
                        predicate: quad.predicate.clone(),
                        value,
                        existing: existing.clone(),
                    });
                }
            }
        }

        self.add_quad(quad, journal);
        Ok(())
    }

    fn apply_change(&mut self, change: &Change, journal: &mut Journal) -> Result<(), QuarryError> {
        match change {
            Change::Insert { graph, triples } => {
                for triple in triples {
                    self.insert_checked(Quad::new(graph.clone(), triple.clone()), journal)?;
                }
            }
            Change::Delete { graph, subject } => {
                self.delete_in_graph(graph, subject, journal);
            }
            Change::DeleteResource { subject } => {
                self.purge(subject, journal);
            }
            Change::Update {
                graph,
                subject,
                removed,
                added,
            } => {
                for (predicate, value) in removed {
                    let targets: Vec<Term> = match value {
                        Some(v) => vec![v.clone()],
                        None => self
                            .values(graph, subject, predicate.as_str())
                            .into_iter()
                            .cloned()
                            .collect(),
                    };
                    for object in targets {
                        self.remove_quad(
                            &Quad {
                                graph: graph.clone(),
                                subject: subject.clone(),
                                predicate: predicate.clone(),
                                object,
                            },
                            journal,
                        );
                    }
                }
                for (predicate, object) in added {
                    self.insert_checked(
                        Quad {
                            graph: graph.clone(),
                            subject: subject.clone(),
                            predicate: predicate.clone(),
                            object: object.clone(),
                        },
                        journal,
                    )?;
                }
                self.purge_if_vanished(subject, journal);
            }
            Change::DropContent { file } => {
                let mut content = BTreeSet::new();
                for graph in self.graphs_of(file) {
                    for object in self.values(&graph, file, NIE_INTERPRETED_AS) {
                        if let Term::Uri(u) = object {
                            content.insert(u.clone());
                        }
                    }
                }
                for (_, subject, predicate) in self.referrers(file) {
                    if predicate.as_str() == NIE_IS_STORED_AS {
                        content.insert(subject);
                    }
                }
                for subject in content {
                    self.purge(&subject, journal);
                }
            }
            Change::SetAvailable {
                datasource,
                available,
            } => {
                let mut targets: BTreeSet<(GraphName, Uri)> = self
                    .graphs_of(datasource)
                    .into_iter()
                    .map(|g| (g, datasource.clone()))
                    .collect();
                for (graph, subject, predicate) in self.referrers(datasource) {
                    if predicate.as_str() == NIE_DATA_SOURCE {
                        targets.insert((graph, subject));
                    }
                }
                let flag = Uri::new(QUARRY_AVAILABLE);
                for (graph, subject) in targets {
                    for old in self
                        .values(&graph, &subject, QUARRY_AVAILABLE)
                        .into_iter()
                        .cloned()
                        .collect::<Vec<_>>()
                    {
                        self.remove_quad(
                            &Quad {
                                graph: graph.clone(),
                                subject: subject.clone(),
                                predicate: flag.clone(),
                                object: old,
                            },
                            journal,
                        );
                    }
                    self.add_quad(
                        Quad {
                            graph,
                            subject,
                            predicate: flag.clone(),
                            object: Term::Boolean(*available),
                        },
                        journal,
                    );
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // CASCADE
    // =========================================================================

    /// Remove a subject from every graph, together with everything that
    /// cannot outlive it. Returns the purged subjects.
    fn purge(&mut self, root: &Uri, journal: &mut Journal) -> BTreeSet<Uri> {
        let mut pending = vec![root.clone()];
        let mut purged = BTreeSet::new();

        while let Some(subject) = pending.pop() {
            if !purged.insert(subject.clone()) {
                continue;
            }
            let mut candidates = Vec::new();

            for graph in self.graphs_of(&subject) {
                for quad in self.idx.subject_quads(&graph, &subject) {
                    if let Term::Uri(target) = &quad.object {
                        match vocab::predicate_role(quad.predicate.as_str()) {
                            PredicateRole::Owning => pending.push(target.clone()),
                            PredicateRole::Reference => candidates.push(target.clone()),
                            PredicateRole::Dependent => {}
                        }
                    }
                    self.remove_quad(&quad, journal);
                }
            }

            for (graph, referrer, predicate) in self.referrers(&subject) {
                self.remove_quad(
                    &Quad {
                        graph,
                        subject: referrer.clone(),
                        predicate: predicate.clone(),
                        object: Term::Uri(subject.clone()),
                    },
                    journal,
                );
                if vocab::predicate_role(predicate.as_str()) == PredicateRole::Dependent {
                    pending.push(referrer);
                }
            }

            for candidate in candidates {
                if !purged.contains(&candidate)
                    && !self.idx.referrers.contains_key(&candidate)
                    && self.is_collectable(&candidate)
                {
                    pending.push(candidate);
                }
            }
        }

        if purged.len() > 1 {
            tracing::debug!(root = %root, cascaded = purged.len() - 1, "Cascade delete");
        }
        purged
    }

    /// Remove a subject from one graph, with what it owns and what depends
    /// on it inside that graph.
    fn delete_in_graph(&mut self, graph: &GraphName, root: &Uri, journal: &mut Journal) {
        let mut pending = vec![root.clone()];
        let mut visited = BTreeSet::new();
        let mut candidates = Vec::new();

        while let Some(subject) = pending.pop() {
            if !visited.insert(subject.clone()) {
                continue;
            }
            for quad in self.idx.subject_quads(graph, &subject) {
                if let Term::Uri(target) = &quad.object {
                    match vocab::predicate_role(quad.predicate.as_str()) {
                        PredicateRole::Owning => pending.push(target.clone()),
                        PredicateRole::Reference => candidates.push(target.clone()),
                        PredicateRole::Dependent => {}
                    }
                }
                self.remove_quad(&quad, journal);
            }
            for (ref_graph, referrer, predicate) in self.referrers(&subject) {
                if ref_graph == *graph
                    && vocab::predicate_role(predicate.as_str()) == PredicateRole::Dependent
                {
                    self.remove_quad(
                        &Quad {
                            graph: ref_graph,
                            subject: referrer.clone(),
                            predicate,
                            object: Term::Uri(subject.clone()),
                        },
                        journal,
                    );
                    pending.push(referrer);
                }
            }
        }

        for subject in &visited {
            self.purge_if_vanished(subject, journal);
        }
        for candidate in candidates {
            if !visited.contains(&candidate)
                && !self.idx.referrers.contains_key(&candidate)
                && self.is_collectable(&candidate)
            {
                self.purge(&candidate, journal);
            }
        }
    }

    /// Run the full cascade for a subject no graph holds anymore.
    fn purge_if_vanished(&mut self, subject: &Uri, journal: &mut Journal) {
        if !self.idx.locations.contains_key(subject) && self.idx.referrers.contains_key(subject) {
            self.purge(subject, journal);
        }
    }

    fn is_collectable(&self, subject: &Uri) -> bool {
        COLLECTABLE_CLASSES
            .iter()
            .any(|class| self.has_type(subject, class))
    }

    // =========================================================================
    // EXTRACTION JOURNAL
    // =========================================================================

    /// Record a path about to be handed to an extractor.
    pub fn begin_extraction(&mut self, path: &str) -> Result<(), QuarryError> {
        let mut paths = self.interrupted_extractions()?;
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
        self.write_journal(&paths)
    }

    /// Clear the record for a path whose extraction returned.
    pub fn end_extraction(&mut self, path: &str) -> Result<(), QuarryError> {
        let mut paths = self.interrupted_extractions()?;
        paths.retain(|p| p != path);
        self.write_journal(&paths)
    }

    /// Paths that were under extraction when the previous run stopped.
    pub fn interrupted_extractions(&self) -> Result<Vec<String>, QuarryError> {
        let raw = match &self.backend {
            StorageBackend::InMemory(meta) => meta.get(EXTRACTING_KEY).cloned(),
            StorageBackend::Persistent(store) => store.get_meta(EXTRACTING_KEY)?,
        };
        let Some(bytes) = raw else {
            return Ok(Vec::new());
        };
        let text =
            String::from_utf8(bytes).map_err(|e| QuarryError::SerializationError(e.to_string()))?;
        Ok(text
            .split('\n')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Forget every recorded extraction.
    pub fn clear_extractions(&mut self) -> Result<(), QuarryError> {
        self.set_meta(EXTRACTING_KEY, None)
    }

    fn write_journal(&mut self, paths: &[String]) -> Result<(), QuarryError> {
        if paths.is_empty() {
            self.set_meta(EXTRACTING_KEY, None)
        } else {
            self.set_meta(EXTRACTING_KEY, Some(paths.join("\n").as_bytes()))
        }
    }

    fn set_meta(&mut self, key: &str, value: Option<&[u8]>) -> Result<(), QuarryError> {
        match &mut self.backend {
            StorageBackend::InMemory(meta) => {
                match value {
                    Some(v) => meta.insert(key.to_string(), v.to_vec()),
                    None => meta.remove(key),
                };
                Ok(())
            }
            StorageBackend::Persistent(store) => store.set_meta(key, value),
        }
    }
}

fn validate_uri(uri: &Uri, position: &str) -> Result<(), QuarryError> {
    if uri.0.is_empty() {
        return Err(QuarryError::InvalidResource(format!("empty {}", position)));
    }
    if uri.0.len() > MAX_URI_LENGTH {
        return Err(QuarryError::InvalidResource(format!(
            "{} exceeds {} bytes",
            position, MAX_URI_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

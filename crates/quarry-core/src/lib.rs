//! # quarry-core
//!
//! The deterministic indexing engine for Quarry.
//!
//! This crate holds everything that decides *what* the indexer does, with
//! no async runtime and no network: the resource graph and its persistence,
//! the rules mapping the filesystem onto it, the task queue, the pause
//! state machine, and the extractor modules.
//!
//! ## Pieces
//!
//! - `graph`: named graphs, cascade deletion, atomic commits, queries
//! - `registry` / `tree` / `crawler`: roots, filters, walks and live changes
//! - `queue` / `state`: what runs next, and whether anything may run
//! - `extract` / `fingerprint` / `ingestor`: from file to change set
//!
//! The daemon in `apps/quarry` owns one of each and drives them from its
//! event loop.

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod crawler;
pub mod extract;
pub mod fingerprint;
pub mod graph;
pub mod ingestor;
pub mod queue;
pub mod registry;
pub mod state;
pub mod storage;
pub mod tree;
pub mod types;
pub mod vocab;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{GraphName, Quad, QuarryError, Term, Triple, Uri};

// =============================================================================
// RE-EXPORTS: Resource Graph
// =============================================================================

pub use graph::{
    Change, ChangeSet, CommitBuffer, CommitReport, FlushOutcome, GraphEvent, GraphEventKind,
    Query, ResourceGraph, Row, StorageBackend, TriplePattern,
};
pub use storage::RedbStore;

// =============================================================================
// RE-EXPORTS: Filesystem & Scheduling
// =============================================================================

pub use config::{Config, EngineConfig, IndexingConfig, IndexingDelta, Isolation, StorageConfig};
pub use crawler::{ChangeAction, CrawlEntry, CrawlResult};
pub use queue::{Priority, Task, TaskOrigin, TaskQueue, TaskRequest};
pub use registry::{DataSource, DataSourceKind, DataSourceRegistry, RegistryAction, RemovalPolicy};
pub use state::{MinerState, PauseReason, StateController};
pub use tree::{Filters, IndexingTree};

// =============================================================================
// RE-EXPORTS: Extraction
// =============================================================================

pub use extract::{
    ExtractedMetadata, ExtractionFailure, Extractor, ModuleInfo, ModuleManager, guess_mime,
};
pub use fingerprint::{ExtractorHash, FileStamp};
pub use ingestor::FileFacts;

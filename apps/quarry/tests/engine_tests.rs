//! End-to-end engine scenarios over real temporary directories.
//!
//! Monitors are off: changes are fed with `report_change`, the way the
//! filesystem monitor would report them.

#![allow(clippy::unwrap_used, clippy::panic)]

use quarry::engine::{self, EngineHandle, Signal};
use quarry::gateway::Gateway;
use quarry_core::extract::TextExtractor;
use quarry_core::fingerprint::is_known_failed;
use quarry_core::ingestor::content_urn;
use quarry_core::vocab::{
    GRAPH_AUDIO, GRAPH_DOCUMENTS, GRAPH_FILESYSTEM, NIE_TITLE, NIE_URL, QUARRY_AVAILABLE,
};
use quarry_core::{
    Change, ChangeSet, Config, ExtractedMetadata, ExtractionFailure, Extractor, GraphName,
    Isolation, MinerState, ModuleInfo, ModuleManager, PauseReason, RemovalPolicy, Term, Triple,
    Uri,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// =============================================================================
// HARNESS
// =============================================================================

/// Text extraction that counts its calls. `crash.txt` panics, `slow.txt`
/// outlives the extraction timeout, `growing.txt` is appended to on every
/// run, and `swap.txt` turns its directory into a plain file once a
/// `swap.now` sits next to it.
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl Extractor for Counting {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "counting",
            version: 1,
            graph: GRAPH_DOCUMENTS,
            mime_types: &["text/plain"],
        }
    }

    fn extract(&self, path: &Path, mime: &str) -> Result<ExtractedMetadata, ExtractionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match path.file_name().and_then(|n| n.to_str()) {
            Some("crash.txt") => panic!("extractor blew up"),
            Some("slow.txt") => std::thread::sleep(Duration::from_secs(2)),
            Some("growing.txt") => {
                let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
                file.write_all(b"+")?;
            }
            Some("swap.txt") if path.with_file_name("swap.now").exists() => {
                let dir = path.parent().unwrap();
                std::fs::remove_dir_all(dir)?;
                std::fs::write(dir, "no longer a directory")?;
            }
            _ => {}
        }
        TextExtractor.extract(path, mime)
    }
}

struct Fixture {
    tmp: tempfile::TempDir,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        Self {
            tmp,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn root(&self) -> PathBuf {
        self.tmp.path().join("home")
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.indexing.recursive_directories = vec![self.root()];
        config.indexing.single_directories = Vec::new();
        config.indexing.enable_monitors = false;
        config.engine.isolation = Isolation::Thread;
        config.engine.commit_interval_ms = 10;
        config.engine.extractor_timeout_secs = 1;
        config.engine.low_disk_space_limit = None;
        config.storage.database = self.tmp.path().join("db").join("index.db");
        config
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn gateway(&self, config: &Config) -> Gateway {
        let counting = Counting {
            calls: Arc::clone(&self.calls),
        };
        let modules = ModuleManager::builtin().with_module(Arc::new(counting));
        Gateway::from_config(Arc::new(modules), &config.engine)
    }

    async fn start(&self, config: Config) -> EngineHandle {
        let graph = engine::open_graph(&config.storage).unwrap();
        let gateway = self.gateway(&config);
        engine::spawn(config, gateway, graph).await.unwrap()
    }
}

async fn idle(engine: &EngineHandle) {
    tokio::time::timeout(Duration::from_secs(20), engine.wait_idle())
        .await
        .expect("engine did not go idle")
        .unwrap();
}

/// Stop the engine and release the store so it can be opened again.
async fn stop(engine: EngineHandle) {
    engine.shutdown().await.unwrap();
    drop(engine);
}

async fn known(engine: &EngineHandle, path: &Path) -> bool {
    engine
        .graph()
        .read()
        .await
        .contains_subject(&Uri::from_path(path))
}

async fn title(engine: &EngineHandle, path: &Path) -> Option<String> {
    let graph = engine.graph().read().await;
    let content = content_urn(&Uri::from_path(path));
    graph
        .value(&GraphName::new(GRAPH_DOCUMENTS), &content, NIE_TITLE)
        .and_then(Term::as_literal)
        .map(String::from)
}

async fn failed(engine: &EngineHandle, path: &Path) -> bool {
    is_known_failed(&*engine.graph().read().await, &Uri::from_path(path))
}

async fn available(engine: &EngineHandle, path: &Path) -> Option<bool> {
    engine
        .graph()
        .read()
        .await
        .value(
            &GraphName::new(GRAPH_FILESYSTEM),
            &Uri::from_path(path),
            QUARRY_AVAILABLE,
        )
        .and_then(Term::as_bool)
}

// =============================================================================
// CRAWLING
// =============================================================================

#[tokio::test]
async fn initial_crawl_honours_filters() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "hello world\n");
    let b = fx.write("sub/b.txt", "second file\n");
    let tmp = fx.write("scratch.tmp", "ignored by name");
    let hidden = fx.write(".secret.txt", "hidden");
    let marked = fx.write("private/c.txt", "behind a marker");
    fx.write("private/.nomedia", "");
    let modules = fx.write("node_modules/d.txt", "ignored directory");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    assert!(known(&engine, &fx.root()).await);
    assert!(known(&engine, &fx.path("sub")).await);
    assert!(known(&engine, &a).await);
    assert!(known(&engine, &b).await);
    for skipped in [&tmp, &hidden, &marked, &modules] {
        assert!(!known(&engine, skipped).await, "{} indexed", skipped.display());
    }
    assert!(!known(&engine, &fx.path("private")).await);

    assert_eq!(fx.calls(), 2);
    assert_eq!(title(&engine, &a).await.as_deref(), Some("hello world"));
    assert_eq!(engine.status().state, MinerState::Idle);
    stop(engine).await;
}

#[tokio::test]
async fn restart_skips_unchanged_files() {
    let fx = Fixture::new();
    fx.write("a.txt", "one");
    fx.write("sub/b.txt", "two");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert_eq!(fx.calls(), 2);
    stop(engine).await;

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert_eq!(fx.calls(), 2);
    assert!(known(&engine, &fx.path("sub/b.txt")).await);
    stop(engine).await;
}

#[tokio::test]
async fn restart_picks_up_offline_changes() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "before");
    let gone = fx.write("gone.txt", "soon deleted");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    stop(engine).await;

    std::fs::write(&a, "after the restart\nwith more text").unwrap();
    std::fs::remove_file(&gone).unwrap();
    let added = fx.write("new.txt", "added offline");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert_eq!(title(&engine, &a).await.as_deref(), Some("after the restart"));
    assert!(!known(&engine, &gone).await);
    assert!(known(&engine, &added).await);
    stop(engine).await;
}

#[tokio::test]
async fn stale_stub_is_replaced() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "content");
    let config = fx.config();

    let mut graph = engine::open_graph(&config.storage).unwrap();
    let url = Uri::from_path(&a);
    graph
        .insert(
            GraphName::new(GRAPH_FILESYSTEM),
            vec![Triple::new(
                Uri::new("urn:stale"),
                NIE_URL,
                Term::literal(url.as_str()),
            )],
        )
        .unwrap();
    let engine = engine::spawn(config.clone(), fx.gateway(&config), graph)
        .await
        .unwrap();
    idle(&engine).await;

    let graph = engine.graph().read().await;
    assert!(!graph.contains_subject(&Uri::new("urn:stale")));
    assert_eq!(graph.subject_with(NIE_URL, url.as_str()), Some(&url));
    drop(graph);
    stop(engine).await;
}

// =============================================================================
// LIVE CHANGES
// =============================================================================

#[tokio::test]
async fn reported_changes_are_applied() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "first title");
    let b = fx.write("sub/b.txt", "nested");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    std::fs::write(&a, "second title\nlonger than before").unwrap();
    engine.report_change(&a).unwrap();
    idle(&engine).await;
    assert_eq!(title(&engine, &a).await.as_deref(), Some("second title"));
    assert_eq!(fx.calls(), 3);

    let c = fx.write("fresh/c.txt", "in a new directory");
    engine.report_change(fx.path("fresh")).unwrap();
    idle(&engine).await;
    assert!(known(&engine, &c).await);

    std::fs::remove_dir_all(fx.path("sub")).unwrap();
    engine.report_change(fx.path("sub")).unwrap();
    idle(&engine).await;
    assert!(!known(&engine, &fx.path("sub")).await);
    assert!(!known(&engine, &b).await);
    assert!(title(&engine, &b).await.is_none());
    stop(engine).await;
}

#[tokio::test]
async fn marker_file_hides_and_restores_a_directory() {
    let fx = Fixture::new();
    let b = fx.write("sub/b.txt", "nested");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(known(&engine, &b).await);

    let marker = fx.write("sub/.quarryignore", "");
    engine.report_change(&marker).unwrap();
    idle(&engine).await;
    assert!(!known(&engine, &fx.path("sub")).await);
    assert!(!known(&engine, &b).await);

    std::fs::remove_file(&marker).unwrap();
    engine.report_change(&marker).unwrap();
    idle(&engine).await;
    assert!(known(&engine, &b).await);
    stop(engine).await;
}

#[tokio::test]
async fn files_processed_is_signalled() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let mut signals = engine.subscribe();
    let a = fx.write("a.txt", "signalled");
    engine.report_change(&a).unwrap();
    idle(&engine).await;

    let mut seen = false;
    while let Ok(signal) = signals.try_recv() {
        if let Signal::FilesProcessed { path, success, .. } = signal {
            if path == a {
                assert!(success);
                seen = true;
            }
        }
    }
    assert!(seen);
    stop(engine).await;
}

// =============================================================================
// ON-DEMAND INDEXING
// =============================================================================

#[tokio::test]
async fn on_demand_index_forces_extraction() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "forced");
    fx.write("sub/b.txt", "one");
    fx.write("sub/c.txt", "two");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert_eq!(fx.calls(), 3);

    let outcome = engine.index(&a, false, None).await.unwrap();
    assert!(outcome.success);
    assert_eq!(fx.calls(), 4);

    let outcome = engine.index(fx.path("sub"), true, None).await.unwrap();
    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(fx.calls(), 6);
    stop(engine).await;
}

#[tokio::test]
async fn on_demand_index_rejects_bad_paths() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let missing = engine.index(fx.path("nope.txt"), false, None).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.message.as_deref(), Some("no such file or directory"));

    let outside = fx.tmp.path().join("elsewhere.txt");
    std::fs::write(&outside, "x").unwrap();
    let outcome = engine.index(&outside, false, None).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.message.as_deref(),
        Some("path is not within an indexed location")
    );
    assert!(!known(&engine, &outside).await);
    stop(engine).await;
}

#[tokio::test]
async fn graph_restriction_filters_files() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "documents only");
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let audio: BTreeSet<GraphName> = [GraphName::new(GRAPH_AUDIO)].into_iter().collect();
    let outcome = engine.index(&a, false, Some(audio)).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("not a requested graph"));

    let documents: BTreeSet<GraphName> = [GraphName::new(GRAPH_DOCUMENTS)].into_iter().collect();
    let outcome = engine.index(&a, false, Some(documents)).await.unwrap();
    assert!(outcome.success);
    stop(engine).await;
}

#[tokio::test]
async fn on_demand_removal_reports_removed() {
    let fx = Fixture::new();
    let ignored = fx.write("sub/b.txt", "x");
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(known(&engine, &ignored).await);

    fx.write("sub/.nomedia", "");
    let outcome = engine.index(&ignored, false, None).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.message.as_deref(), Some("removed"));
    assert!(!known(&engine, &ignored).await);
    stop(engine).await;
}

#[tokio::test]
async fn file_that_keeps_changing_is_given_up() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let growing = fx.write("growing.txt", "log");
    let outcome = engine.index(&growing, false, None).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.message.as_deref(),
        Some("file kept changing during extraction")
    );
    assert_eq!(fx.calls(), 4);
    idle(&engine).await;
    assert!(!known(&engine, &growing).await);
    stop(engine).await;
}

#[tokio::test]
async fn stat_error_after_extraction_keeps_the_resource() {
    let fx = Fixture::new();
    let swap = fx.write("sub/swap.txt", "first version");
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(known(&engine, &swap).await);

    fx.write("sub/swap.now", "");
    let outcome = engine.index(&swap, false, None).await.unwrap();
    assert!(!outcome.success);
    assert_ne!(outcome.message.as_deref(), Some("removed"));
    idle(&engine).await;
    assert!(known(&engine, &swap).await);
    stop(engine).await;
}

// =============================================================================
// EXTRACTION FAILURES
// =============================================================================

#[tokio::test]
async fn crash_is_recorded_and_not_retried() {
    let fx = Fixture::new();
    let crash = fx.write("crash.txt", "boom");
    let fine = fx.write("fine.txt", "still indexed");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(failed(&engine, &crash).await);
    assert!(!failed(&engine, &fine).await);
    assert_eq!(title(&engine, &fine).await.as_deref(), Some("still indexed"));
    stop(engine).await;

    let before = fx.calls();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert_eq!(fx.calls(), before);

    let outcome = engine.index(&crash, false, None).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("crashed"));
    stop(engine).await;
}

#[tokio::test]
async fn timeout_is_recorded() {
    let fx = Fixture::new();
    let slow = fx.write("slow.txt", "takes a while");

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(known(&engine, &slow).await);
    assert!(failed(&engine, &slow).await);
    assert!(title(&engine, &slow).await.is_none());
    stop(engine).await;
}

#[tokio::test]
async fn interrupted_extraction_is_failed_on_startup() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "was being extracted");
    let config = fx.config();

    let mut graph = engine::open_graph(&config.storage).unwrap();
    graph.begin_extraction(&a.to_string_lossy()).unwrap();
    let engine = engine::spawn(config.clone(), fx.gateway(&config), graph)
        .await
        .unwrap();
    idle(&engine).await;

    assert!(failed(&engine, &a).await);
    assert_eq!(fx.calls(), 0);
    assert!(
        engine
            .graph()
            .read()
            .await
            .interrupted_extractions()
            .unwrap()
            .is_empty()
    );
    stop(engine).await;
}

// =============================================================================
// STATE
// =============================================================================

#[tokio::test]
async fn pause_holds_work_until_resumed() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let cookie = engine.inhibit("backup", "copying files").await.unwrap();
    let a = fx.write("a.txt", "while paused");
    engine.report_change(&a).unwrap();

    let mut status = engine.watch_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.queued == 1 && s.reasons.contains(&PauseReason::Inhibited)),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(matches!(engine.status().state, MinerState::Paused { .. }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!known(&engine, &a).await);

    assert!(!engine.uninhibit(cookie + 100).await.unwrap());
    assert!(engine.uninhibit(cookie).await.unwrap());
    idle(&engine).await;
    assert!(known(&engine, &a).await);
    stop(engine).await;
}

#[tokio::test]
async fn low_disk_space_pauses_until_the_limit_is_lifted() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "no room");
    let mut config = fx.config();
    // Free space is always at or below 100% of the volume.
    config.engine.low_disk_space_limit = Some(100);
    let engine = fx.start(config).await;

    let mut status = engine.watch_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.reasons.contains(&PauseReason::LowDiskSpace)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        engine.status().state,
        MinerState::Paused {
            reason: PauseReason::LowDiskSpace
        }
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.calls(), 0);
    assert!(!known(&engine, &a).await);

    engine.reconfigure(fx.config()).await.unwrap();
    idle(&engine).await;
    assert!(engine.status().reasons.is_empty());
    assert!(known(&engine, &a).await);
    assert_eq!(fx.calls(), 1);
    stop(engine).await;
}

#[tokio::test]
async fn stop_keeps_queued_work() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    engine.stop().unwrap();
    let a = fx.write("a.txt", "queued while stopped");
    engine.report_change(&a).unwrap();

    let mut status = engine.watch_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| !s.running && s.queued == 1),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!known(&engine, &a).await);

    engine.start().unwrap();
    idle(&engine).await;
    assert!(known(&engine, &a).await);
    stop(engine).await;
}

#[tokio::test]
async fn direct_updates_are_committed() {
    let fx = Fixture::new();
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    let tag = Uri::new("urn:tag:holiday");
    let changes = ChangeSet::new().with(Change::Insert {
        graph: GraphName::new("quarry:Tags"),
        triples: vec![Triple::new(tag.clone(), NIE_TITLE, Term::literal("Holiday"))],
    });
    let report = engine.update(changes).await.unwrap();
    assert!(report.inserted > 0);
    assert!(engine.graph().read().await.contains_subject(&tag));
    stop(engine).await;
}

// =============================================================================
// DATA SOURCES
// =============================================================================

#[tokio::test]
async fn dropping_a_root_deletes_its_resources() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", "kept");
    let other = fx.tmp.path().join("other");
    std::fs::create_dir_all(&other).unwrap();
    let b = other.join("b.txt");
    std::fs::write(&b, "dropped").unwrap();

    let mut config = fx.config();
    config.indexing.recursive_directories.push(other.clone());
    let engine = fx.start(config).await;
    idle(&engine).await;
    assert!(known(&engine, &b).await);
    let before = fx.calls();

    engine.reconfigure(fx.config()).await.unwrap();
    idle(&engine).await;
    assert_eq!(fx.calls(), before);
    assert!(known(&engine, &a).await);
    assert!(!known(&engine, &other).await);
    assert!(!known(&engine, &b).await);
    stop(engine).await;
}

#[tokio::test]
async fn root_removed_offline_is_dropped_on_startup() {
    let fx = Fixture::new();
    let other = fx.tmp.path().join("other");
    std::fs::create_dir_all(&other).unwrap();
    let b = other.join("b.txt");
    std::fs::write(&b, "dropped").unwrap();

    let mut config = fx.config();
    config.indexing.recursive_directories.push(other.clone());
    let engine = fx.start(config).await;
    idle(&engine).await;
    assert!(known(&engine, &b).await);
    stop(engine).await;

    let engine = fx.start(fx.config()).await;
    idle(&engine).await;
    assert!(!known(&engine, &b).await);
    stop(engine).await;
}

fn volume(fx: &Fixture) -> (PathBuf, PathBuf) {
    let vol = fx.tmp.path().join("vol");
    std::fs::create_dir_all(&vol).unwrap();
    let notes = vol.join("notes.txt");
    std::fs::write(&notes, "on the stick").unwrap();
    (vol, notes)
}

#[tokio::test]
async fn preserved_volume_survives_unmount() {
    let fx = Fixture::new();
    let (vol, notes) = volume(&fx);
    let engine = fx.start(fx.config()).await;
    idle(&engine).await;

    assert!(engine.mount(&vol).await.unwrap());
    idle(&engine).await;
    assert!(known(&engine, &notes).await);
    let calls = fx.calls();

    engine.unmount(&vol).unwrap();
    idle(&engine).await;
    assert!(known(&engine, &notes).await);
    assert_eq!(available(&engine, &notes).await, Some(false));

    let outcome = engine.index(&notes, false, None).await.unwrap();
    assert_eq!(outcome.message.as_deref(), Some("data source is unavailable"));

    assert!(engine.mount(&vol).await.unwrap());
    idle(&engine).await;
    assert_eq!(available(&engine, &notes).await, Some(true));
    assert_eq!(fx.calls(), calls);
    stop(engine).await;
}

#[tokio::test]
async fn busy_volume_defers_deletion() {
    let fx = Fixture::new();
    let (vol, notes) = volume(&fx);
    let mut config = fx.config();
    config.indexing.removable_policy = RemovalPolicy::DeleteOnRemove;
    let engine = fx.start(config).await;
    idle(&engine).await;

    assert!(engine.mount(&vol).await.unwrap());
    idle(&engine).await;
    assert!(known(&engine, &notes).await);

    assert!(engine.set_busy(&vol, true).await.unwrap());
    engine.unmount(&vol).unwrap();
    idle(&engine).await;
    assert!(known(&engine, &notes).await);

    assert!(engine.set_busy(&vol, false).await.unwrap());
    idle(&engine).await;
    assert!(!known(&engine, &notes).await);
    assert!(!known(&engine, &vol).await);

    assert!(!engine.set_busy(&vol, true).await.unwrap());
    stop(engine).await;
}

#[tokio::test]
async fn mounts_are_ignored_when_volumes_are_disabled() {
    let fx = Fixture::new();
    let (vol, notes) = volume(&fx);
    let mut config = fx.config();
    config.indexing.index_removable_devices = false;
    let engine = fx.start(config).await;
    idle(&engine).await;

    assert!(!engine.mount(&vol).await.unwrap());
    idle(&engine).await;
    assert!(!known(&engine, &notes).await);
    stop(engine).await;
}

// =============================================================================
// PROCESS ISOLATION
// =============================================================================

#[tokio::test]
async fn worker_process_extracts() {
    let fx = Fixture::new();
    let a = fx.write("a.md", "# From a worker\n\nbody");
    let mut config = fx.config();
    config.engine.isolation = Isolation::Process;
    config.engine.extractor_timeout_secs = 30;

    let graph = engine::open_graph(&config.storage).unwrap();
    let gateway = Gateway::from_config(Arc::new(ModuleManager::builtin()), &config.engine)
        .with_worker(env!("CARGO_BIN_EXE_quarry"));
    let engine = engine::spawn(config, gateway, graph).await.unwrap();
    idle(&engine).await;

    assert!(!failed(&engine, &a).await);
    assert_eq!(title(&engine, &a).await.as_deref(), Some("From a worker"));
    stop(engine).await;
}

//! # Resource Graph Scenarios
//!
//! End-to-end checks of the graph as the engine uses it: change sets built
//! by the ingestor, committed directly or through the commit buffer.
//!
//! ## Tiers
//! - T0: Commit atomicity
//! - T1: Cascade deletion
//! - T2: Batched commits and self-healing
//! - T3: Data source lifecycle
//! - T4: Persistence
//! - T5: Queries

use quarry_core::extract::AuxResource;
use quarry_core::ingestor::{self, FileFacts};
use quarry_core::vocab::*;
use quarry_core::{
    Change, ChangeSet, CommitBuffer, DataSource, DataSourceKind, DataSourceRegistry,
    ExtractedMetadata, Extractor, ExtractorHash, FileStamp, GraphName, Query, QuarryError,
    RemovalPolicy, ResourceGraph, Term, Triple, Uri,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const STAMP: FileStamp = FileStamp {
    mtime_secs: 1_700_000_000,
    mtime_nanos: 0,
    size: 10,
};

fn source(root: &str, policy: RemovalPolicy) -> DataSource {
    let mut registry = DataSourceRegistry::new();
    registry.register(root, DataSourceKind::RecursiveDirectory, policy);
    registry
        .get(&PathBuf::from(root))
        .cloned()
        .expect("registered")
}

fn facts(path: &str, mime: &str, datasource: &Uri) -> FileFacts {
    FileFacts {
        path: PathBuf::from(path),
        is_dir: false,
        stamp: STAMP,
        mime: mime.to_string(),
        datasource: datasource.clone(),
        is_root: false,
    }
}

fn text_file(graph: &mut ResourceGraph, path: &str, datasource: &Uri) -> Uri {
    let facts = facts(path, "text/plain", datasource);
    let module = quarry_core::extract::TextExtractor.info();
    let hash = ExtractorHash::compute(STAMP, Some((module.name, module.version)));
    let mut metadata = ExtractedMetadata::of_types(&[NFO_PLAIN_TEXT_DOCUMENT, NFO_DOCUMENT]);
    metadata.set(NIE_TITLE, Term::literal("notes"));
    graph
        .commit(&ingestor::extracted(&facts, &module, &hash, &metadata))
        .expect("commit text file");
    facts.uri()
}

fn song(graph: &mut ResourceGraph, path: &str, artist: &str, datasource: &Uri) -> Uri {
    let facts = facts(path, "audio/mpeg", datasource);
    let module = quarry_core::extract::AudioExtractor.info();
    let hash = ExtractorHash::compute(STAMP, Some((module.name, module.version)));
    let artist_urn = Uri::new(format!("urn:artist:{}", artist));
    let mut metadata = ExtractedMetadata::of_types(&[NMM_MUSIC_PIECE]);
    metadata.set(NMM_PERFORMER, Term::Uri(artist_urn.clone()));
    metadata.resources.push(AuxResource {
        subject: artist_urn,
        types: vec![NMM_ARTIST.to_string()],
        properties: vec![(NMM_ARTIST_NAME.to_string(), Term::literal(artist))],
    });
    graph
        .commit(&ingestor::extracted(&facts, &module, &hash, &metadata))
        .expect("commit song");
    facts.uri()
}

// =============================================================================
// TIER T0: COMMIT ATOMICITY
// =============================================================================

mod t0_atomicity {
    use super::*;

    /// T0.1: A change set failing halfway leaves nothing behind.
    #[test]
    fn failed_commit_is_invisible() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        text_file(&mut graph, "/data/a.txt", &ds.urn);
        let before = graph.quad_count();

        let changes = ChangeSet::new()
            .with(Change::Insert {
                graph: filesystem_graph(),
                triples: vec![Triple::new(
                    Uri::new("urn:new"),
                    NFO_FILE_NAME,
                    Term::literal("new"),
                )],
            })
            .with(Change::Insert {
                graph: filesystem_graph(),
                triples: vec![Triple::new(
                    Uri::new("urn:intruder"),
                    NIE_URL,
                    Term::literal("file:///data/a.txt"),
                )],
            });

        let result = graph.commit(&changes);
        assert!(matches!(
            result,
            Err(QuarryError::ConstraintViolation { .. })
        ));
        assert_eq!(graph.quad_count(), before);
        assert!(!graph.contains_subject(&Uri::new("urn:new")));
    }

    /// T0.2: Re-ingesting an unchanged file changes nothing.
    #[test]
    fn reingest_is_idempotent() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        text_file(&mut graph, "/data/a.txt", &ds.urn);
        let before = graph.quad_count();

        text_file(&mut graph, "/data/a.txt", &ds.urn);
        assert_eq!(graph.quad_count(), before);
    }
}

// =============================================================================
// TIER T1: CASCADE DELETION
// =============================================================================

mod t1_cascade {
    use super::*;

    /// T1.1: A music piece placed on a text file goes with the file.
    #[test]
    fn content_in_foreign_graph_goes_with_file() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        let file = text_file(&mut graph, "/data/a.txt", &ds.urn);

        let piece = Uri::new("urn:piece:planted");
        graph
            .insert(
                GraphName::new(GRAPH_AUDIO),
                vec![
                    Triple::new(piece.clone(), RDF_TYPE, Term::uri(NMM_MUSIC_PIECE)),
                    Triple::new(piece.clone(), NIE_IS_STORED_AS, Term::Uri(file.clone())),
                ],
            )
            .expect("plant");

        graph
            .commit(&ingestor::removed(&PathBuf::from("/data/a.txt")))
            .expect("remove");

        assert!(!graph.contains_subject(&file));
        assert!(!graph.contains_subject(&piece));
        assert!(!graph.contains_subject(&ingestor::content_urn(&file)));
    }

    /// T1.2: Deleting a folder removes everything contained in it.
    #[test]
    fn folder_takes_children() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        let a = text_file(&mut graph, "/data/docs/a.txt", &ds.urn);
        let b = text_file(&mut graph, "/data/docs/b.txt", &ds.urn);
        let other = text_file(&mut graph, "/data/other.txt", &ds.urn);

        graph
            .commit(&ingestor::removed(&PathBuf::from("/data/docs")))
            .expect("remove folder");

        assert!(!graph.contains_subject(&a));
        assert!(!graph.contains_subject(&b));
        assert!(graph.contains_subject(&other));
    }

    /// T1.3: An artist is collected with its last song, not before.
    #[test]
    fn artist_outlives_all_but_last_song() {
        let ds = source("/music", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        song(&mut graph, "/music/one.mp3", "Nina", &ds.urn);
        song(&mut graph, "/music/two.mp3", "Nina", &ds.urn);
        let artist = Uri::new("urn:artist:Nina");

        graph
            .commit(&ingestor::removed(&PathBuf::from("/music/one.mp3")))
            .expect("remove one");
        assert!(graph.contains_subject(&artist));

        graph
            .commit(&ingestor::removed(&PathBuf::from("/music/two.mp3")))
            .expect("remove two");
        assert!(!graph.contains_subject(&artist));
        assert_eq!(graph.subject_count(&GraphName::new(GRAPH_AUDIO)), 0);
    }

    /// T1.4: Rewriting a file with a different module drops the old content.
    #[test]
    fn module_switch_drops_old_graph() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        let file = song(&mut graph, "/data/track", "Nina", &ds.urn);
        assert!(graph.contains_in(&GraphName::new(GRAPH_AUDIO), &file));

        text_file(&mut graph, "/data/track", &ds.urn);

        assert!(!graph.contains_in(&GraphName::new(GRAPH_AUDIO), &file));
        assert!(graph.contains_in(&GraphName::new(GRAPH_DOCUMENTS), &file));
        assert!(graph.has_type(&ingestor::content_urn(&file), NFO_DOCUMENT));
        assert!(!graph.contains_subject(&Uri::new("urn:artist:Nina")));
    }
}

// =============================================================================
// TIER T2: BATCHED COMMITS
// =============================================================================

mod t2_batches {
    use super::*;

    /// T2.1: A stale holder of a file's URL is replaced in the same batch,
    /// and a broken neighbour does not stop the others.
    #[test]
    fn stale_stub_is_healed() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        let stub = Uri::new("urn:stub:1");
        graph
            .insert(
                filesystem_graph(),
                vec![Triple::new(
                    stub.clone(),
                    NIE_URL,
                    Term::literal("file:///data/a.txt"),
                )],
            )
            .expect("stub");

        let module = quarry_core::extract::TextExtractor.info();
        let hash = ExtractorHash::compute(STAMP, Some((module.name, module.version)));
        let a = facts("/data/a.txt", "text/plain", &ds.urn);
        let b = facts("/data/b.txt", "text/plain", &ds.urn);
        let broken = ChangeSet::new().with(Change::Insert {
            graph: filesystem_graph(),
            triples: vec![Triple::new(Uri::new(""), NIE_TITLE, Term::literal("x"))],
        });

        let mut buffer = CommitBuffer::new(Duration::from_secs(1), 10);
        let now = Instant::now();
        buffer.push(ingestor::shallow_text(&a, &module, &hash), "a", now);
        buffer.push(broken, "broken", now);
        buffer.push(ingestor::shallow_text(&b, &module, &hash), "b", now);
        let outcome = buffer.flush(&mut graph);

        let results: Vec<(&str, bool)> = outcome
            .items
            .iter()
            .map(|(tag, r)| (*tag, r.is_ok()))
            .collect();
        assert_eq!(results, vec![("a", true), ("broken", false), ("b", true)]);
        assert_eq!(outcome.healed, vec![stub.clone()]);
        assert!(!graph.contains_subject(&stub));
        assert_eq!(
            graph.subject_with(NIE_URL, "file:///data/a.txt"),
            Some(&a.uri())
        );
        assert!(buffer.is_empty());
    }

    /// T2.2: A clean batch commits as one transaction.
    #[test]
    fn clean_batch_reports_every_item() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        let hash = ExtractorHash::compute(STAMP, None);

        let mut buffer = CommitBuffer::new(Duration::from_secs(1), 2);
        let now = Instant::now();
        for (i, path) in ["/data/x.bin", "/data/y.bin"].iter().enumerate() {
            let f = facts(path, "application/octet-stream", &ds.urn);
            buffer.push(ingestor::metadata_only(&f, &hash), i, now);
        }
        assert!(buffer.is_due(now));

        let outcome = buffer.flush(&mut graph);
        assert!(outcome.items.iter().all(|(_, r)| r.is_ok()));
        assert!(outcome.healed.is_empty());
        assert_eq!(graph.subject_count(&filesystem_graph()), 2);
    }
}

// =============================================================================
// TIER T3: DATA SOURCES
// =============================================================================

mod t3_datasources {
    use super::*;

    /// T3.1: Unmounting a preserved source keeps its files, flagged.
    #[test]
    fn preserved_source_goes_unavailable() {
        let ds = source("/media/usb", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        graph.commit(&ingestor::datasource(&ds)).expect("source");
        let file = text_file(&mut graph, "/media/usb/a.txt", &ds.urn);

        graph
            .commit(&ingestor::availability(&ds.urn, false))
            .expect("unavailable");

        let fs = filesystem_graph();
        assert!(graph.contains_subject(&file));
        assert_eq!(
            graph.value(&fs, &file, QUARRY_AVAILABLE),
            Some(&Term::Boolean(false))
        );
        assert_eq!(
            graph.value(&fs, &ds.urn, QUARRY_AVAILABLE),
            Some(&Term::Boolean(false))
        );

        graph
            .commit(&ingestor::availability(&ds.urn, true))
            .expect("available");
        assert_eq!(
            graph.value(&fs, &file, QUARRY_AVAILABLE),
            Some(&Term::Boolean(true))
        );
    }

    /// T3.2: Dropping a source removes every resource discovered under it.
    #[test]
    fn dropped_source_takes_everything() {
        let ds = source("/media/usb", RemovalPolicy::DeleteOnRemove);
        let keep = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        graph.commit(&ingestor::datasource(&ds)).expect("source");
        graph.commit(&ingestor::datasource(&keep)).expect("source");
        text_file(&mut graph, "/media/usb/a.txt", &ds.urn);
        song(&mut graph, "/media/usb/b.mp3", "Nina", &ds.urn);
        let kept = text_file(&mut graph, "/data/c.txt", &keep.urn);

        graph
            .commit(&ingestor::drop_datasource(&ds.urn))
            .expect("drop");

        assert!(!graph.contains_subject(&ds.urn));
        assert_eq!(graph.subject_count(&GraphName::new(GRAPH_AUDIO)), 0);
        assert!(graph.contains_subject(&kept));
        let stored = DataSourceRegistry::stored(&graph);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].urn, keep.urn);
    }
}

// =============================================================================
// TIER T4: PERSISTENCE
// =============================================================================

mod t4_persistence {
    use super::*;
    use tempfile::tempdir;

    /// T4.1: Quads, typed values and the extraction journal survive reopen.
    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);

        let (quads, hash) = {
            let mut graph = ResourceGraph::open(&path).expect("open");
            assert!(graph.is_persistent());
            let file = text_file(&mut graph, "/data/a.txt", &ds.urn);
            graph.begin_extraction("/data/b.txt").expect("journal");
            (graph.quad_count(), ExtractorHash::stored(&graph, &file))
        };

        let graph = ResourceGraph::open(&path).expect("reopen");
        let file = Uri::new("file:///data/a.txt");
        assert_eq!(graph.quad_count(), quads);
        assert!(hash.is_some());
        assert_eq!(ExtractorHash::stored(&graph, &file), hash);
        assert_eq!(
            graph.value(&filesystem_graph(), &file, NFO_FILE_SIZE),
            Some(&Term::Integer(10))
        );
        assert_eq!(
            graph.interrupted_extractions().expect("journal"),
            vec!["/data/b.txt".to_string()]
        );
    }

    /// T4.2: Deletions are persisted too.
    #[test]
    fn deletions_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);

        {
            let mut graph = ResourceGraph::open(&path).expect("open");
            text_file(&mut graph, "/data/a.txt", &ds.urn);
            graph
                .commit(&ingestor::removed(&PathBuf::from("/data/a.txt")))
                .expect("remove");
            graph.begin_extraction("/data/a.txt").expect("journal");
            graph.end_extraction("/data/a.txt").expect("journal");
        }

        let graph = ResourceGraph::open(&path).expect("reopen");
        assert_eq!(graph.quad_count(), 0);
        assert!(graph.interrupted_extractions().expect("journal").is_empty());
    }

    fn quarantined(path: &std::path::Path) -> PathBuf {
        let mut moved = path.as_os_str().to_owned();
        moved.push(".corrupt");
        PathBuf::from(moved)
    }

    /// T4.3: A file that is not a database is moved aside and replaced.
    #[test]
    fn foreign_file_is_rebuilt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        std::fs::write(&path, vec![0xAB; 8192]).expect("write");

        assert!(matches!(
            ResourceGraph::open_or_rebuild(&path, false),
            Err(QuarryError::Corrupted(_))
        ));
        assert!(!quarantined(&path).exists());

        let (graph, rebuilt) = ResourceGraph::open_or_rebuild(&path, true).expect("rebuild");
        assert!(rebuilt);
        assert!(graph.is_persistent());
        assert_eq!(graph.quad_count(), 0);
        assert_eq!(
            std::fs::read(quarantined(&path)).expect("moved file"),
            vec![0xAB; 8192]
        );
    }

    /// T4.4: Damaged pages in a real store lead to a rebuild, not a crash.
    #[test]
    fn damaged_store_is_rebuilt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        {
            let mut graph = ResourceGraph::open(&path).expect("open");
            text_file(&mut graph, "/data/a.txt", &ds.urn);
            text_file(&mut graph, "/data/b.txt", &ds.urn);
        }

        let mut bytes = std::fs::read(&path).expect("read");
        let end = bytes.len().min(4608);
        for byte in &mut bytes[512..end] {
            *byte ^= 0xFF;
        }
        std::fs::write(&path, &bytes).expect("write");

        let (graph, rebuilt) = ResourceGraph::open_or_rebuild(&path, true).expect("rebuild");
        assert!(rebuilt);
        assert_eq!(graph.quad_count(), 0);
        assert!(quarantined(&path).exists());

        drop(graph);
        let (_, rebuilt) = ResourceGraph::open_or_rebuild(&path, true).expect("reopen");
        assert!(!rebuilt);
    }
}

// =============================================================================
// TIER T5: QUERIES
// =============================================================================

mod t5_queries {
    use super::*;

    /// T5.1: Joins across the filesystem and content graphs.
    #[test]
    fn join_file_and_content() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        text_file(&mut graph, "/data/a.txt", &ds.urn);
        song(&mut graph, "/data/b.mp3", "Nina", &ds.urn);

        let query = Query::parse(
            "?c a nmm:MusicPiece\n\
             ?c nie:isStoredAs ?f\n\
             ?f nfo:fileName ?name",
        )
        .expect("parse")
        .select(&["name"]);
        let rows = graph.query(&query).expect("query");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Term::literal("b.mp3")));
    }

    /// T5.2: Ask follows deletions.
    #[test]
    fn ask_tracks_deletion() {
        let ds = source("/data", RemovalPolicy::PreserveOnRemove);
        let mut graph = ResourceGraph::new();
        text_file(&mut graph, "/data/a.txt", &ds.urn);
        let query = Query::parse("?c nie:isStoredAs <file:///data/a.txt>").expect("parse");

        assert!(graph.ask(&query).expect("ask"));
        graph
            .commit(&ingestor::removed(&PathBuf::from("/data/a.txt")))
            .expect("remove");
        assert!(!graph.ask(&query).expect("ask"));
    }
}

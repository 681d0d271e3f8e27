//! # Ingestor
//!
//! Builds the change sets that record what the engine learned about a path.
//! Each function returns one `ChangeSet`, which the commit buffer applies
//! atomically: a file's metadata is replaced as a unit or not at all.
//!
//! ## Layout in the graph
//!
//! ```text
//! quarry:FileSystem   <file://p>  a nfo:FileDataObject ; nie:url "file://p" ;
//!                                 nfo:fileName, nfo:fileSize, nie:mimeType ... ;
//!                                 nfo:belongsToContainer <file://parent> ;
//!                                 nie:dataSource <urn:quarry:datasource:..> ;
//!                                 quarry:extractorHash "..." ; quarry:available true
//! <module graph>      <file://p>  nie:url "file://p" ; nie:interpretedAs <urn:quarry:content:..>
//!                     <urn:quarry:content:..>  a <class> ; nie:isStoredAs <file://p> ; ...
//! ```
//!
//! Rewriting a file first deletes its copy from every other content graph,
//! so content left behind by a different module (or planted out of band) is
//! never kept next to the fresh one.

use crate::extract::{ExtractedMetadata, ModuleInfo, minted_urn};
use crate::fingerprint::{ExtractorHash, FileStamp};
use crate::graph::{Change, ChangeSet, ResourceGraph};
use crate::registry::DataSource;
use crate::types::{GraphName, Term, Triple, Uri};
use crate::vocab::{
    CONTENT_GRAPHS, NFO_BELONGS_TO_CONTAINER, NFO_DOCUMENT, NFO_FILE_DATA_OBJECT,
    NFO_FILE_LAST_MODIFIED, NFO_FILE_NAME, NFO_FILE_SIZE, NFO_FOLDER, NFO_PLAIN_TEXT_DOCUMENT,
    NIE_DATA_SOURCE, NIE_INTERPRETED_AS, NIE_IS_STORED_AS, NIE_MIME_TYPE, NIE_URL, QUARRY_AVAILABLE,
    QUARRY_EXTRACTION_FAILED, QUARRY_EXTRACTOR_HASH, QUARRY_REMOVAL_POLICY, QUARRY_ROOT, RDF_TYPE,
    filesystem_graph,
};
use std::fs::Metadata;
use std::path::{Path, PathBuf};

/// FileObject properties rewritten on every update.
const FILE_PROPERTIES: [&str; 10] = [
    RDF_TYPE,
    NFO_FILE_NAME,
    NFO_FILE_SIZE,
    NFO_FILE_LAST_MODIFIED,
    NIE_MIME_TYPE,
    NFO_BELONGS_TO_CONTAINER,
    NIE_DATA_SOURCE,
    QUARRY_EXTRACTOR_HASH,
    QUARRY_EXTRACTION_FAILED,
    QUARRY_AVAILABLE,
];

// =============================================================================
// FILE FACTS
// =============================================================================

/// What the engine observed about a path on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFacts {
    pub path: PathBuf,
    pub is_dir: bool,
    pub stamp: FileStamp,
    pub mime: String,
    pub datasource: Uri,
    /// The path is the root of its data source.
    pub is_root: bool,
}

impl FileFacts {
    #[must_use]
    pub fn from_metadata(
        path: &Path,
        meta: &Metadata,
        mime: String,
        datasource: Uri,
        is_root: bool,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            is_dir: meta.is_dir(),
            stamp: FileStamp::from_metadata(meta),
            mime,
            datasource,
            is_root,
        }
    }

    #[must_use]
    pub fn uri(&self) -> Uri {
        Uri::from_path(&self.path)
    }
}

/// URN of the content resource interpreted from a file.
#[must_use]
pub fn content_urn(file: &Uri) -> Uri {
    minted_urn("content", &[file.as_str()])
}

fn file_object(facts: &FileFacts, hash: &ExtractorHash, failed: bool) -> Change {
    let file = facts.uri();
    let name = facts
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut added = vec![
        (Uri::new(RDF_TYPE), Term::uri(NFO_FILE_DATA_OBJECT)),
        (Uri::new(NIE_URL), Term::literal(file.as_str())),
        (Uri::new(NFO_FILE_NAME), Term::literal(name)),
        (Uri::new(NFO_FILE_SIZE), Term::Integer(facts.stamp.size as i64)),
        (
            Uri::new(NFO_FILE_LAST_MODIFIED),
            Term::Integer(facts.stamp.mtime_secs),
        ),
        (Uri::new(NIE_MIME_TYPE), Term::literal(facts.mime.as_str())),
        (Uri::new(NIE_DATA_SOURCE), Term::Uri(facts.datasource.clone())),
        (Uri::new(QUARRY_EXTRACTOR_HASH), Term::literal(hash.0.as_str())),
        (Uri::new(QUARRY_EXTRACTION_FAILED), Term::Boolean(failed)),
        (Uri::new(QUARRY_AVAILABLE), Term::Boolean(true)),
    ];
    if facts.is_dir {
        added.push((Uri::new(RDF_TYPE), Term::uri(NFO_FOLDER)));
    }
    if !facts.is_root {
        if let Some(parent) = facts.path.parent() {
            added.push((
                Uri::new(NFO_BELONGS_TO_CONTAINER),
                Term::Uri(Uri::from_path(parent)),
            ));
        }
    }

    Change::Update {
        graph: filesystem_graph(),
        subject: file,
        removed: FILE_PROPERTIES.iter().map(|p| (Uri::new(*p), None)).collect(),
        added,
    }
}

/// Remove the file's copies and content outside `keep`.
fn clear_content(changes: &mut ChangeSet, file: &Uri, keep: Option<&GraphName>) {
    for graph in CONTENT_GRAPHS {
        let graph = GraphName::new(graph);
        if Some(&graph) != keep {
            changes.push(Change::Delete {
                graph,
                subject: file.clone(),
            });
        }
    }
    changes.push(Change::DropContent { file: file.clone() });
}

fn content_insert(
    file: &Uri,
    graph: GraphName,
    types: &[String],
    properties: &[(String, Term)],
) -> Change {
    let content = content_urn(file);
    let mut triples = vec![
        Triple::new(file.clone(), RDF_TYPE, Term::uri(NFO_FILE_DATA_OBJECT)),
        Triple::new(file.clone(), NIE_URL, Term::literal(file.as_str())),
        Triple::new(file.clone(), NIE_INTERPRETED_AS, Term::Uri(content.clone())),
        Triple::new(content.clone(), NIE_IS_STORED_AS, Term::Uri(file.clone())),
    ];
    for class in types {
        triples.push(Triple::new(content.clone(), RDF_TYPE, Term::uri(class.as_str())));
    }
    for (predicate, value) in properties {
        triples.push(Triple::new(content.clone(), predicate.as_str(), value.clone()));
    }
    Change::Insert { graph, triples }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// A successful extraction.
#[must_use]
pub fn extracted(
    facts: &FileFacts,
    module: &ModuleInfo,
    hash: &ExtractorHash,
    metadata: &ExtractedMetadata,
) -> ChangeSet {
    let file = facts.uri();
    let graph = module.graph_name();
    let mut changes = ChangeSet::new().with(file_object(facts, hash, false));
    clear_content(&mut changes, &file, Some(&graph));

    let mut insert = content_insert(&file, graph.clone(), &metadata.types, &metadata.properties);
    if let Change::Insert { triples, .. } = &mut insert {
        for resource in &metadata.resources {
            for class in &resource.types {
                triples.push(Triple::new(
                    resource.subject.clone(),
                    RDF_TYPE,
                    Term::uri(class.as_str()),
                ));
            }
            for (predicate, value) in &resource.properties {
                triples.push(Triple::new(
                    resource.subject.clone(),
                    predicate.as_str(),
                    value.clone(),
                ));
            }
        }
    }
    changes.push(insert);
    changes
}

/// A definitive extraction failure: recorded with its hash so the file is
/// only retried when it changes.
#[must_use]
pub fn failed(facts: &FileFacts, hash: &ExtractorHash) -> ChangeSet {
    let file = facts.uri();
    let mut changes = ChangeSet::new().with(file_object(facts, hash, true));
    clear_content(&mut changes, &file, None);
    changes
}

/// A file no module handles, or a directory: FileObject metadata only.
#[must_use]
pub fn metadata_only(facts: &FileFacts, hash: &ExtractorHash) -> ChangeSet {
    let file = facts.uri();
    let mut changes = ChangeSet::new().with(file_object(facts, hash, false));
    clear_content(&mut changes, &file, None);
    changes
}

/// A plain-text file outside the allowlist: typed as a document without
/// reading it.
#[must_use]
pub fn shallow_text(facts: &FileFacts, module: &ModuleInfo, hash: &ExtractorHash) -> ChangeSet {
    let file = facts.uri();
    let graph = module.graph_name();
    let mut changes = ChangeSet::new().with(file_object(facts, hash, false));
    clear_content(&mut changes, &file, Some(&graph));
    changes.push(content_insert(
        &file,
        graph,
        &[NFO_PLAIN_TEXT_DOCUMENT.to_string(), NFO_DOCUMENT.to_string()],
        &[],
    ));
    changes
}

/// A path that is gone (or no longer indexable): the FileObject and
/// everything depending on it.
#[must_use]
pub fn removed(path: &Path) -> ChangeSet {
    ChangeSet::new().with(Change::DeleteResource {
        subject: Uri::from_path(path),
    })
}

/// Copies of a file in content graphs other than `expected`, with the
/// content they hold there. `None` when there is nothing to correct.
#[must_use]
pub fn mismatched_graphs(
    graph: &ResourceGraph,
    file: &Uri,
    expected: Option<&GraphName>,
) -> Option<ChangeSet> {
    let fs = filesystem_graph();
    let mut changes = ChangeSet::new();
    for g in graph.graphs_of(file) {
        if g != fs && Some(&g) != expected {
            changes.push(Change::Delete {
                graph: g,
                subject: file.clone(),
            });
        }
    }
    for (g, subject, predicate) in graph.referrers(file) {
        if predicate.as_str() == NIE_IS_STORED_AS && g != fs && Some(&g) != expected {
            changes.push(Change::Delete { graph: g, subject });
        }
    }
    (!changes.is_empty()).then_some(changes)
}

// =============================================================================
// DATA SOURCES
// =============================================================================

/// Write (or rewrite) the resource describing a data source.
#[must_use]
pub fn datasource(source: &DataSource) -> ChangeSet {
    let removed = [RDF_TYPE, QUARRY_ROOT, QUARRY_REMOVAL_POLICY, QUARRY_AVAILABLE]
        .iter()
        .map(|p| (Uri::new(*p), None))
        .collect();
    let added = vec![
        (Uri::new(RDF_TYPE), Term::uri(source.kind.class())),
        (
            Uri::new(QUARRY_ROOT),
            Term::literal(source.root.to_string_lossy()),
        ),
        (
            Uri::new(QUARRY_REMOVAL_POLICY),
            Term::literal(source.policy.as_str()),
        ),
        (Uri::new(QUARRY_AVAILABLE), Term::Boolean(source.available)),
    ];
    ChangeSet::new().with(Change::Update {
        graph: filesystem_graph(),
        subject: source.urn.clone(),
        removed,
        added,
    })
}

/// Flag a data source and every resource discovered under it.
#[must_use]
pub fn availability(datasource: &Uri, available: bool) -> ChangeSet {
    ChangeSet::new().with(Change::SetAvailable {
        datasource: datasource.clone(),
        available,
    })
}

/// Delete a data source with everything discovered under it.
#[must_use]
pub fn drop_datasource(datasource: &Uri) -> ChangeSet {
    ChangeSet::new().with(Change::DeleteResource {
        subject: datasource.clone(),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{AudioExtractor, Extractor, TextExtractor};
    use crate::registry::{DataSourceKind, DataSourceRegistry, RemovalPolicy};
    use crate::vocab::{GRAPH_AUDIO, GRAPH_DOCUMENTS, NIE_TITLE, NMM_ARTIST};

    fn facts(path: &str, datasource: &Uri) -> FileFacts {
        FileFacts {
            path: PathBuf::from(path),
            is_dir: false,
            stamp: FileStamp {
                mtime_secs: 10,
                mtime_nanos: 0,
                size: 3,
            },
            mime: "text/plain".to_string(),
            datasource: datasource.clone(),
            is_root: false,
        }
    }

    fn text_metadata(title: &str) -> ExtractedMetadata {
        let mut meta = ExtractedMetadata::of_types(&[NFO_PLAIN_TEXT_DOCUMENT]);
        meta.set(NIE_TITLE, Term::literal(title));
        meta
    }

    #[test]
    fn extracted_writes_file_and_content() {
        let mut graph = ResourceGraph::new();
        let ds = Uri::new("urn:ds");
        let f = facts("/r/a.txt", &ds);
        let hash = ExtractorHash("h1".to_string());
        graph
            .commit(&extracted(&f, &TextExtractor.info(), &hash, &text_metadata("A")))
            .expect("commit");

        let file = f.uri();
        let content = content_urn(&file);
        assert_eq!(ExtractorHash::stored(&graph, &file), Some(hash));
        assert!(graph.contains_in(&GraphName::new(GRAPH_DOCUMENTS), &content));
        assert_eq!(
            graph.value(&GraphName::new(GRAPH_DOCUMENTS), &content, NIE_TITLE),
            Some(&Term::literal("A"))
        );
        assert_eq!(
            graph.value(&filesystem_graph(), &file, NFO_BELONGS_TO_CONTAINER),
            Some(&Term::uri("file:///r"))
        );
    }

    #[test]
    fn reextraction_replaces_content_atomically() {
        let mut graph = ResourceGraph::new();
        let ds = Uri::new("urn:ds");
        let f = facts("/r/a.txt", &ds);
        let module = TextExtractor.info();
        graph
            .commit(&extracted(&f, &module, &ExtractorHash("h1".into()), &text_metadata("Old")))
            .expect("first");
        let before = graph.quad_count();
        graph
            .commit(&extracted(&f, &module, &ExtractorHash("h2".into()), &text_metadata("New")))
            .expect("second");

        let content = content_urn(&f.uri());
        assert_eq!(
            graph.values(&GraphName::new(GRAPH_DOCUMENTS), &content, NIE_TITLE),
            vec![&Term::literal("New")]
        );
        assert_eq!(graph.quad_count(), before);
    }

    #[test]
    fn failure_records_hash_and_drops_content() {
        let mut graph = ResourceGraph::new();
        let ds = Uri::new("urn:ds");
        let f = facts("/r/a.txt", &ds);
        let hash = ExtractorHash("h1".into());
        graph
            .commit(&extracted(&f, &TextExtractor.info(), &hash, &text_metadata("A")))
            .expect("ok");
        graph
            .commit(&failed(&f, &ExtractorHash("h2".into())))
            .expect("failed");

        assert!(crate::fingerprint::is_known_failed(&graph, &f.uri()));
        assert!(!graph.contains_subject(&content_urn(&f.uri())));
    }

    #[test]
    fn mismatched_graph_copy_is_corrected() {
        let mut graph = ResourceGraph::new();
        let ds = Uri::new("urn:ds");
        let f = facts("/r/a.txt", &ds);
        let file = f.uri();
        let hash = ExtractorHash("h".into());
        graph
            .commit(&extracted(&f, &TextExtractor.info(), &hash, &text_metadata("A")))
            .expect("ok");
        graph
            .insert(
                GraphName::new(GRAPH_AUDIO),
                vec![
                    Triple::new(Uri::new("urn:wrong"), RDF_TYPE, Term::uri(NMM_ARTIST)),
                    Triple::new(Uri::new("urn:wrong"), NIE_IS_STORED_AS, Term::Uri(file.clone())),
                ],
            )
            .expect("plant");

        let documents = GraphName::new(GRAPH_DOCUMENTS);
        let fix = mismatched_graphs(&graph, &file, Some(&documents)).expect("needs fix");
        graph.commit(&fix).expect("fix");

        assert!(!graph.contains_subject(&Uri::new("urn:wrong")));
        assert!(graph.contains_in(&documents, &content_urn(&file)));
        assert!(mismatched_graphs(&graph, &file, Some(&documents)).is_none());
    }

    #[test]
    fn audio_resources_are_inserted_with_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s.mp3");
        std::fs::write(
            &path,
            crate::extract::audio::tests::mp3_bytes("Song", "Band", "Record"),
        )
        .expect("write");
        let meta = AudioExtractor.extract(&path, "audio/mpeg").expect("extract");

        let mut graph = ResourceGraph::new();
        let ds = Uri::new("urn:ds");
        let mut f = facts(path.to_str().expect("utf8"), &ds);
        f.mime = "audio/mpeg".to_string();
        graph
            .commit(&extracted(&f, &AudioExtractor.info(), &ExtractorHash("h".into()), &meta))
            .expect("commit");

        let artist = minted_urn("artist", &["Band"]);
        assert!(graph.has_type(&artist, NMM_ARTIST));

        graph.commit(&removed(&path)).expect("remove");
        assert!(!graph.contains_subject(&artist));
        assert_eq!(graph.quad_count(), 0);
    }

    #[test]
    fn datasource_cascade_and_availability() {
        let mut registry = DataSourceRegistry::new();
        registry.register("/m", DataSourceKind::RemovableVolume, RemovalPolicy::PreserveOnRemove);
        let source = registry.get(Path::new("/m")).cloned().expect("source");

        let mut graph = ResourceGraph::new();
        graph.commit(&datasource(&source)).expect("ds");
        let f = facts("/m/a.txt", &source.urn);
        graph
            .commit(&metadata_only(&f, &ExtractorHash("h".into())))
            .expect("file");
        assert_eq!(DataSourceRegistry::stored(&graph).len(), 1);

        graph
            .commit(&availability(&source.urn, false))
            .expect("flag");
        assert_eq!(
            graph.value(&filesystem_graph(), &f.uri(), QUARRY_AVAILABLE),
            Some(&Term::Boolean(false))
        );

        graph.commit(&drop_datasource(&source.urn)).expect("drop");
        assert_eq!(graph.quad_count(), 0);
    }
}

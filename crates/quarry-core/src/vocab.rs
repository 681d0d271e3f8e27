//! # Vocabulary
//!
//! The fixed set of graphs, classes and predicates the engine writes,
//! plus the structural role each predicate plays during deletion.
//!
//! The vocabulary is compiled in. Extractors may emit any predicate, but
//! only the predicates listed here carry cascade semantics.

use crate::types::GraphName;

// =============================================================================
// GRAPHS
// =============================================================================

/// Graph holding FileObjects, folders and data sources.
pub const GRAPH_FILESYSTEM: &str = "quarry:FileSystem";
/// Graph holding documents (text, office files).
pub const GRAPH_DOCUMENTS: &str = "quarry:Documents";
/// Graph holding music pieces, artists and albums.
pub const GRAPH_AUDIO: &str = "quarry:Audio";
/// Graph holding images.
pub const GRAPH_PICTURES: &str = "quarry:Pictures";
/// Graph holding videos.
pub const GRAPH_VIDEO: &str = "quarry:Video";
/// Graph holding applications and packages.
pub const GRAPH_SOFTWARE: &str = "quarry:Software";

/// Graphs extractor output may land in.
pub const CONTENT_GRAPHS: [&str; 5] = [
    GRAPH_DOCUMENTS,
    GRAPH_AUDIO,
    GRAPH_PICTURES,
    GRAPH_VIDEO,
    GRAPH_SOFTWARE,
];

/// The filesystem graph as a `GraphName`.
#[must_use]
pub fn filesystem_graph() -> GraphName {
    GraphName::new(GRAPH_FILESYSTEM)
}

/// Every content graph as a `GraphName`.
#[must_use]
pub fn content_graphs() -> Vec<GraphName> {
    CONTENT_GRAPHS.iter().map(|g| GraphName::new(*g)).collect()
}

// =============================================================================
// CLASSES
// =============================================================================

pub const NFO_FILE_DATA_OBJECT: &str = "nfo:FileDataObject";
pub const NFO_FOLDER: &str = "nfo:Folder";
pub const NFO_DOCUMENT: &str = "nfo:Document";
pub const NFO_PLAIN_TEXT_DOCUMENT: &str = "nfo:PlainTextDocument";
pub const NFO_IMAGE: &str = "nfo:Image";
pub const NMM_MUSIC_PIECE: &str = "nmm:MusicPiece";
pub const NMM_MUSIC_ALBUM: &str = "nmm:MusicAlbum";
pub const NMM_ARTIST: &str = "nmm:Artist";
pub const QUARRY_INDEXED_FOLDER: &str = "quarry:IndexedFolder";
pub const QUARRY_REMOVABLE_VOLUME: &str = "quarry:RemovableVolume";

/// Classes whose instances only live as long as something refers to them.
pub const COLLECTABLE_CLASSES: [&str; 2] = [NMM_MUSIC_ALBUM, NMM_ARTIST];

// =============================================================================
// PREDICATES
// =============================================================================

pub const RDF_TYPE: &str = "rdf:type";
pub const NIE_URL: &str = "nie:url";
pub const NIE_IS_STORED_AS: &str = "nie:isStoredAs";
pub const NIE_INTERPRETED_AS: &str = "nie:interpretedAs";
pub const NIE_DATA_SOURCE: &str = "nie:dataSource";
pub const NIE_MIME_TYPE: &str = "nie:mimeType";
pub const NIE_TITLE: &str = "nie:title";
pub const NIE_PLAIN_TEXT_CONTENT: &str = "nie:plainTextContent";
pub const NFO_BELONGS_TO_CONTAINER: &str = "nfo:belongsToContainer";
pub const NFO_FILE_NAME: &str = "nfo:fileName";
pub const NFO_FILE_SIZE: &str = "nfo:fileSize";
pub const NFO_FILE_LAST_MODIFIED: &str = "nfo:fileLastModified";
pub const NFO_WORD_COUNT: &str = "nfo:wordCount";
pub const NFO_WIDTH: &str = "nfo:width";
pub const NFO_HEIGHT: &str = "nfo:height";
pub const NMM_PERFORMER: &str = "nmm:performer";
pub const NMM_MUSIC_ALBUM_PROP: &str = "nmm:musicAlbum";
pub const NMM_ALBUM_ARTIST: &str = "nmm:albumArtist";
pub const NMM_ARTIST_NAME: &str = "nmm:artistName";
pub const QUARRY_EXTRACTOR_HASH: &str = "quarry:extractorHash";
pub const QUARRY_EXTRACTION_FAILED: &str = "quarry:extractionFailed";
pub const QUARRY_AVAILABLE: &str = "quarry:available";
pub const QUARRY_REMOVAL_POLICY: &str = "quarry:removalPolicy";
pub const QUARRY_ROOT: &str = "quarry:root";

/// Predicates whose object must be unique across subjects.
pub const UNIQUE_PREDICATES: [&str; 1] = [NIE_URL];

// =============================================================================
// PREDICATE ROLES
// =============================================================================

/// What deleting one end of a URI-valued triple does to the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateRole {
    /// The subject only exists because of the object: deleting the object
    /// deletes the subject (stored-as, container, data source).
    Dependent,
    /// The subject owns the object: deleting the subject deletes the object.
    Owning,
    /// Plain reference: only the triple itself is removed.
    Reference,
}

/// Structural role of a predicate.
#[must_use]
pub fn predicate_role(predicate: &str) -> PredicateRole {
    match predicate {
        NIE_IS_STORED_AS | NFO_BELONGS_TO_CONTAINER | NIE_DATA_SOURCE => PredicateRole::Dependent,
        NIE_INTERPRETED_AS => PredicateRole::Owning,
        _ => PredicateRole::Reference,
    }
}

/// Whether values of this predicate must be unique across subjects.
#[must_use]
pub fn is_unique(predicate: &str) -> bool {
    UNIQUE_PREDICATES.contains(&predicate)
}

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for URIs (subjects, predicates and URI objects).
pub const MAX_URI_LENGTH: usize = 4096;

/// Maximum length for string literals.
///
/// Extracted plain text is truncated before it reaches the graph.
pub const MAX_LITERAL_LENGTH: usize = 65_536;

/// Maximum number of rows a single query may return.
pub const MAX_QUERY_ROWS: usize = 10_000;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_roles() {
        assert_eq!(predicate_role(NIE_IS_STORED_AS), PredicateRole::Dependent);
        assert_eq!(
            predicate_role(NFO_BELONGS_TO_CONTAINER),
            PredicateRole::Dependent
        );
        assert_eq!(predicate_role(NIE_INTERPRETED_AS), PredicateRole::Owning);
        assert_eq!(predicate_role(NMM_PERFORMER), PredicateRole::Reference);
    }

    #[test]
    fn content_graphs_exclude_filesystem() {
        assert!(!content_graphs().contains(&filesystem_graph()));
        assert_eq!(content_graphs().len(), CONTENT_GRAPHS.len());
    }
}

//! # Extractor Modules
//!
//! The capability the gateway isolates: `extract(path, mime)` returns a
//! description of the file's content or a typed failure.
//!
//! Every module declares a name and version (both feed the extractor hash),
//! the graph its output belongs to, and the MIME types it handles. The
//! `ModuleManager` resolves a MIME type to the module that handles it.
//!
//! Modules are plain synchronous code. Containing crashes and enforcing time
//! limits is the caller's job.

pub mod audio;
pub mod image;
pub mod text;

use crate::types::{GraphName, Term, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

pub use audio::AudioExtractor;
pub use image::ImageExtractor;
pub use text::TextExtractor;

/// MIME type reported for directories.
pub const DIRECTORY_MIME: &str = "inode/directory";

/// MIME type used when nothing better is known.
pub const FALLBACK_MIME: &str = "application/octet-stream";

// =============================================================================
// RESULTS
// =============================================================================

/// Why an extraction produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("file not found")]
    NotFound,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("extractor crashed: {0}")]
    Crashed(String),
    #[error("extractor timed out after {0}s")]
    TimedOut(u64),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExtractionFailure {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::UnexpectedEof => Self::Malformed("unexpected end of file".into()),
            _ => Self::Io(e.to_string()),
        }
    }
}

/// A resource described alongside the file's content (an artist, an album).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxResource {
    pub subject: Uri,
    pub types: Vec<String>,
    pub properties: Vec<(String, Term)>,
}

/// What an extractor found in a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    /// Classes of the content resource.
    pub types: Vec<String>,
    /// Properties of the content resource.
    pub properties: Vec<(String, Term)>,
    /// Further resources the content refers to.
    pub resources: Vec<AuxResource>,
}

impl ExtractedMetadata {
    #[must_use]
    pub fn of_types(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn set(&mut self, predicate: &str, value: Term) {
        self.properties.push((predicate.to_string(), value));
    }

    /// First value of a property.
    #[must_use]
    pub fn get(&self, predicate: &str) -> Option<&Term> {
        self.properties
            .iter()
            .find(|(p, _)| p == predicate)
            .map(|(_, v)| v)
    }
}

// =============================================================================
// MODULES
// =============================================================================

/// Static description of an extractor module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub version: u32,
    /// Graph the module's output lands in.
    pub graph: &'static str,
    /// Exact MIME types, or `type/*` wildcards.
    pub mime_types: &'static [&'static str],
}

impl ModuleInfo {
    #[must_use]
    pub fn graph_name(&self) -> GraphName {
        GraphName::new(self.graph)
    }

    #[must_use]
    pub fn handles(&self, mime: &str) -> bool {
        self.mime_types.iter().any(|pattern| match pattern.strip_suffix("/*") {
            Some(major) => mime
                .split_once('/')
                .is_some_and(|(m, _)| m.eq_ignore_ascii_case(major)),
            None => pattern.eq_ignore_ascii_case(mime),
        })
    }
}

/// An extractor module.
pub trait Extractor: Send + Sync {
    fn info(&self) -> ModuleInfo;

    fn extract(&self, path: &Path, mime: &str) -> Result<ExtractedMetadata, ExtractionFailure>;
}

/// Resolves MIME types to modules.
#[derive(Clone)]
pub struct ModuleManager {
    modules: Vec<Arc<dyn Extractor>>,
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.info().name))
            .finish()
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModuleManager {
    /// No modules: every file is recorded without content.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// The builtin text, audio and image modules.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            modules: vec![
                Arc::new(AudioExtractor),
                Arc::new(ImageExtractor),
                Arc::new(TextExtractor),
            ],
        }
    }

    /// Add a module that takes precedence over those already registered.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn Extractor>) -> Self {
        self.modules.insert(0, module);
        self
    }

    /// The module handling a MIME type.
    #[must_use]
    pub fn for_mime(&self, mime: &str) -> Option<Arc<dyn Extractor>> {
        self.modules
            .iter()
            .find(|m| m.info().handles(mime))
            .cloned()
    }

    /// The module registered under a name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Extractor>> {
        self.modules.iter().find(|m| m.info().name == name).cloned()
    }

    pub fn infos(&self) -> impl Iterator<Item = ModuleInfo> + '_ {
        self.modules.iter().map(|m| m.info())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// MIME type of a path, from its extension.
#[must_use]
pub fn guess_mime(path: &Path, is_dir: bool) -> String {
    if is_dir {
        return DIRECTORY_MIME.to_string();
    }
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

/// Read at most `limit` bytes from the start of a file.
pub(crate) fn read_prefix(path: &Path, limit: u64) -> Result<Vec<u8>, ExtractionFailure> {
    let file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(limit).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Cut a string to at most `max` bytes on a character boundary.
#[must_use]
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Stable URN for a resource identified by name parts.
#[must_use]
pub fn minted_urn(kind: &str, parts: &[&str]) -> Uri {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let hex = hasher.finalize().to_hex();
    Uri::new(format!("urn:quarry:{}:{}", kind, &hex.as_str()[..24]))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{GRAPH_AUDIO, GRAPH_DOCUMENTS};

    #[test]
    fn wildcard_and_exact_mime_matching() {
        let manager = ModuleManager::builtin();
        let text = manager.for_mime("text/markdown").expect("text module");
        assert_eq!(text.info().graph, GRAPH_DOCUMENTS);
        let audio = manager.for_mime("audio/mpeg").expect("audio module");
        assert_eq!(audio.info().graph, GRAPH_AUDIO);
        assert!(manager.for_mime("application/x-unknown").is_none());
    }

    #[test]
    fn added_module_takes_precedence() {
        struct Loud;
        impl Extractor for Loud {
            fn info(&self) -> ModuleInfo {
                ModuleInfo {
                    name: "loud",
                    version: 1,
                    graph: GRAPH_AUDIO,
                    mime_types: &["text/plain"],
                }
            }
            fn extract(&self, _: &Path, _: &str) -> Result<ExtractedMetadata, ExtractionFailure> {
                Err(ExtractionFailure::Unsupported("loud".into()))
            }
        }

        let manager = ModuleManager::builtin().with_module(Arc::new(Loud));
        assert_eq!(manager.for_mime("text/plain").map(|m| m.info().name), Some("loud"));
        assert_eq!(manager.for_mime("text/x-rst").map(|m| m.info().name), Some("text"));
    }

    #[test]
    fn mime_guess_by_extension() {
        assert_eq!(guess_mime(Path::new("/a/song.mp3"), false), "audio/mpeg");
        assert_eq!(guess_mime(Path::new("/a/notes.txt"), false), "text/plain");
        assert_eq!(guess_mime(Path::new("/a/dir"), true), DIRECTORY_MIME);
        assert_eq!(guess_mime(Path::new("/a/blob"), false), FALLBACK_MIME);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = read_prefix(Path::new("/definitely/not/here"), 10).expect_err("missing");
        assert_eq!(err, ExtractionFailure::NotFound);
    }
}

//! # Extractor Fingerprints
//!
//! An `ExtractorHash` summarises everything that decides whether a file has
//! to go through extraction again: its modification time, its size, and the
//! extractor module (name and version) that handles its MIME type.
//!
//! The hash is stored on the FileObject after every definitive outcome,
//! success or failure. A matching hash means "nothing to do".

use crate::graph::ResourceGraph;
use crate::types::{Term, Uri};
use crate::vocab::{QUARRY_EXTRACTION_FAILED, QUARRY_EXTRACTOR_HASH, filesystem_graph};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// Hex-encoded BLAKE3 fingerprint, truncated to 128 bits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractorHash(pub String);

impl fmt::Display for ExtractorHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The observable state of a file that feeds the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Modification time, seconds since the epoch.
    pub mtime_secs: i64,
    /// Sub-second part of the modification time.
    pub mtime_nanos: u32,
    pub size: u64,
}

impl FileStamp {
    /// Read the stamp from filesystem metadata.
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let (mtime_secs, mtime_nanos) = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));
        Self {
            mtime_secs,
            mtime_nanos,
            size: meta.len(),
        }
    }
}

impl ExtractorHash {
    /// Fingerprint a file state for a given module (`None` when no module
    /// handles the file).
    #[must_use]
    pub fn compute(stamp: FileStamp, module: Option<(&str, u32)>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&stamp.mtime_secs.to_le_bytes());
        hasher.update(&stamp.mtime_nanos.to_le_bytes());
        hasher.update(&stamp.size.to_le_bytes());
        match module {
            Some((name, version)) => {
                hasher.update(name.as_bytes());
                hasher.update(&[0]);
                hasher.update(&version.to_le_bytes());
            }
            None => {
                hasher.update(b"-");
            }
        }
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..32].to_string())
    }

    /// The hash recorded on a FileObject, if any.
    #[must_use]
    pub fn stored(graph: &ResourceGraph, file: &Uri) -> Option<Self> {
        graph
            .value(&filesystem_graph(), file, QUARRY_EXTRACTOR_HASH)
            .and_then(Term::as_literal)
            .map(|s| Self(s.to_string()))
    }
}

/// Whether the last recorded outcome for a file was a failure.
#[must_use]
pub fn is_known_failed(graph: &ResourceGraph, file: &Uri) -> bool {
    graph
        .value(&filesystem_graph(), file, QUARRY_EXTRACTION_FAILED)
        .and_then(Term::as_bool)
        .unwrap_or(false)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: FileStamp = FileStamp {
        mtime_secs: 1_700_000_000,
        mtime_nanos: 5,
        size: 42,
    };

    #[test]
    fn hash_is_stable() {
        let a = ExtractorHash::compute(STAMP, Some(("text", 1)));
        let b = ExtractorHash::compute(STAMP, Some(("text", 1)));
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 32);
    }

    #[test]
    fn any_input_changes_hash() {
        let base = ExtractorHash::compute(STAMP, Some(("text", 1)));
        let touched = FileStamp {
            mtime_nanos: 6,
            ..STAMP
        };
        let grown = FileStamp { size: 43, ..STAMP };

        assert_ne!(base, ExtractorHash::compute(touched, Some(("text", 1))));
        assert_ne!(base, ExtractorHash::compute(grown, Some(("text", 1))));
        assert_ne!(base, ExtractorHash::compute(STAMP, Some(("text", 2))));
        assert_ne!(base, ExtractorHash::compute(STAMP, Some(("audio", 1))));
        assert_ne!(base, ExtractorHash::compute(STAMP, None));
    }

    #[test]
    fn stamp_from_real_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").expect("write");
        let stamp = FileStamp::from_metadata(&std::fs::metadata(&path).expect("stat"));
        assert_eq!(stamp.size, 5);
        assert!(stamp.mtime_secs > 0);
    }
}

//! # Core Type Definitions
//!
//! This module contains the value types shared by every part of the engine:
//! - Resource identifiers (`Uri`, `GraphName`)
//! - Graph contents (`Term`, `Triple`)
//! - Error types (`QuarryError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use integer values only (no floating-point literals)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a resource or predicate in the graph.
///
/// Vocabulary terms use compact names (`nie:url`), files use their
/// `file://` location and engine-minted resources use `urn:quarry:` names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(pub String);

impl Uri {
    /// Create a new URI from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the URI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the `file://` URI of a local path.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        Self(format!("file://{}", path.display()))
    }

    /// Resolve a `file://` URI back to a local path.
    #[must_use]
    pub fn to_path(&self) -> Option<PathBuf> {
        self.0.strip_prefix("file://").map(PathBuf::from)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a graph partition (`quarry:FileSystem`, `quarry:Audio`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphName(pub String);

impl GraphName {
    /// Create a new graph name.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the graph name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GraphName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// TERMS & TRIPLES
// =============================================================================

/// Object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    /// Reference to another resource.
    Uri(Uri),
    /// Plain string literal.
    Literal(String),
    /// Integer literal (sizes, timestamps, counts).
    Integer(i64),
    /// Boolean literal.
    Boolean(bool),
}

impl Term {
    /// Shorthand for a URI term.
    #[must_use]
    pub fn uri(s: impl Into<String>) -> Self {
        Self::Uri(Uri::new(s))
    }

    /// Shorthand for a string literal.
    #[must_use]
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    /// The referenced resource, if this term is a URI.
    #[must_use]
    pub fn as_uri(&self) -> Option<&Uri> {
        match self {
            Self::Uri(u) => Some(u),
            _ => None,
        }
    }

    /// The string content, if this term is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            _ => None,
        }
    }

    /// The integer content, if this term is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The boolean content, if this term is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(u) => write!(f, "<{}>", u),
            Self::Literal(s) => write!(f, "{:?}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// A subject/predicate/object statement, without graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Uri,
    pub predicate: Uri,
    pub object: Term,
}

impl Triple {
    /// Create a new triple.
    #[must_use]
    pub fn new(subject: Uri, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject,
            predicate: Uri::new(predicate),
            object,
        }
    }
}

/// A triple placed in a named graph. This is the unit of storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub graph: GraphName,
    pub subject: Uri,
    pub predicate: Uri,
    pub object: Term,
}

impl Quad {
    /// Place a triple in a graph.
    #[must_use]
    pub fn new(graph: GraphName, triple: Triple) -> Self {
        Self {
            graph,
            subject: triple.subject,
            predicate: triple.predicate,
            object: triple.object,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the indexing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuarryError {
    /// A triple or resource failed validation.
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// A write would give a unique property to a second subject.
    #[error("Constraint violation: {predicate} {value:?} already belongs to {existing}")]
    ConstraintViolation {
        predicate: Uri,
        value: String,
        existing: Uri,
    },

    /// A query pattern could not be parsed or evaluated.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Configuration was rejected.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A glob pattern failed to compile.
    #[error("Invalid glob: {0}")]
    Glob(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The on-disk store is corrupt and cannot be opened.
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for QuarryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

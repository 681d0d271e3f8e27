//! # API Request/Response Types
//!
//! JSON bodies of the control surface. Queries and change sets use the core
//! types directly (`quarry_core::Query`, `quarry_core::ChangeSet`).

use crate::engine::{IndexOutcome, Status};
use quarry_core::{CommitReport, GraphName, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Engine snapshot plus the size of the graph.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub engine: Status,
    pub quads: usize,
    /// Subjects per named graph.
    pub graphs: BTreeMap<String, usize>,
}

// =============================================================================
// GENERIC COMMAND RESPONSE
// =============================================================================

/// Reply to requests that only succeed or fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// INDEX REQUEST/RESPONSE
// =============================================================================

/// Index a location now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub path: PathBuf,
    /// Index a directory with everything below it.
    #[serde(default)]
    pub recursive: bool,
    /// Content graphs the file may be indexed into. Absent means any.
    #[serde(default)]
    pub graphs: Option<BTreeSet<GraphName>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub success: bool,
    pub path: PathBuf,
    /// Extractor or filesystem message for the indexed path(s).
    pub message: Option<String>,
    /// Set when the request could not be handled at all.
    pub error: Option<String>,
}

impl IndexResponse {
    pub fn from_outcome(outcome: IndexOutcome) -> Self {
        Self {
            success: outcome.success,
            path: outcome.path,
            message: outcome.message,
            error: None,
        }
    }

    pub fn error(path: PathBuf, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            path,
            message: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// PAUSE / RESUME
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub application: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseResponse {
    pub success: bool,
    /// Pass back to `/resume` to release the pause.
    pub cookie: Option<u32>,
    pub error: Option<String>,
}

impl PauseResponse {
    pub fn success(cookie: u32) -> Self {
        Self {
            success: true,
            cookie: Some(cookie),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            cookie: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub cookie: u32,
}

// =============================================================================
// SYSTEM SIGNALS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerRequest {
    pub on_battery: bool,
    #[serde(default)]
    pub low_battery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyRequest {
    pub ready: bool,
}

// =============================================================================
// DEVICES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyRequest {
    pub root: PathBuf,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountResponse {
    pub success: bool,
    /// False when removable devices are not indexed.
    pub indexed: bool,
    pub error: Option<String>,
}

// =============================================================================
// QUERIES & UPDATES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default)]
    pub rows: Vec<Row>,
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            rows,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub success: bool,
    pub result: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub report: Option<CommitReport>,
    pub error: Option<String>,
}

impl UpdateResponse {
    pub fn success(report: CommitReport) -> Self {
        Self {
            success: true,
            report: Some(report),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            report: None,
            error: Some(msg.into()),
        }
    }
}

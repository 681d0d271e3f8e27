//! # Extractor Gateway
//!
//! Runs one extractor module over one file without letting it take the
//! daemon down. Every call is time-bounded and every way it can go wrong
//! (panic, crash, hang, garbage output) comes back as an
//! `ExtractionFailure`.
//!
//! ## Isolation
//!
//! - `Thread`: the module runs on the blocking pool under `catch_unwind`.
//!   A hang past the timeout is abandoned (the thread finishes on its own).
//! - `Process`: the binary re-invokes itself as
//!   `quarry extract --worker --module <name> --mime <mime> <path>` and reads
//!   one JSON `WorkerReply` from stdout. The child is killed when the timeout
//!   drops it.

use quarry_core::{EngineConfig, ExtractedMetadata, ExtractionFailure, Isolation, ModuleManager};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

/// What a worker process prints on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerReply {
    Extracted { metadata: ExtractedMetadata },
    Failed { failure: ExtractionFailure },
}

impl From<Result<ExtractedMetadata, ExtractionFailure>> for WorkerReply {
    fn from(result: Result<ExtractedMetadata, ExtractionFailure>) -> Self {
        match result {
            Ok(metadata) => Self::Extracted { metadata },
            Err(failure) => Self::Failed { failure },
        }
    }
}

impl From<WorkerReply> for Result<ExtractedMetadata, ExtractionFailure> {
    fn from(reply: WorkerReply) -> Self {
        match reply {
            WorkerReply::Extracted { metadata } => Ok(metadata),
            WorkerReply::Failed { failure } => Err(failure),
        }
    }
}

/// Run a module in the current process. This is what the worker subprocess
/// does, and what `Thread` isolation does on the blocking pool.
pub fn extract_in_process(
    modules: &ModuleManager,
    module: &str,
    path: &Path,
    mime: &str,
) -> Result<ExtractedMetadata, ExtractionFailure> {
    let extractor = modules
        .by_name(module)
        .ok_or_else(|| ExtractionFailure::Unsupported(format!("no module named {}", module)))?;
    extractor.extract(path, mime)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "extractor panicked".to_string()
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Isolated, time-bounded access to the extractor modules.
#[derive(Debug, Clone)]
pub struct Gateway {
    modules: Arc<ModuleManager>,
    isolation: Isolation,
    timeout: Duration,
    worker: Option<PathBuf>,
}

impl Gateway {
    #[must_use]
    pub fn new(modules: Arc<ModuleManager>, isolation: Isolation, timeout: Duration) -> Self {
        Self {
            modules,
            isolation,
            timeout,
            worker: None,
        }
    }

    /// Gateway with the isolation and timeout of an engine configuration.
    #[must_use]
    pub fn from_config(modules: Arc<ModuleManager>, engine: &EngineConfig) -> Self {
        Self::new(
            modules,
            engine.isolation,
            Duration::from_secs(engine.extractor_timeout_secs),
        )
    }

    /// Switch isolation and timeout for calls made from now on.
    pub fn reconfigure(&mut self, engine: &EngineConfig) {
        self.isolation = engine.isolation;
        self.timeout = Duration::from_secs(engine.extractor_timeout_secs);
    }

    /// Executable to start for `Process` isolation. Defaults to the running
    /// binary.
    #[must_use]
    pub fn with_worker(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker = Some(exe.into());
        self
    }

    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleManager> {
        &self.modules
    }

    /// Extract `path` with the named module.
    pub async fn extract(
        &self,
        module: &str,
        path: &Path,
        mime: &str,
    ) -> Result<ExtractedMetadata, ExtractionFailure> {
        match self.isolation {
            Isolation::Thread => self.extract_thread(module, path, mime).await,
            Isolation::Process => self.extract_process(module, path, mime).await,
        }
    }

    async fn extract_thread(
        &self,
        module: &str,
        path: &Path,
        mime: &str,
    ) -> Result<ExtractedMetadata, ExtractionFailure> {
        let modules = Arc::clone(&self.modules);
        let module = module.to_string();
        let path = path.to_path_buf();
        let mime = mime.to_string();

        let task = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(AssertUnwindSafe(|| {
                extract_in_process(&modules, &module, &path, &mime)
            }))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(ExtractionFailure::TimedOut(self.timeout.as_secs())),
            Ok(Err(e)) => Err(ExtractionFailure::Crashed(e.to_string())),
            Ok(Ok(Err(payload))) => Err(ExtractionFailure::Crashed(panic_message(
                payload.as_ref(),
            ))),
            Ok(Ok(Ok(result))) => result,
        }
    }

    async fn extract_process(
        &self,
        module: &str,
        path: &Path,
        mime: &str,
    ) -> Result<ExtractedMetadata, ExtractionFailure> {
        let exe = match &self.worker {
            Some(exe) => exe.clone(),
            None => std::env::current_exe()
                .map_err(|e| ExtractionFailure::Crashed(format!("cannot locate worker: {}", e)))?,
        };

        let child = tokio::process::Command::new(&exe)
            .arg("--quiet")
            .arg("extract")
            .arg("--worker")
            .arg("--module")
            .arg(module)
            .arg("--mime")
            .arg(mime)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionFailure::Crashed(format!("cannot start worker: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                tracing::warn!(path = %path.display(), module, "Extractor worker timed out");
                return Err(ExtractionFailure::TimedOut(self.timeout.as_secs()));
            }
            Ok(Err(e)) => return Err(ExtractionFailure::Crashed(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            tracing::warn!(
                path = %path.display(),
                module,
                status = %output.status,
                "Extractor worker died"
            );
            return Err(ExtractionFailure::Crashed(format!(
                "worker exited with {}",
                output.status
            )));
        }

        serde_json::from_slice::<WorkerReply>(&output.stdout)
            .map_err(|e| ExtractionFailure::Crashed(format!("unreadable worker reply: {}", e)))?
            .into()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_wire_format() {
        let reply = WorkerReply::from(Err(ExtractionFailure::TimedOut(3)));
        let json = serde_json::to_value(&reply).expect("serialize");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["failure"]["kind"], "timed_out");
    }

    #[test]
    fn unknown_module_is_unsupported() {
        let modules = ModuleManager::builtin();
        let result = extract_in_process(&modules, "nope", Path::new("/tmp/x"), "text/plain");
        assert!(matches!(result, Err(ExtractionFailure::Unsupported(_))));
    }
}

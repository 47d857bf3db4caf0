//! Speech engine gateway
//!
//! The engine that turns text plus a reference clip into a WAV file is an
//! external, blocking, non-reentrant resource. [`SpeechEngine`] is the seam,
//! [`CommandEngine`] drives an engine process over JSON on stdin/stdout, and
//! [`EngineGate`] bounds how many calls may be inside the engine at once.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::protocol::{GenerationParams, InferMode};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("failed to start engine {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("engine exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("malformed engine response: {0}")]
    Protocol(String),

    #[error("{0}")]
    Synthesis(String),

    #[error("engine produced no audio at {0}")]
    MissingOutput(String),

    #[error("engine task aborted: {0}")]
    Aborted(String),

    #[error("engine gate closed")]
    Closed,
}

// =============================================================================
// Job
// =============================================================================

/// One synthesis call, as sent to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineJob {
    pub mode: InferMode,
    pub reference_path: PathBuf,
    pub text: String,
    /// Where the engine should write its WAV output
    pub output_path: PathBuf,
    #[serde(flatten)]
    pub params: GenerationParams,
}

/// Blocking speech synthesis backend.
///
/// Implementations need not be thread-safe with respect to concurrent
/// `synthesize` calls; [`EngineGate`] serializes access.
pub trait SpeechEngine: Send + Sync {
    /// Synthesize `job.text` and return the path of the produced WAV file.
    fn synthesize(&self, job: &EngineJob) -> Result<PathBuf, EngineError>;

    /// Short name reported by the health endpoint
    fn name(&self) -> &str;
}

// =============================================================================
// Subprocess engine
// =============================================================================

#[derive(Deserialize)]
struct CommandEngineOutput {
    success: bool,
    output_path: Option<PathBuf>,
    error: Option<String>,
}

/// Engine backed by an external program.
///
/// The program receives the [`EngineJob`] as JSON on stdin and must print
/// `{"success": bool, "output_path"?: str, "error"?: str}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    name: String,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let name = Path::new(&program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Self {
            program,
            args: Vec::new(),
            name,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl SpeechEngine for CommandEngine {
    fn synthesize(&self, job: &EngineJob) -> Result<PathBuf, EngineError> {
        let input = serde_json::to_vec(job).map_err(|e| EngineError::Protocol(e.to_string()))?;
        let spawn_err = |e: std::io::Error| EngineError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading stdin is reported by its status below.
            if let Err(e) = stdin.write_all(&input) {
                debug!(error = %e, "engine closed stdin early");
            }
        }

        let output = child.wait_with_output().map_err(spawn_err)?;
        if !output.status.success() {
            return Err(EngineError::Exited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let result: CommandEngineOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        if !result.success {
            return Err(EngineError::Synthesis(
                result.error.unwrap_or_else(|| "unknown engine error".to_string()),
            ));
        }

        let path = result.output_path.unwrap_or_else(|| job.output_path.clone());
        if !path.is_file() {
            return Err(EngineError::MissingOutput(path.display().to_string()));
        }
        Ok(path)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Concurrency gate
// =============================================================================

/// Bounded access to a shared engine
#[derive(Clone)]
pub struct EngineGate {
    engine: Arc<dyn SpeechEngine>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl EngineGate {
    /// Gate `engine` behind `slots` concurrent calls (at least one).
    pub fn new(engine: Arc<dyn SpeechEngine>, slots: usize) -> Self {
        let capacity = slots.max(1);
        Self {
            engine,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run one job, waiting for a free slot first.
    ///
    /// The slot is held by the blocking task itself, so dropping the returned
    /// future does not release it before the engine call finishes.
    pub async fn run(&self, job: EngineJob) -> Result<PathBuf, EngineError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Closed)?;

        let engine = self.engine.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = engine.synthesize(&job);
            drop(permit);
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "engine task did not complete");
                Err(EngineError::Aborted(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for EngineGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineGate")
            .field("engine", &self.engine.name())
            .field("capacity", &self.capacity)
            .field("available", &self.available_slots())
            .finish()
    }
}

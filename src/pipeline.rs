//! Synthesis orchestration
//!
//! One request moves through
//! `Validated → Synthesizing → Effects? → Transcoding? → Registered → Responded`,
//! with `Failed` reachable from every step. Errors found before the engine is
//! called are returned as `Err` (the caller reports them as client errors);
//! everything from the engine call onward is folded into a
//! `SynthesisResult { success: false }`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::effects::{EffectsChain, StageWarning, PITCH_OUTPUT_RATE};
use crate::engine::{EngineError, EngineGate, EngineJob};
use crate::protocol::{OutputFormat, SynthesisRequest, SynthesisResult};
use crate::references::{ReferenceError, ReferenceLibrary};
use crate::store::{ArtifactId, ArtifactStore};
use crate::transcode::{probe_duration, TranscodeConfig, Transcoder};
use crate::validate::{validate, EffectSettings, ValidatedRequest, ValidationError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("reference audio not found: {0}")]
    ReferenceNotFound(String),

    #[error(transparent)]
    Reference(ReferenceError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("post-processing aborted: {0}")]
    PostProcess(String),
}

impl PipelineError {
    /// Errors detected before any engine work, reported to clients as
    /// request errors rather than failed syntheses.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::ReferenceNotFound(_)
        )
    }
}

impl From<ReferenceError> for PipelineError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::NotFound(name) | ReferenceError::InvalidName(name) => {
                PipelineError::ReferenceNotFound(name)
            }
            other => PipelineError::Reference(other),
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validated,
    Synthesizing,
    Effects,
    Transcoding,
    Registered,
    Responded,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validated => "validated",
            Stage::Synthesizing => "synthesizing",
            Stage::Effects => "effects",
            Stage::Transcoding => "transcoding",
            Stage::Registered => "registered",
            Stage::Responded => "responded",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub transcode: TranscodeConfig,
    /// Sample rate the pitch stage resamples to
    pub pitch_output_rate: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transcode: TranscodeConfig::default(),
            pitch_output_rate: PITCH_OUTPUT_RATE,
        }
    }
}

/// What post-processing left behind
struct Finished {
    path: PathBuf,
    duration: Option<f64>,
    warnings: Vec<StageWarning>,
}

#[derive(Debug, Clone)]
pub struct SynthesisPipeline {
    gate: EngineGate,
    references: ReferenceLibrary,
    store: Arc<ArtifactStore>,
    effects: EffectsChain,
    transcoder: Transcoder,
}

impl SynthesisPipeline {
    pub fn new(
        gate: EngineGate,
        references: ReferenceLibrary,
        store: Arc<ArtifactStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gate,
            references,
            store,
            effects: EffectsChain::new().with_pitch_output_rate(config.pitch_output_rate),
            transcoder: Transcoder::new(config.transcode),
        }
    }

    pub fn gate(&self) -> &EngineGate {
        &self.gate
    }

    pub fn references(&self) -> &ReferenceLibrary {
        &self.references
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Run one synthesis request end to end.
    #[instrument(
        skip_all,
        fields(reference = %request.reference_audio, format = %request.output_format)
    )]
    pub async fn handle(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisResult, PipelineError> {
        let started = Instant::now();
        match self.run(request, started).await {
            Ok(result) => {
                debug!(stage = %Stage::Responded, "request complete");
                Ok(result)
            }
            Err(e) if e.is_structural() => {
                warn!(stage = %Stage::Failed, error = %e, "rejected synthesis request");
                Err(e)
            }
            Err(e) => {
                error!(stage = %Stage::Failed, error = %e, "speech synthesis failed");
                Ok(SynthesisResult::failed(e, started.elapsed().as_secs_f64()))
            }
        }
    }

    async fn run(
        &self,
        request: &SynthesisRequest,
        started: Instant,
    ) -> Result<SynthesisResult, PipelineError> {
        let validated = validate(request)?;
        let reference_path = self.references.resolve(&validated.reference_audio)?;
        debug!(stage = %Stage::Validated, reference = %reference_path.display());

        let id = self.store.reserve();
        let expected = self.store.path_for(&id, OutputFormat::Wav.extension());
        let job = EngineJob {
            mode: validated.infer_mode,
            reference_path,
            text: validated.text.clone(),
            output_path: expected.clone(),
            params: validated.params.clone(),
        };

        info!(
            stage = %Stage::Synthesizing,
            id = %id,
            mode = validated.infer_mode.as_str(),
            text = %preview(&validated.text),
            "starting synthesis"
        );
        let raw = self.gate.run(job).await?;
        let raw = self.adopt_engine_output(raw, &id, expected).await?;

        let pipeline = self.clone();
        let (id, finished) = tokio::task::spawn_blocking(move || {
            let finished = pipeline.post_process(&id, raw, &validated);
            (id, finished)
        })
        .await
        .map_err(|e| PipelineError::PostProcess(e.to_string()))?;

        let record = self.store.register(&id, &finished.path);
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            stage = %Stage::Registered,
            file = %record.file_name,
            duration = ?finished.duration,
            elapsed_secs = elapsed,
            warnings = finished.warnings.len(),
            "speech synthesis complete"
        );

        Ok(SynthesisResult::succeeded(
            record.url(),
            finished.duration,
            elapsed,
            finished.warnings.iter().map(ToString::to_string).collect(),
        ))
    }

    /// Engines may answer with a path of their own choosing. Anything other
    /// than the reserved path is moved under the reserved id so the artifact
    /// stays servable from the output directory.
    async fn adopt_engine_output(
        &self,
        raw: PathBuf,
        id: &ArtifactId,
        expected: PathBuf,
    ) -> Result<PathBuf, EngineError> {
        if raw == expected {
            return Ok(raw);
        }
        let extension = raw
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| OutputFormat::Wav.extension().to_string());
        let target = self.store.path_for(id, &extension);
        debug!(from = %raw.display(), to = %target.display(), "adopting engine output");

        if tokio::fs::rename(&raw, &target).await.is_ok() {
            return Ok(target);
        }
        // Rename fails across filesystems
        match tokio::fs::copy(&raw, &target).await {
            Ok(_) => {
                if let Err(e) = tokio::fs::remove_file(&raw).await {
                    debug!(path = %raw.display(), error = %e, "could not remove engine output");
                }
                Ok(target)
            }
            Err(e) => {
                warn!(path = %raw.display(), error = %e, "engine output is not readable");
                Err(EngineError::MissingOutput(raw.display().to_string()))
            }
        }
    }

    /// Effects, container conversion and duration probe. CPU and process bound.
    fn post_process(
        &self,
        id: &ArtifactId,
        raw: PathBuf,
        request: &ValidatedRequest,
    ) -> Finished {
        let mut warnings = Vec::new();
        let mut path = raw;

        if !request.effects.is_identity() {
            path = self.apply_effects(id, path, &request.effects, &mut warnings);
        }

        if OutputFormat::from_path(&path) != Some(request.output_format) {
            debug!(stage = %Stage::Transcoding, target = %request.output_format);
            let outcome = self.transcoder.transcode(&path, request.output_format);
            warnings.extend(outcome.warning);
            path = outcome.path;
        }

        let duration = probe_duration(&path);
        Finished {
            path,
            duration,
            warnings,
        }
    }

    fn apply_effects(
        &self,
        id: &ArtifactId,
        raw: PathBuf,
        settings: &EffectSettings,
        warnings: &mut Vec<StageWarning>,
    ) -> PathBuf {
        debug!(stage = %Stage::Effects, ?settings);
        let processed = self
            .store
            .output_dir()
            .join(format!("{id}_processed.{}", OutputFormat::Wav.extension()));
        let output = self.effects.process_file(&raw, &processed, settings);
        warnings.extend(output.warnings);

        if output.path != raw {
            if let Err(e) = std::fs::remove_file(&raw) {
                debug!(path = %raw.display(), error = %e, "could not remove raw engine output");
            }
        }
        output.path
    }
}

/// First 50 characters of the text, for logs
fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_errors() {
        assert!(PipelineError::Validation(ValidationError::EmptyText).is_structural());
        assert!(PipelineError::ReferenceNotFound("ghost.wav".into()).is_structural());
        assert!(!PipelineError::Engine(EngineError::Synthesis("boom".into())).is_structural());
        assert!(!PipelineError::PostProcess("panic".into()).is_structural());
    }

    #[test]
    fn test_reference_errors_map_to_not_found() {
        let err: PipelineError = ReferenceError::NotFound("ghost.wav".into()).into();
        assert!(matches!(err, PipelineError::ReferenceNotFound(ref n) if n == "ghost.wav"));
        assert_eq!(err.to_string(), "reference audio not found: ghost.wav");
    }

    #[test]
    fn test_engine_error_message() {
        let result = SynthesisResult::failed(
            PipelineError::Engine(EngineError::Synthesis("model not loaded".into())),
            0.1,
        );
        assert!(!result.success);
        assert_eq!(result.message, "speech synthesis failed: model not loaded");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("hello"), "hello");
        let long = "a".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "a".repeat(50)));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Synthesizing.to_string(), "synthesizing");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}

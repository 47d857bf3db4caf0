//! Request normalization
//!
//! Turns a wire [`SynthesisRequest`] into a [`ValidatedRequest`]: text and
//! reference are checked, pitch and speed are clamped, and format and mode
//! strings are parsed leniently. Volume gain is passed through unclamped.

use thiserror::Error;

use crate::protocol::{GenerationParams, InferMode, OutputFormat, SynthesisRequest};

pub const PITCH_SHIFT_RANGE: (f32, f32) = (-12.0, 12.0);
pub const SPEED_RATE_RANGE: (f32, f32) = (0.5, 2.0);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("text must not be empty")]
    EmptyText,

    #[error("reference_audio must name a file")]
    MissingReference,
}

/// Effect knobs after clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectSettings {
    pub gain_db: f32,
    pub speed_rate: f32,
    pub pitch_semitones: f32,
}

impl EffectSettings {
    pub const IDENTITY: EffectSettings = EffectSettings {
        gain_db: 0.0,
        speed_rate: 1.0,
        pitch_semitones: 0.0,
    };

    /// True when no stage of the effects chain would run
    pub fn is_identity(&self) -> bool {
        self.gain_db == 0.0 && self.speed_rate == 1.0 && self.pitch_semitones == 0.0
    }
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub text: String,
    pub reference_audio: String,
    pub output_format: OutputFormat,
    pub infer_mode: InferMode,
    pub effects: EffectSettings,
    pub params: GenerationParams,
}

/// Clamp `value` into `range`; NaN maps to `identity`.
fn clamp_or(value: f32, range: (f32, f32), identity: f32) -> f32 {
    if value.is_nan() {
        identity
    } else {
        value.clamp(range.0, range.1)
    }
}

pub fn clamp_pitch_shift(semitones: f32) -> f32 {
    clamp_or(semitones, PITCH_SHIFT_RANGE, 0.0)
}

pub fn clamp_speed_rate(rate: f32) -> f32 {
    clamp_or(rate, SPEED_RATE_RANGE, 1.0)
}

/// Validate and normalize a synthesis request.
pub fn validate(request: &SynthesisRequest) -> Result<ValidatedRequest, ValidationError> {
    if request.text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    if request.reference_audio.trim().is_empty() {
        return Err(ValidationError::MissingReference);
    }

    // Gain is deliberately left unclamped; only non-finite values are dropped.
    let gain_db = if request.volume_gain.is_finite() {
        request.volume_gain
    } else {
        0.0
    };

    Ok(ValidatedRequest {
        text: request.text.clone(),
        reference_audio: request.reference_audio.trim().to_string(),
        output_format: OutputFormat::parse_lenient(&request.output_format),
        infer_mode: InferMode::parse_lenient(&request.infer_mode),
        effects: EffectSettings {
            gain_db,
            speed_rate: clamp_speed_rate(request.speed_rate),
            pitch_semitones: clamp_pitch_shift(request.pitch_shift),
        },
        params: request.generation_params(),
    })
}

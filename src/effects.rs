//! Audio effects chain: gain, tempo, pitch
//!
//! Stages run in a fixed order because later stages depend on the sample
//! rate left behind by earlier ones. Every stage is fail-open: an error is
//! logged and recorded as a [`StageWarning`], and the stage's input flows on
//! unchanged. The chain as a whole never fails.
//!
//! Tempo and pitch reproduce two rate-retagging shortcuts:
//!
//! - slowing down retags the samples to `rate * speed` and resamples back to
//!   the original rate, which lowers the pitch along with the tempo;
//! - pitch shifting retags to `rate * 2^(semitones/12)` and resamples to a
//!   fixed 22050 Hz, which changes duration along with pitch.
//!
//! Speeding up is pitch-preserving (chunked splice with crossfade).

use std::fmt;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::validate::EffectSettings;
use crate::waveform::Waveform;

/// Sample rate the pitch stage always produces
pub const PITCH_OUTPUT_RATE: u32 = 22050;

const SPEEDUP_CHUNK_MS: f64 = 150.0;
const SPEEDUP_CROSSFADE_MS: f64 = 25.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("audio too short to speed up ({duration_secs:.2}s, needs at least {min_secs:.2}s)")]
    TooShort { duration_secs: f64, min_secs: f64 },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Named processing steps that can be skipped with a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Load,
    Gain,
    Tempo,
    Pitch,
    Write,
    Transcode,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Load => "load",
            Step::Gain => "gain",
            Step::Tempo => "tempo",
            Step::Pitch => "pitch",
            Step::Write => "write",
            Step::Transcode => "transcode",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested step that was skipped because it failed
#[derive(Debug, Clone, PartialEq)]
pub struct StageWarning {
    pub step: Step,
    pub reason: String,
}

impl StageWarning {
    pub fn new(step: Step, reason: impl fmt::Display) -> Self {
        Self {
            step,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for StageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: {}", self.step, self.reason)
    }
}

/// Result of running the chain on an in-memory waveform
#[derive(Debug, Clone)]
pub struct EffectsOutput {
    pub waveform: Waveform,
    /// Stages that ran successfully, in order
    pub applied: Vec<Step>,
    pub warnings: Vec<StageWarning>,
}

/// Result of running the chain on a file
#[derive(Debug, Clone)]
pub struct FileEffectsOutput {
    /// Processed file, or the untouched input when nothing was applied
    pub path: PathBuf,
    pub applied: Vec<Step>,
    pub warnings: Vec<StageWarning>,
}

/// Gain → tempo → pitch
#[derive(Debug, Clone)]
pub struct EffectsChain {
    pitch_output_rate: u32,
}

impl Default for EffectsChain {
    fn default() -> Self {
        Self {
            pitch_output_rate: PITCH_OUTPUT_RATE,
        }
    }
}

impl EffectsChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pitch_output_rate(mut self, rate: u32) -> Self {
        self.pitch_output_rate = rate;
        self
    }

    /// Run every non-identity stage over `input`.
    pub fn apply(&self, input: Waveform, settings: &EffectSettings) -> EffectsOutput {
        let mut out = EffectsOutput {
            waveform: input,
            applied: Vec::new(),
            warnings: Vec::new(),
        };

        if settings.gain_db != 0.0 {
            run_stage(&mut out, Step::Gain, |w| apply_gain(w, settings.gain_db));
        }
        if tempo_changes_audio(settings.speed_rate) {
            run_stage(&mut out, Step::Tempo, |w| change_tempo(w, settings.speed_rate));
        }
        if settings.pitch_semitones != 0.0 {
            let rate = self.pitch_output_rate;
            run_stage(&mut out, Step::Pitch, |w| {
                shift_pitch(w, settings.pitch_semitones, rate)
            });
        }

        out
    }

    /// Read `input`, apply the chain and write the result to `output`.
    ///
    /// Returns `input` unchanged when no stage applied or the file could not
    /// be read or written.
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        settings: &EffectSettings,
    ) -> FileEffectsOutput {
        let passthrough = |warnings| FileEffectsOutput {
            path: input.to_path_buf(),
            applied: Vec::new(),
            warnings,
        };

        if settings.is_identity() {
            return passthrough(Vec::new());
        }

        let waveform = match Waveform::read_wav(input) {
            Ok(w) => w,
            Err(e) => {
                warn!(
                    path = %input.display(),
                    error = %e,
                    "could not load audio for effects, keeping original"
                );
                return passthrough(vec![StageWarning::new(Step::Load, e)]);
            }
        };

        let result = self.apply(waveform, settings);
        if result.applied.is_empty() {
            return passthrough(result.warnings);
        }

        if let Err(e) = result.waveform.write_wav(output) {
            warn!(
                path = %output.display(),
                error = %e,
                "could not write processed audio, keeping original"
            );
            let mut warnings = result.warnings;
            warnings.push(StageWarning::new(Step::Write, e));
            return passthrough(warnings);
        }

        debug!(
            path = %output.display(),
            sample_rate = result.waveform.sample_rate,
            stages = ?result.applied,
            "effects applied"
        );
        FileEffectsOutput {
            path: output.to_path_buf(),
            applied: result.applied,
            warnings: result.warnings,
        }
    }
}

fn run_stage<F>(out: &mut EffectsOutput, step: Step, stage: F)
where
    F: FnOnce(&Waveform) -> Result<Waveform, EffectError>,
{
    match stage(&out.waveform) {
        Ok(next) => {
            out.waveform = next;
            out.applied.push(step);
        }
        Err(e) => {
            warn!(stage = %step, error = %e, "effect stage failed, passing input through");
            out.warnings.push(StageWarning::new(step, e));
        }
    }
}

/// Scale amplitude by `gain_db` decibels
pub fn apply_gain(wave: &Waveform, gain_db: f32) -> Result<Waveform, EffectError> {
    let factor = 10f32.powf(gain_db / 20.0);
    if !factor.is_finite() {
        return Err(EffectError::InvalidParameter(format!(
            "gain of {gain_db} dB is out of numeric range"
        )));
    }
    let mut next = wave.retagged(wave.sample_rate);
    next.samples.iter_mut().for_each(|s| *s *= factor);
    Ok(next)
}

/// Change playback speed; see the module docs for the slow-down shortcut.
pub fn change_tempo(wave: &Waveform, speed_rate: f32) -> Result<Waveform, EffectError> {
    if speed_rate <= 0.0 || !speed_rate.is_finite() {
        return Err(EffectError::InvalidParameter(format!(
            "speed rate must be positive, got {speed_rate}"
        )));
    }
    if speed_rate > 1.0 {
        speedup(wave, speed_rate)
    } else if speed_rate < 1.0 {
        let slowed_rate = (wave.sample_rate as f32 * speed_rate) as u32;
        if slowed_rate == 0 {
            return Err(EffectError::InvalidParameter(format!(
                "speed rate {speed_rate} gives a zero sample rate"
            )));
        }
        resample(&wave.retagged(slowed_rate), wave.sample_rate)
    } else {
        Ok(wave.retagged(wave.sample_rate))
    }
}

/// Shift pitch by retagging, then resample to `output_rate`.
pub fn shift_pitch(
    wave: &Waveform,
    semitones: f32,
    output_rate: u32,
) -> Result<Waveform, EffectError> {
    let ratio = 2f64.powf(semitones as f64 / 12.0);
    let shifted_rate = (wave.sample_rate as f64 * ratio) as u32;
    if shifted_rate == 0 || output_rate == 0 {
        return Err(EffectError::InvalidParameter(format!(
            "pitch shift of {semitones} semitones gives a zero sample rate"
        )));
    }
    resample(&wave.retagged(shifted_rate), output_rate)
}

fn ms_to_frames(ms: f64, sample_rate: u32) -> usize {
    (ms * sample_rate as f64 / 1000.0).round() as usize
}

/// Chunk length and removed slice per chunk, in milliseconds
fn speedup_plan(speed_rate: f32) -> (f64, f64) {
    let atk = 1.0 / speed_rate as f64;
    if speed_rate < 2.0 {
        (SPEEDUP_CHUNK_MS, (SPEEDUP_CHUNK_MS * (1.0 - atk) / atk).floor())
    } else {
        ((atk * SPEEDUP_CHUNK_MS / (1.0 - atk)).floor(), SPEEDUP_CHUNK_MS)
    }
}

/// False for 1.0 and for speed-ups too small to remove a whole millisecond
/// per chunk; the tempo stage would leave such audio as it is.
pub fn tempo_changes_audio(speed_rate: f32) -> bool {
    if speed_rate > 1.0 && speed_rate.is_finite() {
        speedup_plan(speed_rate).1 >= 1.0
    } else {
        speed_rate != 1.0
    }
}

/// Pitch-preserving speed-up by dropping a slice of every chunk and
/// crossfading across the seams.
pub fn speedup(wave: &Waveform, speed_rate: f32) -> Result<Waveform, EffectError> {
    let (chunk_ms, remove_ms) = speedup_plan(speed_rate);
    if remove_ms < 1.0 {
        // Speed too close to 1.0 to remove a whole millisecond per chunk.
        return Ok(wave.retagged(wave.sample_rate));
    }
    let crossfade_ms = SPEEDUP_CROSSFADE_MS.min(remove_ms - 1.0);

    let rate = wave.sample_rate;
    let window = ms_to_frames(chunk_ms + remove_ms, rate).max(1);
    let trim = ms_to_frames(remove_ms - crossfade_ms, rate);
    let crossfade = ms_to_frames(crossfade_ms, rate);

    let frames = wave.frames();
    let windows = frames.div_ceil(window);
    if windows < 2 {
        return Err(EffectError::TooShort {
            duration_secs: wave.duration_secs(),
            min_secs: (window + 1) as f64 / rate as f64,
        });
    }

    let planar = wave.to_planar();
    let mut output = Vec::with_capacity(planar.len());
    for channel in &planar {
        let pieces: Vec<&[f32]> = channel.chunks(window).collect();
        let Some((last, body)) = pieces.split_last() else {
            output.push(Vec::new());
            continue;
        };

        let mut out: Vec<f32> = Vec::with_capacity(channel.len());
        for (idx, piece) in body.iter().enumerate() {
            let kept = &piece[..piece.len().saturating_sub(trim)];
            if idx == 0 {
                out.extend_from_slice(kept);
            } else {
                append_with_crossfade(&mut out, kept, crossfade);
            }
        }
        out.extend_from_slice(last);
        output.push(out);
    }

    Ok(Waveform::from_planar(&output, rate))
}

/// Append `next` to `out`, linearly blending the last `crossfade` frames of
/// `out` with the first frames of `next`.
fn append_with_crossfade(out: &mut Vec<f32>, next: &[f32], crossfade: usize) {
    let overlap = crossfade.min(out.len()).min(next.len());
    let start = out.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap + 1) as f32;
        out[start + i] = out[start + i] * (1.0 - t) + next[i] * t;
    }
    out.extend_from_slice(&next[overlap..]);
}

/// Band-limited resample to `to_rate`
pub fn resample(wave: &Waveform, to_rate: u32) -> Result<Waveform, EffectError> {
    if wave.sample_rate == to_rate || wave.is_empty() {
        return Ok(wave.retagged(to_rate));
    }

    let planar = wave.to_planar();
    let input_len = planar[0].len();
    let ratio = to_rate as f64 / wave.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, planar.len())
        .map_err(|e| EffectError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();
    let expected = (input_len as f64 * ratio).round() as usize;

    let mut output = resampler
        .process(&planar, None)
        .map_err(|e| EffectError::Resample(e.to_string()))?;
    // The filter delays its output; flush until the whole tail is out.
    while output[0].len() < delay + expected {
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| EffectError::Resample(e.to_string()))?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, rest) in output.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }
    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.truncate(expected);
    }

    Ok(Waveform::from_planar(&output, to_rate))
}

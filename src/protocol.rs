//! HTTP protocol messages for the voicegate synthesis API
//!
//! This module defines the JSON bodies exchanged between clients and the
//! server: the synthesis request, the synthesis result, and the reference
//! audio listing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Container format of a generated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp3,
    Wav,
}

impl OutputFormat {
    /// Parse a client-supplied format name.
    ///
    /// Unknown names fall back to mp3 rather than failing the request.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wav" => OutputFormat::Wav,
            _ => OutputFormat::Mp3,
        }
    }

    /// File extension without the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }

    /// HTTP content type served for this format
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Wav => "audio/wav",
        }
    }

    /// Detect the format from a file name's extension.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(OutputFormat::Mp3),
            "wav" => Some(OutputFormat::Wav),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Engine inference mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferMode {
    #[default]
    Fast,
    Normal,
}

impl InferMode {
    /// Parse a client-supplied mode; anything but "normal" runs the fast path.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => InferMode::Normal,
            _ => InferMode::Fast,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InferMode::Fast => "fast",
            InferMode::Normal => "normal",
        }
    }
}

/// Sampling parameters forwarded verbatim to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub do_sample: bool,
    pub top_p: f32,
    pub top_k: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub max_mel_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            do_sample: true,
            top_p: 0.8,
            top_k: 30,
            temperature: 1.0,
            repetition_penalty: 10.0,
            max_mel_tokens: 600,
        }
    }
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_infer_mode() -> String {
    "fast".to_string()
}

fn default_speed_rate() -> f32 {
    1.0
}

fn default_do_sample() -> bool {
    true
}

fn default_top_p() -> f32 {
    0.8
}

fn default_top_k() -> u32 {
    30
}

fn default_temperature() -> f32 {
    1.0
}

fn default_repetition_penalty() -> f32 {
    10.0
}

fn default_max_mel_tokens() -> u32 {
    600
}

/// Body of `POST /synthesize`
///
/// Numeric effect values are accepted as-is here and normalized by
/// [`crate::validate::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Text to synthesize
    pub text: String,
    /// File name of the reference voice inside the reference library
    #[serde(alias = "referenceAudio")]
    pub reference_audio: String,
    /// "mp3" or "wav"; anything else becomes mp3
    #[serde(default = "default_output_format", alias = "outputFormat")]
    pub output_format: String,
    /// Pitch shift in semitones
    #[serde(default, alias = "pitchShift")]
    pub pitch_shift: f32,
    /// Playback speed multiplier
    #[serde(default = "default_speed_rate", alias = "speedRate")]
    pub speed_rate: f32,
    /// Volume gain in dB
    #[serde(default, alias = "volumeGain")]
    pub volume_gain: f32,
    /// "fast" or "normal"
    #[serde(default = "default_infer_mode", alias = "inferMode")]
    pub infer_mode: String,
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default = "default_max_mel_tokens")]
    pub max_mel_tokens: u32,
}

impl SynthesisRequest {
    /// Create a request with default knobs
    pub fn new(text: impl Into<String>, reference_audio: impl Into<String>) -> Self {
        let params = GenerationParams::default();
        Self {
            text: text.into(),
            reference_audio: reference_audio.into(),
            output_format: default_output_format(),
            pitch_shift: 0.0,
            speed_rate: 1.0,
            volume_gain: 0.0,
            infer_mode: default_infer_mode(),
            do_sample: params.do_sample,
            top_p: params.top_p,
            top_k: params.top_k,
            temperature: params.temperature,
            repetition_penalty: params.repetition_penalty,
            max_mel_tokens: params.max_mel_tokens,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    pub fn with_pitch_shift(mut self, semitones: f32) -> Self {
        self.pitch_shift = semitones;
        self
    }

    pub fn with_speed_rate(mut self, rate: f32) -> Self {
        self.speed_rate = rate;
        self
    }

    pub fn with_volume_gain(mut self, gain_db: f32) -> Self {
        self.volume_gain = gain_db;
        self
    }

    pub fn with_infer_mode(mut self, mode: impl Into<String>) -> Self {
        self.infer_mode = mode.into();
        self
    }

    /// Generation parameters as carried by this request
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            do_sample: self.do_sample,
            top_p: self.top_p,
            top_k: self.top_k,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            max_mel_tokens: self.max_mel_tokens,
        }
    }
}

/// Body returned by `POST /synthesize`
///
/// A request that reached the engine always produces one of these, even
/// when synthesis failed; check `success` rather than only the status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub success: bool,
    pub message: String,
    pub audio_url: Option<String>,
    /// Duration of the final artifact in seconds, when it could be probed
    pub duration: Option<f64>,
    /// Wall-clock time spent on the request in seconds
    pub processing_time: f64,
    /// Post-processing steps that were requested but skipped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SynthesisResult {
    pub fn succeeded(
        audio_url: String,
        duration: Option<f64>,
        processing_time: f64,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            message: "speech synthesis succeeded".to_string(),
            audio_url: Some(audio_url),
            duration,
            processing_time,
            warnings,
        }
    }

    pub fn failed(cause: impl fmt::Display, processing_time: f64) -> Self {
        Self {
            success: false,
            message: format!("speech synthesis failed: {cause}"),
            audio_url: None,
            duration: None,
            processing_time,
            warnings: Vec::new(),
        }
    }
}

/// One entry of `GET /reference_audios`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAudioInfo {
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, seconds since the unix epoch
    pub modified: f64,
}

/// Body returned by `GET /reference_audios`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAudioList {
    pub reference_audios: Vec<ReferenceAudioInfo>,
}

/// Generic acknowledgement body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            filename: None,
        }
    }
}

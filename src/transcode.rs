//! Container transcoding and duration probing
//!
//! MP3 encoding is delegated to an external `ffmpeg` with libmp3lame at a
//! constant bitrate. Decoding (for probing and for MP3 → WAV) goes through
//! symphonia. Transcoding is fail-open: on any error the original file is
//! kept and a warning is returned.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::effects::{StageWarning, Step};
use crate::protocol::OutputFormat;
use crate::waveform::{wav_duration, Waveform, WaveformError};

/// Samples per MPEG-1 Layer III frame
pub const MP3_FRAME_SAMPLES: usize = 1152;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("ffmpeg exited with {status}: {stderr}")]
    Encoder { status: String, stderr: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Waveform(#[from] WaveformError),
}

impl From<SymphoniaError> for TranscodeError {
    fn from(err: SymphoniaError) -> Self {
        TranscodeError::Decode(err.to_string())
    }
}

/// Encoder settings
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// ffmpeg executable name or path
    pub ffmpeg_path: String,
    /// Constant MP3 bitrate in kbps
    pub mp3_bitrate_kbps: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            mp3_bitrate_kbps: 192,
        }
    }
}

/// Where the artifact ended up and why, if it was not converted
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub path: PathBuf,
    pub warning: Option<StageWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    config: TranscodeConfig,
}

impl Transcoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// True when the configured ffmpeg binary can be found
    pub fn ffmpeg_available(&self) -> bool {
        which::which(&self.config.ffmpeg_path).is_ok()
    }

    /// Convert `path` to `target`, returning the path of the converted file.
    ///
    /// Files already in the target container are returned unchanged. A
    /// successful conversion removes the source file (best-effort).
    pub fn transcode(&self, path: &Path, target: OutputFormat) -> TranscodeOutcome {
        if OutputFormat::from_path(path) == Some(target) {
            return TranscodeOutcome {
                path: path.to_path_buf(),
                warning: None,
            };
        }

        let output = path.with_extension(target.extension());
        let result = match target {
            OutputFormat::Mp3 => self.encode_mp3(path, &output),
            OutputFormat::Wav => decode_to_wav(path, &output),
        };

        match result {
            Ok(()) => {
                info!(from = %path.display(), to = %output.display(), "transcoded audio");
                if output != path {
                    if let Err(e) = std::fs::remove_file(path) {
                        debug!(
                            path = %path.display(),
                            error = %e,
                            "could not remove transcode source"
                        );
                    }
                }
                TranscodeOutcome {
                    path: output,
                    warning: None,
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    format = %target,
                    error = %e,
                    "transcode failed, keeping original"
                );
                let _ = std::fs::remove_file(&output);
                TranscodeOutcome {
                    path: path.to_path_buf(),
                    warning: Some(StageWarning::new(Step::Transcode, e)),
                }
            }
        }
    }

    fn encode_mp3(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let out = Command::new(&self.config.ffmpeg_path)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-b:a")
            .arg(format!("{}k", self.config.mp3_bitrate_kbps))
            .arg(output)
            .output()
            .map_err(|source| TranscodeError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(TranscodeError::Encoder {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn open_format(
    path: &Path,
) -> Result<Box<dyn symphonia::core::formats::FormatReader>, TranscodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &format_opts,
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

/// Decode any supported container into an interleaved waveform
pub fn decode_file(path: &Path) -> Result<Waveform, TranscodeError> {
    let mut format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TranscodeError::Decode("no audio track".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "skipping undecodable packet");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(TranscodeError::Decode("unknown sample format".to_string()));
    }
    let mut wave = Waveform::new(samples, sample_rate, channels);
    wave.path = Some(path.to_path_buf());
    Ok(wave)
}

fn decode_to_wav(input: &Path, output: &Path) -> Result<(), TranscodeError> {
    let wave = decode_file(input)?;
    wave.write_wav(output)?;
    Ok(())
}

/// Duration in seconds of an audio file, or `None` when it cannot be read.
pub fn probe_duration(path: &Path) -> Option<f64> {
    let result = if OutputFormat::from_path(path) == Some(OutputFormat::Wav) {
        wav_duration(path).map_err(TranscodeError::from)
    } else {
        probe_container_duration(path)
    };
    match result {
        Ok(secs) if secs > 0.0 => Some(secs),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "duration probe failed");
            None
        }
    }
}

fn probe_container_duration(path: &Path) -> Result<f64, TranscodeError> {
    {
        let format = open_format(path)?;
        if let Some(track) = format.default_track() {
            let params = &track.codec_params;
            if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
                if rate > 0 {
                    return Ok(frames as f64 / rate as f64);
                }
            }
        }
    }
    // No frame count in the header; decode everything.
    Ok(decode_file(path)?.duration_secs())
}

/// Sample rate, channel count and duration of an audio file
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

/// Inspect any supported file, decoding it if needed.
pub fn inspect(path: &Path) -> Result<AudioInfo, TranscodeError> {
    let wave = if OutputFormat::from_path(path) == Some(OutputFormat::Wav) {
        Waveform::read_wav(path)?
    } else {
        decode_file(path)?
    };
    Ok(AudioInfo {
        sample_rate: wave.sample_rate,
        channels: wave.channels,
        duration_secs: wave.duration_secs(),
    })
}

//! In-memory PCM audio and WAV file I/O

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaveformError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("invalid waveform: {0}")]
    Invalid(String),
}

/// Interleaved f32 PCM with its format
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// File this waveform was read from or last written to
    pub path: Option<PathBuf>,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
            path: None,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Same samples, new nominal rate. Changes both pitch and duration on playback.
    pub fn retagged(&self, sample_rate: u32) -> Waveform {
        Waveform {
            samples: self.samples.clone(),
            sample_rate,
            channels: self.channels,
            path: None,
        }
    }

    /// Split interleaved samples into one buffer per channel
    pub fn to_planar(&self) -> Vec<Vec<f32>> {
        let channels = self.channels as usize;
        let mut planar = vec![Vec::with_capacity(self.frames()); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (ch, &value) in frame.iter().enumerate() {
                planar[ch].push(value);
            }
        }
        planar
    }

    /// Build from per-channel buffers; all channels are truncated to the shortest.
    pub fn from_planar(planar: &[Vec<f32>], sample_rate: u32) -> Waveform {
        let channels = planar.len().max(1);
        let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for idx in 0..frames {
            for channel in planar {
                samples.push(channel[idx]);
            }
        }
        Waveform::new(samples, sample_rate, channels as u16)
    }

    /// Read a WAV file (integer or float PCM) into memory
    pub fn read_wav(path: impl AsRef<Path>) -> Result<Waveform, WaveformError> {
        let path = path.as_ref();
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(WaveformError::Invalid("zero channels".to_string()));
        }

        let samples = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(Waveform {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            path: Some(path.to_path_buf()),
        })
    }

    /// Write as 16-bit PCM WAV, saturating out-of-range samples
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<(), WaveformError> {
        if self.sample_rate == 0 {
            return Err(WaveformError::Invalid("sample rate is zero".to_string()));
        }
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path.as_ref(), spec)?;
        for &sample in &self.samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Map [-1.0, 1.0] to i16 with saturation
pub fn to_i16(sample: f32) -> i16 {
    let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i32;
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Duration of a WAV file from its header, without decoding samples
pub fn wav_duration(path: impl AsRef<Path>) -> Result<f64, WaveformError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(WaveformError::Invalid("sample rate is zero".to_string()));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

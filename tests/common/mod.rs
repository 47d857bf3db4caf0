//! Shared helpers for integration tests.
//!
//! The engine is replaced by [`ToneEngine`], which writes a sine tone where
//! a real engine would write synthesized speech, and records how many calls
//! overlapped inside it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use voicegate::engine::{EngineError, EngineGate, EngineJob, SpeechEngine};
use voicegate::pipeline::{PipelineConfig, SynthesisPipeline};
use voicegate::references::ReferenceLibrary;
use voicegate::store::ArtifactStore;
use voicegate::waveform::Waveform;

pub const ENGINE_RATE: u32 = 22050;

/// What the mock engine writes to the job's output path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineOutput {
    /// A sine tone of the given length in seconds
    Tone(f64),
    /// Bytes that are not a WAV file
    Corrupt,
    /// Fail the call
    Fail,
    /// Report success without writing anything
    Nothing,
}

pub struct ToneEngine {
    output: EngineOutput,
    delay: Duration,
    redirect: Option<PathBuf>,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    starts: Mutex<Vec<(String, Instant)>>,
}

impl ToneEngine {
    pub fn new(output: EngineOutput) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            redirect: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    /// Write to `path` instead of the job's output path and report that
    pub fn with_redirect(mut self, path: impl Into<PathBuf>) -> Self {
        self.redirect = Some(path.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Most calls ever inside the engine at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Text and start time of every call, in the order calls entered the engine
    pub fn starts(&self) -> Vec<(String, Instant)> {
        self.starts.lock().unwrap().clone()
    }

    fn write(&self, path: &Path) -> Result<(), EngineError> {
        match self.output {
            EngineOutput::Tone(secs) => tone(secs, ENGINE_RATE)
                .write_wav(path)
                .map_err(|e| EngineError::Synthesis(e.to_string())),
            EngineOutput::Corrupt => std::fs::write(path, b"this is not a wav file")
                .map_err(|e| EngineError::Synthesis(e.to_string())),
            EngineOutput::Fail => Err(EngineError::Synthesis("model not loaded".to_string())),
            EngineOutput::Nothing => Ok(()),
        }
    }
}

impl SpeechEngine for ToneEngine {
    fn synthesize(&self, job: &EngineJob) -> Result<PathBuf, EngineError> {
        self.starts
            .lock()
            .unwrap()
            .push((job.text.clone(), Instant::now()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let target = self
            .redirect
            .clone()
            .unwrap_or_else(|| job.output_path.clone());
        let result = self.write(&target);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result.map(|_| target)
    }

    fn name(&self) -> &str {
        "tone"
    }
}

pub fn tone(secs: f64, sample_rate: u32) -> Waveform {
    let frames = (secs * sample_rate as f64) as usize;
    let samples = (0..frames)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.4)
        .collect();
    Waveform::new(samples, sample_rate, 1)
}

/// A pipeline over scratch directories with `voice1.wav` in its library
pub struct Fixture {
    pub dir: TempDir,
    pub engine: Arc<ToneEngine>,
    pub pipeline: SynthesisPipeline,
}

impl Fixture {
    pub fn new(engine: ToneEngine, slots: usize) -> Self {
        Self::with_config(engine, slots, PipelineConfig::default())
    }

    pub fn with_config(engine: ToneEngine, slots: usize, config: PipelineConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let references = ReferenceLibrary::new(dir.path().join("reference_audios"));
        std::fs::create_dir_all(references.dir()).expect("reference dir");
        tone(1.0, 16000)
            .write_wav(references.dir().join("voice1.wav"))
            .expect("reference clip");

        let store = ArtifactStore::new(dir.path().join("outputs").join("api")).expect("store");
        let engine = Arc::new(engine);
        let gate = EngineGate::new(engine.clone(), slots);
        let pipeline = SynthesisPipeline::new(gate, references, Arc::new(store), config);
        Self {
            dir,
            engine,
            pipeline,
        }
    }

    /// On-disk path of an artifact URL such as `/audio/tts_1.wav`
    pub fn artifact_path(&self, url: &str) -> PathBuf {
        let name = url.strip_prefix("/audio/").expect("audio url");
        self.pipeline.store().output_dir().join(name)
    }

    /// Names of every file in the output directory
    pub fn output_files(&self) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(self.pipeline.store().output_dir())
            .expect("output dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn ffmpeg_available() -> bool {
    which::which("ffmpeg").is_ok()
}

pub mod audio_validation {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let s = samples.iter().map(|v| v * v).sum::<f32>() / samples.len() as f32;
        s.sqrt()
    }

    pub fn peak(samples: &[f32]) -> f32 {
        samples.iter().map(|v| v.abs()).fold(0.0f32, f32::max)
    }

    pub fn validate_audio(samples: &[f32]) {
        assert!(!samples.is_empty(), "audio is empty");
        for (i, &v) in samples.iter().enumerate() {
            assert!(v.is_finite(), "non-finite sample at {i}: {v}");
        }
        let p = peak(samples);
        assert!(p <= 1.2, "peak too large: {p}");
        let r = rms(samples);
        assert!(r >= 1e-4, "rms too small (silence?): {r}");
    }
}

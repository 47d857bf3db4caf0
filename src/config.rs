//! Configuration and CLI for the voicegate server

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::engine::{CommandEngine, EngineGate};
use crate::pipeline::{PipelineConfig, SynthesisPipeline};
use crate::protocol::SynthesisRequest;
use crate::references::ReferenceLibrary;
use crate::store::{ArtifactStore, StoreError};
use crate::transcode::TranscodeConfig;

/// Command line arguments with subcommands
#[derive(Parser, Debug, Clone)]
#[command(name = "voicegate")]
#[command(about = "Voice-cloning text-to-speech server with audio post-processing")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Used for serve when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// Serve arguments, whether given to `serve` or at the top level
    pub fn serve_args(&self) -> ServeArgs {
        match &self.command {
            Some(Commands::Serve(args)) => args.clone(),
            _ => self.serve.clone(),
        }
    }

    pub fn log_level(&self) -> &str {
        match &self.command {
            Some(Commands::Serve(args)) => &args.pipeline.log,
            Some(Commands::Synthesize(args)) => &args.pipeline.log,
            Some(Commands::Refs(args)) => &args.log,
            None => &self.serve.pipeline.log,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Synthesize one request locally and print the result as JSON
    Synthesize(SynthesizeArgs),
    /// Manage the reference audio library
    Refs(RefsArgs),
}

/// Engine, storage and encoder settings shared by `serve` and `synthesize`
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Directory holding reference voice clips
    #[arg(long, env = "VOICEGATE_REFERENCE_DIR", default_value = "reference_audios")]
    pub reference_dir: PathBuf,

    /// Directory generated audio is written to
    #[arg(long, env = "VOICEGATE_OUTPUT_DIR", default_value = "outputs/api")]
    pub output_dir: PathBuf,

    /// Engine program; receives each job as JSON on stdin
    #[arg(long, env = "VOICEGATE_ENGINE", default_value = "voicegate-engine")]
    pub engine_program: String,

    /// Extra argument passed to the engine program (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Maximum engine calls in flight
    #[arg(long, env = "VOICEGATE_ENGINE_SLOTS", default_value_t = 1)]
    pub engine_slots: usize,

    /// ffmpeg executable used for MP3 encoding
    #[arg(long, env = "VOICEGATE_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// MP3 bitrate in kbps
    #[arg(long, default_value_t = 192)]
    pub mp3_bitrate: u32,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl PipelineArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            transcode: TranscodeConfig {
                ffmpeg_path: self.ffmpeg.clone(),
                mp3_bitrate_kbps: self.mp3_bitrate,
            },
            ..PipelineConfig::default()
        }
    }

    /// Wire up the engine, libraries and store described by these arguments.
    pub fn build_pipeline(&self) -> Result<SynthesisPipeline, StoreError> {
        let engine = CommandEngine::new(self.engine_program.clone())
            .with_args(self.engine_args.iter().cloned());
        let gate = EngineGate::new(Arc::new(engine), self.engine_slots);
        let store = ArtifactStore::new(&self.output_dir)?;
        Ok(SynthesisPipeline::new(
            gate,
            ReferenceLibrary::new(&self.reference_dir),
            Arc::new(store),
            self.pipeline_config(),
        ))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host address to bind to
    #[arg(long, env = "VOICEGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "VOICEGATE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Skip the startup banner
    #[arg(long)]
    pub quiet: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SynthesizeArgs {
    /// Text to synthesize
    #[arg(short, long)]
    pub text: String,

    /// Reference clip name in the reference directory
    #[arg(short, long)]
    pub reference: String,

    /// Output format (mp3 or wav)
    #[arg(short, long, default_value = "mp3")]
    pub format: String,

    /// Pitch shift in semitones (-12 to 12)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub pitch_shift: f32,

    /// Speed multiplier (0.5 to 2.0)
    #[arg(long, default_value_t = 1.0)]
    pub speed_rate: f32,

    /// Volume gain in dB
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub volume_gain: f32,

    /// Inference mode (fast or normal)
    #[arg(long, default_value = "fast")]
    pub infer_mode: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl SynthesizeArgs {
    pub fn to_request(&self) -> SynthesisRequest {
        SynthesisRequest::new(self.text.clone(), self.reference.clone())
            .with_format(self.format.clone())
            .with_pitch_shift(self.pitch_shift)
            .with_speed_rate(self.speed_rate)
            .with_volume_gain(self.volume_gain)
            .with_infer_mode(self.infer_mode.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct RefsArgs {
    #[command(subcommand)]
    pub action: RefsCommand,

    /// Directory holding reference voice clips
    #[arg(long, env = "VOICEGATE_REFERENCE_DIR", default_value = "reference_audios")]
    pub reference_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "warn")]
    pub log: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RefsCommand {
    /// List reference clips with their format
    List,
    /// Copy an audio file into the library
    Add {
        /// File to copy
        source: PathBuf,
        /// Name to store it under (defaults to the source file name)
        #[arg(long)]
        name: Option<String>,
        /// Replace an existing clip with the same name
        #[arg(long)]
        force: bool,
    },
    /// Delete a reference clip
    Remove { name: String },
    /// Rename a reference clip
    Rename { old: String, new: String },
}

/// Initialize tracing with given log level
pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load environment variables from .env file
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["voicegate", "serve"]);
        assert!(matches!(cli.command, Some(Commands::Serve(_))));
    }

    #[test]
    fn test_serve_args_defaults() {
        let cli = Cli::parse_from(["voicegate", "serve"]);
        let args = cli.serve_args();
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, 8000);
        assert_eq!(args.pipeline.engine_slots, 1);
        assert_eq!(args.pipeline.mp3_bitrate, 192);
        assert_eq!(args.pipeline.output_dir, PathBuf::from("outputs/api"));
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::parse_from(["voicegate", "--port", "9000", "--engine-slots", "2"]);
        assert!(cli.command.is_none());
        let args = cli.serve_args();
        assert_eq!(args.port, 9000);
        assert_eq!(args.pipeline.engine_slots, 2);
    }

    #[test]
    fn test_engine_args_repeat() {
        let cli = Cli::parse_from([
            "voicegate",
            "serve",
            "--engine-program",
            "python3",
            "--engine-arg",
            "engine.py",
            "--engine-arg",
            "--fp16",
        ]);
        let args = cli.serve_args();
        assert_eq!(args.pipeline.engine_program, "python3");
        assert_eq!(args.pipeline.engine_args, vec!["engine.py", "--fp16"]);
    }

    #[test]
    fn test_synthesize_args_to_request() {
        let cli = Cli::parse_from([
            "voicegate",
            "synthesize",
            "--text",
            "hello",
            "--reference",
            "voice1.wav",
            "--format",
            "wav",
            "--pitch-shift",
            "-3",
            "--volume-gain",
            "2.5",
        ]);
        let args = match cli.command {
            Some(Commands::Synthesize(a)) => a,
            _ => panic!("expected synthesize command"),
        };
        let req = args.to_request();
        assert_eq!(req.text, "hello");
        assert_eq!(req.reference_audio, "voice1.wav");
        assert_eq!(req.output_format, "wav");
        assert_eq!(req.pitch_shift, -3.0);
        assert_eq!(req.speed_rate, 1.0);
        assert_eq!(req.volume_gain, 2.5);
    }

    #[test]
    fn test_refs_subcommands() {
        let cli = Cli::parse_from(["voicegate", "refs", "rename", "a.wav", "b.wav"]);
        match cli.command {
            Some(Commands::Refs(RefsArgs {
                action: RefsCommand::Rename { old, new },
                ..
            })) => {
                assert_eq!(old, "a.wav");
                assert_eq!(new, "b.wav");
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["voicegate", "refs", "add", "clip.wav", "--force"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Refs(RefsArgs {
                action: RefsCommand::Add { force: true, .. },
                ..
            }))
        ));
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_pipeline_config_from_args() {
        let cli = Cli::parse_from([
            "voicegate",
            "serve",
            "--ffmpeg",
            "/opt/ffmpeg",
            "--mp3-bitrate",
            "128",
        ]);
        let config = cli.serve_args().pipeline.pipeline_config();
        assert_eq!(config.transcode.ffmpeg_path, "/opt/ffmpeg");
        assert_eq!(config.transcode.mp3_bitrate_kbps, 128);
    }
}

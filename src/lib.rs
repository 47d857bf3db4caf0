pub mod cli_style;
pub mod config;
pub mod effects;
pub mod engine;
pub mod pipeline;
pub mod protocol;
pub mod references;
pub mod server;
pub mod store;
pub mod transcode;
pub mod validate;
pub mod waveform;

pub use config::{Cli, Commands, PipelineArgs, RefsArgs, ServeArgs, SynthesizeArgs};
pub use effects::{EffectsChain, StageWarning, Step};
pub use engine::{CommandEngine, EngineError, EngineGate, EngineJob, SpeechEngine};
pub use pipeline::{PipelineConfig, PipelineError, Stage, SynthesisPipeline};
pub use protocol::{OutputFormat, SynthesisRequest, SynthesisResult};
pub use references::{ReferenceError, ReferenceLibrary};
pub use server::AppState;
pub use store::{ArtifactStore, AudioArtifactRecord, StoreError};
pub use transcode::{TranscodeConfig, Transcoder};
pub use validate::{validate, EffectSettings, ValidatedRequest, ValidationError};
pub use waveform::Waveform;

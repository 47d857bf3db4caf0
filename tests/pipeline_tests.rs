//! Integration tests for the synthesis pipeline.
//!
//! The engine is mocked; effects, transcoding and storage are real.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{audio_validation, ffmpeg_available, EngineOutput, Fixture, ToneEngine};

use voicegate::pipeline::{PipelineConfig, PipelineError};
use voicegate::protocol::SynthesisRequest;
use voicegate::transcode::{decode_file, TranscodeConfig};
use voicegate::waveform::Waveform;

fn hello() -> SynthesisRequest {
    SynthesisRequest::new("hello", "voice1.wav")
        .with_format("mp3")
        .with_pitch_shift(0.0)
        .with_speed_rate(1.0)
        .with_volume_gain(0.0)
}

fn assert_artifact_url(url: &str, extension: &str) {
    let name = url.strip_prefix("/audio/tts_").expect("artifact url prefix");
    let stem = name
        .strip_suffix(&format!(".{extension}"))
        .unwrap_or_else(|| panic!("{url} should end with .{extension}"));
    let millis = stem.split('_').next().unwrap_or_default();
    assert!(
        !millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit()),
        "unexpected id in {url}"
    );
}

#[tokio::test]
async fn test_unknown_reference_is_structural() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(1.0)), 1);
    let req = SynthesisRequest::new("hello", "ghost.wav");

    let err = fx.pipeline.handle(&req).await.unwrap_err();
    assert!(matches!(err, PipelineError::ReferenceNotFound(ref n) if n == "ghost.wav"));
    assert!(err.is_structural());
    assert_eq!(fx.engine.completed(), 0, "engine must not be called");
    assert!(fx.output_files().is_empty());
}

#[tokio::test]
async fn test_empty_text_is_structural() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(1.0)), 1);
    let err = fx
        .pipeline
        .handle(&SynthesisRequest::new("", "voice1.wav"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_hello_as_wav() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(1.0)), 1);
    let result = fx.pipeline.handle(&hello().with_format("wav")).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert!(result.warnings.is_empty());
    let url = result.audio_url.as_deref().unwrap();
    assert_artifact_url(url, "wav");
    assert!((result.duration.unwrap() - 1.0).abs() < 1e-6);
    assert!(result.processing_time > 0.0);

    let wave = Waveform::read_wav(fx.artifact_path(url)).unwrap();
    audio_validation::validate_audio(&wave.samples);
}

#[tokio::test]
#[ignore = "requires ffmpeg with libmp3lame"]
async fn test_hello_as_mp3() {
    assert!(ffmpeg_available(), "ffmpeg not found on PATH");
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(1.0)), 1);
    let result = fx.pipeline.handle(&hello()).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    let url = result.audio_url.as_deref().unwrap();
    assert_artifact_url(url, "mp3");
    assert!(result.duration.unwrap() > 0.0);
    assert!(result.processing_time > 0.0);

    // The intermediate wav is gone; only the mp3 remains.
    assert_eq!(fx.output_files().len(), 1);
    let decoded = decode_file(&fx.artifact_path(url)).unwrap();
    audio_validation::validate_audio(&decoded.samples);
}

#[tokio::test]
async fn test_missing_encoder_keeps_wav_with_warning() {
    let config = PipelineConfig {
        transcode: TranscodeConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            ..TranscodeConfig::default()
        },
        ..PipelineConfig::default()
    };
    let fx = Fixture::with_config(ToneEngine::new(EngineOutput::Tone(1.0)), 1, config);
    let result = fx.pipeline.handle(&hello()).await.unwrap();

    assert!(result.success);
    assert_artifact_url(result.audio_url.as_deref().unwrap(), "wav");
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("transcode skipped"));
}

#[tokio::test]
async fn test_engine_failure_is_a_failed_result() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Fail), 1);
    let result = fx.pipeline.handle(&hello()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.message, "speech synthesis failed: model not loaded");
    assert!(result.audio_url.is_none());
    assert!(result.duration.is_none());
    assert!(result.processing_time >= 0.0);
}

#[tokio::test]
async fn test_identity_effects_leave_engine_output_untouched() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(0.8)), 1);
    let result = fx.pipeline.handle(&hello().with_format("wav")).await.unwrap();

    let produced = std::fs::read(fx.artifact_path(result.audio_url.as_deref().unwrap())).unwrap();
    let reference = tempfile::NamedTempFile::new().unwrap();
    common::tone(0.8, common::ENGINE_RATE)
        .write_wav(reference.path())
        .unwrap();
    assert_eq!(produced, std::fs::read(reference.path()).unwrap());
    assert!(!result.audio_url.unwrap().contains("_processed"));
}

#[tokio::test]
async fn test_effects_replace_raw_output() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(1.0)), 1);
    let result = fx
        .pipeline
        .handle(&hello().with_format("wav").with_pitch_shift(12.0))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    let url = result.audio_url.unwrap();
    assert!(url.ends_with("_processed.wav"), "{url}");
    assert_eq!(fx.output_files().len(), 1, "raw engine output removed");

    // An octave up halves the duration and lands on the fixed pitch rate.
    let wave = Waveform::read_wav(fx.artifact_path(&url)).unwrap();
    assert_eq!(wave.sample_rate, 22050);
    assert!((result.duration.unwrap() - 0.5).abs() < 0.05);
}

#[tokio::test]
async fn test_corrupt_engine_output_fails_open() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Corrupt), 1);
    let result = fx
        .pipeline
        .handle(&hello().with_format("wav").with_volume_gain(6.0))
        .await
        .unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("load skipped"));
    assert!(result.duration.is_none());

    let url = result.audio_url.unwrap();
    assert!(!url.contains("_processed"));
    assert_eq!(
        std::fs::read(fx.artifact_path(&url)).unwrap(),
        b"this is not a wav file"
    );
}

#[tokio::test]
async fn test_too_short_speedup_fails_open() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(0.2)), 1);
    let result = fx
        .pipeline
        .handle(&hello().with_format("wav").with_speed_rate(1.5))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with("tempo skipped"), "{:?}", result.warnings);
    assert!((result.duration.unwrap() - 0.2).abs() < 1e-3);
}

#[tokio::test]
async fn test_out_of_range_speed_is_clamped() {
    let fx = Fixture::new(ToneEngine::new(EngineOutput::Tone(2.0)), 1);
    let result = fx
        .pipeline
        .handle(&hello().with_format("wav").with_speed_rate(10.0))
        .await
        .unwrap();

    // Clamped to 2.0: roughly half the length.
    assert!(result.success);
    let secs = result.duration.unwrap();
    assert!(secs > 0.85 && secs < 1.25, "duration {secs}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_slot_serializes_engine_calls() {
    let engine = ToneEngine::new(EngineOutput::Tone(0.3)).with_delay(Duration::from_millis(40));
    let fx = Arc::new(Fixture::new(engine, 1));

    let tasks: Vec<_> = (0..6)
        .map(|n| {
            let fx = fx.clone();
            tokio::spawn(async move {
                let req = SynthesisRequest::new(format!("request {n}"), "voice1.wav")
                    .with_format("wav");
                fx.pipeline.handle(&req).await.unwrap()
            })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;
    let mut urls = Vec::new();
    for result in results {
        let result = result.unwrap();
        assert!(result.success);
        urls.push(result.audio_url.unwrap());
    }
    urls.sort();
    urls.dedup();

    assert_eq!(urls.len(), 6, "every request gets its own artifact");
    assert_eq!(fx.engine.peak(), 1);
    assert_eq!(fx.engine.completed(), 6);
    assert_eq!(fx.pipeline.gate().available_slots(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_request_holds_slot_until_engine_returns() {
    let engine = ToneEngine::new(EngineOutput::Tone(0.3)).with_delay(Duration::from_millis(300));
    let fx = Fixture::new(engine, 1);

    let req = hello().with_format("wav");
    let abandoned = tokio::time::timeout(Duration::from_millis(50), fx.pipeline.handle(&req)).await;
    assert!(abandoned.is_err(), "first request should time out");
    assert_eq!(fx.pipeline.gate().available_slots(), 0);

    let result = fx.pipeline.handle(&req).await.unwrap();
    assert!(result.success);
    assert_eq!(fx.engine.peak(), 1);
    assert_eq!(fx.engine.completed(), 2);
    assert_eq!(fx.pipeline.gate().available_slots(), 1);
}

#[tokio::test]
async fn test_engine_output_outside_store_is_moved_in() {
    let elsewhere = tempfile::tempdir().unwrap();
    let stray = elsewhere.path().join("engine_out.wav");
    let engine = ToneEngine::new(EngineOutput::Tone(1.0)).with_redirect(&stray);
    let fx = Fixture::new(engine, 1);

    let result = fx.pipeline.handle(&hello().with_format("wav")).await.unwrap();
    assert!(result.success, "{}", result.message);
    let url = result.audio_url.unwrap();
    assert_artifact_url(&url, "wav");

    let name = url.strip_prefix("/audio/").unwrap();
    let stored = fx.pipeline.store().get(name).await.unwrap();
    assert!(!stored.bytes.is_empty());
    assert!(!stray.exists(), "engine file moved, not copied");
    assert_eq!(fx.output_files(), vec![name.to_string()]);
}

#[tokio::test]
async fn test_engine_output_that_vanished_is_a_failed_result() {
    let elsewhere = tempfile::tempdir().unwrap();
    let stray = elsewhere.path().join("engine_out.wav");
    let engine = ToneEngine::new(EngineOutput::Nothing).with_redirect(&stray);
    let fx = Fixture::new(engine, 1);

    let result = fx.pipeline.handle(&hello().with_format("wav")).await.unwrap();
    assert!(!result.success);
    assert!(result.message.contains("engine produced no audio"), "{}", result.message);
    assert!(result.audio_url.is_none());
    assert!(fx.output_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_post_processing_overlaps_next_engine_call() {
    // Slowing four seconds of audio keeps each request in effects well after
    // its engine call has returned.
    let engine = ToneEngine::new(EngineOutput::Tone(4.0)).with_delay(Duration::from_millis(30));
    let fx = Arc::new(Fixture::new(engine, 1));

    let mut tasks = Vec::new();
    for n in 0..3 {
        let fx = fx.clone();
        tasks.push(tokio::spawn(async move {
            let req = SynthesisRequest::new(format!("request {n}"), "voice1.wav")
                .with_format("wav")
                .with_speed_rate(0.5);
            let result = fx.pipeline.handle(&req).await.unwrap();
            (result, Instant::now())
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut finished = Vec::new();
    for task in futures::future::join_all(tasks).await {
        let (result, at) = task.unwrap();
        assert!(result.success, "{}", result.message);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        finished.push(at);
    }

    let starts = fx.engine.starts();
    let order: Vec<_> = starts.iter().map(|(text, _)| text.as_str()).collect();
    assert_eq!(order, ["request 0", "request 1", "request 2"]);
    assert_eq!(fx.engine.peak(), 1);

    for k in 0..2 {
        assert!(
            starts[k + 1].1 < finished[k],
            "engine call {} waited for request {k} to finish post-processing",
            k + 1
        );
    }
}

//! HTTP server for voicegate
//!
//! JSON API over axum: synthesis, reference audio management and retrieval
//! of generated artifacts. Request errors are answered with an HTTP error
//! status and `{"error": ...}`; syntheses that fail after reaching the engine
//! are answered with 200 and `success: false`.

use std::{future::Future, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    pipeline::{PipelineError, SynthesisPipeline},
    protocol::{MessageResponse, ReferenceAudioList, SynthesisRequest, SynthesisResult},
    references::ReferenceError,
    store::StoreError,
};

/// Largest accepted request body (reference uploads)
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SynthesisPipeline>,
}

impl AppState {
    pub fn new(pipeline: SynthesisPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error answered as `{"error": message}` with a matching status
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, error = %self, "request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(e) => ApiError::BadRequest(e.to_string()),
            e @ PipelineError::ReferenceNotFound(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidName(_) => ApiError::BadRequest(err.to_string()),
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReferenceError> for ApiError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::InvalidName(_) | ReferenceError::UnsupportedFormat(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ReferenceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ReferenceError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            ReferenceError::Io(_) | ReferenceError::Inspect { .. } => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/reference_audios", get(list_reference_audios))
        .route("/upload_reference_audio", post(upload_reference_audio))
        .route("/synthesize", post(synthesize))
        .route("/audio/:filename", get(get_audio).delete(delete_audio))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Start the server and serve requests indefinitely
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    serve_with_shutdown(listener, state, std::future::pending()).await
}

/// Start the server with graceful shutdown support
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    info!("starting axum server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new("voicegate TTS server is running"))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    engine: String,
    engine_slots: usize,
    ffmpeg: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pipeline = &state.pipeline;
    Json(HealthResponse {
        status: "healthy",
        engine: pipeline.gate().engine_name().to_string(),
        engine_slots: pipeline.gate().capacity(),
        ffmpeg: pipeline.transcoder().ffmpeg_available(),
    })
}

async fn list_reference_audios(
    State(state): State<AppState>,
) -> Result<Json<ReferenceAudioList>, ApiError> {
    let references = state.pipeline.references().clone();
    let reference_audios = tokio::task::spawn_blocking(move || references.list())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(ReferenceAudioList { reference_audios }))
}

async fn upload_reference_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("upload is missing a file name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let references = state.pipeline.references().clone();
        let name = filename.clone();
        tokio::task::spawn_blocking(move || references.save(&name, &bytes))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??;

        return Ok(Json(MessageResponse {
            message: format!("reference audio {filename} uploaded"),
            filename: Some(filename),
        }));
    }
    Err(ApiError::BadRequest("missing multipart field `file`".to_string()))
}

async fn synthesize(
    State(state): State<AppState>,
    payload: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Json<SynthesisResult>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "malformed synthesis request");
        ApiError::BadRequest(e.body_text())
    })?;
    let result = state.pipeline.handle(&request).await?;
    Ok(Json(result))
}

async fn get_audio(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let audio = state.pipeline.store().get(&filename).await?;
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        [
            (header::CONTENT_TYPE, audio.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        audio.bytes,
    )
        .into_response())
}

async fn delete_audio(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.pipeline.store().delete(&filename).await?;
    Ok(Json(MessageResponse::new(format!(
        "audio file {filename} deleted"
    ))))
}

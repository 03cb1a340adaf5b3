use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{status_for, ErrorBody};
use crate::models::{Identification, IdentificationEntry};
use crate::pipeline::backfill::{self, BackfillOptions, DEFAULT_BATCH_SIZE};
use crate::pipeline::identify::{self, DEFAULT_THRESHOLD};
use crate::pipeline::PipelineError;
use crate::AppState;

const ALLOWED_UPLOAD_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IdentifyResponse {
    pub faces_detected: usize,
    pub results: Vec<IdentificationEntry>,
    pub execution_time_seconds: f64,
}

/// Multipart body of the upload endpoints (for the API document only).
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// Image to identify
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// Minimum cosine similarity for a match, 0..=1 (default 0.85). Ignored by `/detect-faces/`.
    pub threshold: Option<f32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DetectQuery {
    /// Minimum cosine similarity for a match, 0..=1 (default 0.85)
    pub threshold: Option<f32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PipelineQuery {
    /// Catalog rows fetched per page (default 1000)
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PipelineRunResponse {
    pub status: String,
    pub message: String,
    pub processed: usize,
    pub skipped: usize,
}

struct Upload {
    bytes: Bytes,
    content_type: Option<String>,
    threshold: Option<String>,
}

impl Upload {
    fn threshold(&self) -> Result<f32, PipelineError> {
        match self.threshold.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_THRESHOLD),
            Some(raw) => raw
                .parse::<f32>()
                .map_err(|_| PipelineError::BadInput(format!("threshold must be a number, got {:?}", raw))),
        }
    }

    fn has_allowed_type(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ALLOWED_UPLOAD_TYPES.iter().any(|t| t.eq_ignore_ascii_case(ct.trim())))
            .unwrap_or(false)
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, PipelineError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        PipelineError::BadInput(format!("malformed multipart body: {}", e))
    };
    let mut bytes = None;
    let mut content_type = None;
    let mut threshold = None;
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                content_type = field.content_type().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(malformed)?);
            }
            Some("threshold") => threshold = Some(field.text().await.map_err(malformed)?),
            _ => {}
        }
    }
    let bytes = bytes.ok_or_else(|| PipelineError::BadInput("missing multipart field \"file\"".to_string()))?;
    Ok(Upload { bytes, content_type, threshold })
}

async fn run_identification(state: Arc<AppState>, bytes: Bytes, threshold: f32) -> Result<Identification, PipelineError> {
    tokio::task::spawn_blocking(move || identify::process(&state.models, state.catalog.as_ref(), &bytes, threshold))
        .await
        .map_err(|e| PipelineError::Unexpected(format!("identification task failed: {}", e)))?
}

fn round_secs(secs: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (secs * f).round() / f
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "models_loaded": state.models.is_ready(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (StatusCode::OK, Json(body))
}

/// Identify the actors in an uploaded image
#[utoipa::path(
    post,
    path = "/identify-actor/",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = IdentifyResponse),
        (status = 400, description = "Unreadable image, bad threshold or no faces", body = ErrorBody),
        (status = 500, body = ErrorBody),
        (status = 503, description = "Models or catalog unavailable", body = ErrorBody),
    )
)]
pub async fn identify_actor(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<IdentifyResponse>, PipelineError> {
    let start = Instant::now();
    let upload = read_upload(multipart).await?;
    let threshold = upload.threshold()?;
    info!("Received image for actor identification. Threshold: {}", threshold);

    let identification = run_identification(state, upload.bytes, threshold).await?;
    let elapsed = round_secs(start.elapsed().as_secs_f64(), 2);
    info!("Actor identification completed in {} seconds.", elapsed);
    Ok(Json(IdentifyResponse {
        faces_detected: identification.total_faces,
        results: identification.results,
        execution_time_seconds: elapsed,
    }))
}

/// Identify faces in a JPEG or PNG upload
#[utoipa::path(
    post,
    path = "/detect-faces/",
    params(DetectQuery),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = IdentifyResponse),
        (status = 400, description = "Unsupported file type, bad threshold or no faces", body = ErrorBody),
        (status = 500, body = ErrorBody),
        (status = 503, body = ErrorBody),
    )
)]
pub async fn detect_faces(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DetectQuery>,
    multipart: Multipart,
) -> Result<Json<IdentifyResponse>, PipelineError> {
    let start = Instant::now();
    let threshold = identify::validate_threshold(q.threshold.unwrap_or(DEFAULT_THRESHOLD))?;
    let upload = read_upload(multipart).await?;
    if !upload.has_allowed_type() {
        return Err(PipelineError::BadInput(format!(
            "Unsupported file type {}; upload a JPEG or PNG image.",
            upload.content_type.as_deref().unwrap_or("(none)")
        )));
    }
    info!("Starting face detection pipeline with threshold: {}", threshold);

    let identification = run_identification(state, upload.bytes, threshold).await?;
    Ok(Json(IdentifyResponse {
        faces_detected: identification.total_faces,
        results: identification.results,
        execution_time_seconds: round_secs(start.elapsed().as_secs_f64(), 3),
    }))
}

/// Clears the running flag when the backfill finishes, however it finishes.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Compute and store embeddings for catalog rows that lack one
#[utoipa::path(
    post,
    path = "/run-embedding-pipeline/",
    params(PipelineQuery),
    responses(
        (status = 200, body = PipelineRunResponse),
        (status = 400, body = ErrorBody),
        (status = 409, description = "A run is already in progress"),
        (status = 500, description = "Pipeline failed"),
        (status = 503, description = "Models or catalog unavailable"),
    )
)]
pub async fn run_embedding_pipeline(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PipelineQuery>,
) -> Response {
    let batch_size = q.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 {
        return PipelineError::BadInput("batch_size must be at least 1".to_string()).into_response();
    }
    if state
        .backfill_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "status": "error",
                "message": "Embedding pipeline is already running"
            })),
        )
            .into_response();
    }
    let guard = RunningGuard(state.backfill_running.clone());
    info!("Pipeline triggered via API with batch_size={}", batch_size);

    let options = BackfillOptions { batch_size, page_delay: state.config.backfill_delay };
    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        backfill::run(&state.models, state.catalog.as_ref(), state.images.as_ref(), &options)
    })
    .await
    .map_err(|e| PipelineError::Unexpected(format!("embedding pipeline task failed: {}", e)))
    .and_then(|r| r);

    match result {
        Ok(report) => (
            StatusCode::OK,
            Json(PipelineRunResponse {
                status: "success".to_string(),
                message: "Embedding pipeline completed successfully.".to_string(),
                processed: report.processed,
                skipped: report.skipped,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Embedding pipeline execution failed: {}", e);
            (
                status_for(&e),
                Json(serde_json::json!({
                    "status": "error",
                    "message": "Pipeline execution failed",
                    "details": e.public_message(),
                })),
            )
                .into_response()
        }
    }
}

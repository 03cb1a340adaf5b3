use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::pipeline::PipelineError;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
}

pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::BadInput(_) | PipelineError::NoFacesDetected => StatusCode::BAD_REQUEST,
        PipelineError::NoValidCatalogData | PipelineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        match &self {
            PipelineError::Unexpected(detail) => error!("Unhandled error: {}", detail),
            other if status.is_server_error() => error!("Request failed: {}", other),
            other => warn!("Request rejected: {}", other),
        }
        (status, Json(ErrorBody { message: self.public_message() })).into_response()
    }
}

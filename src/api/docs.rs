use axum::http::header;
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use tracing::error;
use utoipa::OpenApi;

use crate::api::error::ErrorBody;
use crate::api::handlers::{self, IdentifyResponse, PipelineRunResponse, UploadForm};
use crate::models::IdentificationEntry;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Actor Metadata Identifier API",
        version = "1.0",
        description = "Upload an image to identify actors by matching face embeddings against the catalog."
    ),
    paths(handlers::identify_actor, handlers::detect_faces, handlers::run_embedding_pipeline),
    components(schemas(IdentifyResponse, IdentificationEntry, PipelineRunResponse, ErrorBody, UploadForm))
)]
pub struct ApiDoc;

static OPENAPI_JSON: Lazy<String> = Lazy::new(|| match ApiDoc::openapi().to_json() {
    Ok(doc) => doc,
    Err(e) => {
        error!("Failed to render OpenAPI document: {}", e);
        "{}".to_string()
    }
});

pub async fn openapi_json() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], OPENAPI_JSON.as_str())
}

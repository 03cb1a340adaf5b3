use axum::extract::DefaultBodyLimit;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use crate::AppState;
use crate::api::{docs, handlers};

pub fn router(state: Arc<AppState>) -> Router {
    // Browser clients are served from arbitrary origins
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/openapi.json", get(docs::openapi_json))
        .route("/identify-actor/", post(handlers::identify_actor))
        .route("/detect-faces/", post(handlers::detect_faces))
        .route("/run-embedding-pipeline/", post(handlers::run_embedding_pipeline))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

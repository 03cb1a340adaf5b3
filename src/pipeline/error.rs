use thiserror::Error;

use crate::db::{CatalogError, DownloadError};
use crate::pipeline::face::ModelError;

/// Every way an identification or backfill request can fail.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller sent something unusable: bad image, wrong type, out-of-range parameter.
    #[error("{0}")]
    BadInput(String),
    #[error("No faces detected.")]
    NoFacesDetected,
    #[error("No valid embeddings in catalog.")]
    NoValidCatalogData,
    /// A model, the catalog or the image host is missing or unreachable.
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    Unexpected(String),
}

impl PipelineError {
    /// Message safe to hand back to a client. Unexpected failures stay server-side.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Unexpected(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ModelError> for PipelineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotLoaded(_) => PipelineError::UpstreamUnavailable(err.to_string()),
            other => PipelineError::Unexpected(other.to_string()),
        }
    }
}

impl From<CatalogError> for PipelineError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Decode(_) => PipelineError::Unexpected(err.to_string()),
            other => PipelineError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<DownloadError> for PipelineError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Decode(_) => PipelineError::BadInput(err.to_string()),
            other => PipelineError::UpstreamUnavailable(other.to_string()),
        }
    }
}

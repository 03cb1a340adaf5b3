use image::DynamicImage;
use tracing::{info, warn};

use crate::db::Catalog;
use crate::models::{Identification, IdentificationEntry};
use crate::pipeline::error::PipelineError;
use crate::pipeline::face::{l2_normalize, FaceModels};
use crate::pipeline::index::CatalogIndex;

pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// Float slack allowed only at a threshold of 1.0, where an identical
/// embedding may otherwise score a hair below the bar.
const SCORE_EPSILON: f32 = 1e-6;

fn meets_threshold(score: f32, threshold: f32) -> bool {
    score >= threshold || (threshold >= 1.0 && score >= 1.0 - SCORE_EPSILON)
}

pub fn validate_threshold(threshold: f32) -> Result<f32, PipelineError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(PipelineError::BadInput(format!("threshold must be between 0 and 1, got {}", threshold)))
    }
}

pub fn round_score(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let img = image::load_from_memory(bytes).map_err(|e| {
        warn!("Unidentified image format: {}", e);
        PipelineError::BadInput("Invalid image uploaded.".to_string())
    })?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Identify every face in `image_bytes` against the catalog.
///
/// Order of checks: threshold, decode, detection, catalog. An image without
/// faces is reported as such even when the catalog is empty.
pub fn process(
    models: &FaceModels,
    catalog: &dyn Catalog,
    image_bytes: &[u8],
    threshold: f32,
) -> Result<Identification, PipelineError> {
    let threshold = validate_threshold(threshold)?;
    info!("Starting face identification (threshold {})", threshold);

    let image = decode_image(image_bytes)?;
    let faces = models.detector.detect(&image)?;
    if faces.is_empty() {
        warn!("No faces detected in the uploaded image.");
        return Err(PipelineError::NoFacesDetected);
    }
    info!("{} face(s) detected.", faces.len());

    let index = CatalogIndex::build(catalog.fetch_all_embeddings()?);
    if index.is_empty() {
        tracing::error!("No valid embeddings found in catalog.");
        return Err(PipelineError::NoValidCatalogData);
    }
    info!("{} valid embeddings loaded from catalog.", index.len());

    let mut results = Vec::with_capacity(faces.len());
    for (i, face) in faces.iter().enumerate() {
        let mut embedding = models.embedder.embed(face)?;
        l2_normalize(&mut embedding);
        let entry = match index.best_match(&embedding) {
            Some((record, score)) if meets_threshold(score, threshold) => {
                info!("Face {} matched with {:?} (score: {:.3})", i, record.name, score);
                IdentificationEntry::matched(i, record, round_score(score))
            }
            Some((_, score)) => {
                info!("Face {} did not meet the threshold. Best score: {:.3}", i, score);
                IdentificationEntry::unknown(i, round_score(score))
            }
            None => IdentificationEntry::unknown(i, 0.0),
        };
        results.push(entry);
    }

    info!("Face identification completed. {} face(s) processed.", results.len());
    Ok(Identification { total_faces: faces.len(), results })
}

//! Embedding backfill for catalog rows.
//!
//! Walks the catalog page by page and fills in `embedding` for rows that have
//! none. Several rows may point at the same group photo; each row then takes
//! the next not-yet-used face of that photo, in detection order. The per-image
//! counter lives only for one run, so two runs over the same catalog must not
//! overlap.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{Catalog, ImageSource};
use crate::models::BackfillRow;
use crate::pipeline::error::PipelineError;
use crate::pipeline::face::FaceModels;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct BackfillOptions {
    pub batch_size: usize,
    /// Pause between pages to go easy on the remote store.
    pub page_delay: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, page_delay: Duration::from_secs(1) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Rows that received a new embedding.
    pub processed: usize,
    /// Rows that failed or had no usable face; left for a later run or manual follow-up.
    pub skipped: usize,
    pub already_embedded: usize,
    pub pages: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum RowOutcome {
    Embedded,
    AlreadyEmbedded,
    Skipped,
}

pub fn run(
    models: &FaceModels,
    catalog: &dyn Catalog,
    images: &dyn ImageSource,
    options: &BackfillOptions,
) -> Result<BackfillReport, PipelineError> {
    if options.batch_size == 0 {
        return Err(PipelineError::BadInput("batch_size must be at least 1".to_string()));
    }
    let mut seen_images: HashMap<String, usize> = HashMap::new();
    let mut report = BackfillReport::default();
    let mut offset = 0usize;

    loop {
        let rows = catalog.fetch_page(offset, options.batch_size).map_err(|e| {
            error!("Pipeline execution failed: could not fetch rows at offset {}: {}", offset, e);
            PipelineError::from(e)
        })?;
        if rows.is_empty() {
            info!("[DONE] No more records to process.");
            break;
        }
        report.pages += 1;

        for row in &rows {
            match process_row(models, catalog, images, row, &mut seen_images) {
                RowOutcome::Embedded => report.processed += 1,
                RowOutcome::AlreadyEmbedded => report.already_embedded += 1,
                RowOutcome::Skipped => report.skipped += 1,
            }
        }

        offset += options.batch_size;
        if !options.page_delay.is_zero() {
            std::thread::sleep(options.page_delay);
        }
    }

    info!(
        "[DONE] Processed {} records ({} skipped, {} already embedded).",
        report.processed, report.skipped, report.already_embedded
    );
    Ok(report)
}

fn process_row(
    models: &FaceModels,
    catalog: &dyn Catalog,
    images: &dyn ImageSource,
    row: &BackfillRow,
    seen_images: &mut HashMap<String, usize>,
) -> RowOutcome {
    if row.has_embedding() {
        info!("[SKIP] ID {} already has embedding.", row.id);
        return RowOutcome::AlreadyEmbedded;
    }
    let Some(image_path) = row.image_path() else {
        warn!("No image path for ID: {}", row.id);
        return RowOutcome::Skipped;
    };
    let face_index = seen_images.get(image_path).copied().unwrap_or(0);

    let image = match images.fetch(image_path) {
        Ok(img) => img,
        Err(e) => {
            error!("Could not download image {}: {}", image_path, e);
            return RowOutcome::Skipped;
        }
    };

    let faces = match models.detector.detect(&image) {
        Ok(faces) => faces,
        Err(e) => {
            error!("Face detection failed for ID {}: {}", row.id, e);
            return RowOutcome::Skipped;
        }
    };
    let Some(face) = faces.get(face_index) else {
        warn!("No face #{} found in image: {} (ID {})", face_index + 1, image_path, row.id);
        return RowOutcome::Skipped;
    };

    let embedding = match models.embedder.embed(face) {
        Ok(e) => e,
        Err(e) => {
            error!("Embedding generation failed for ID {}: {}", row.id, e);
            return RowOutcome::Skipped;
        }
    };
    info!("Generated embedding for face #{} of {}", face_index + 1, image_path);

    if let Err(e) = catalog.update_embedding(&row.id, &embedding) {
        error!("Failed to update embedding for ID: {} - {}", row.id, e);
        return RowOutcome::Skipped;
    }

    seen_images.insert(image_path.to_string(), face_index + 1);
    RowOutcome::Embedded
}

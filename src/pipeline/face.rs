use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{0} model not loaded")]
    NotLoaded(&'static str),
    #[error("inference failed: {0}")]
    Inference(String),
    #[cfg(feature = "facial-recognition")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBbox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// A detected face: its box in the source image and the RGB crop under it.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub bbox: FaceBbox,
    pub image: DynamicImage,
}

/// Finds faces in an RGB image. Results are ordered by confidence, highest first;
/// that position is the face's `face_index`.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceCrop>, ModelError>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Maps a face crop to a fixed-length embedding (not necessarily normalized).
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>, ModelError>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// The detector/embedder pair the pipelines run against. Built once in `main`
/// and shared; tests substitute their own implementations.
#[derive(Clone)]
pub struct FaceModels {
    pub detector: Arc<dyn FaceDetector>,
    pub embedder: Arc<dyn FaceEmbedder>,
}

impl FaceModels {
    pub fn new(detector: Arc<dyn FaceDetector>, embedder: Arc<dyn FaceEmbedder>) -> Self {
        Self { detector, embedder }
    }

    /// Convenience for a single type implementing both halves.
    pub fn from_shared<M>(models: Arc<M>) -> Self
    where
        M: FaceDetector + FaceEmbedder + 'static,
    {
        Self { detector: models.clone(), embedder: models }
    }

    pub fn is_ready(&self) -> bool {
        self.detector.is_ready() && self.embedder.is_ready()
    }
}

/// Stand-in used when the binary is built without ONNX support.
pub struct UnloadedModels;

impl FaceDetector for UnloadedModels {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<FaceCrop>, ModelError> {
        Err(ModelError::NotLoaded("detection"))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

impl FaceEmbedder for UnloadedModels {
    fn embed(&self, _face: &FaceCrop) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::NotLoaded("recognition"))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Scale `v` to unit length in place. A zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Crop `bbox` out of `image`, clamped to the image bounds. `None` when the
/// clamped box is empty.
pub fn crop_face(image: &DynamicImage, bbox: &FaceBbox) -> Option<DynamicImage> {
    let x1 = bbox.x1.max(0.0) as u32;
    let y1 = bbox.y1.max(0.0) as u32;
    let x2 = bbox.x2.min(image.width() as f32).max(0.0) as u32;
    let y2 = bbox.y2.min(image.height() as f32).max(0.0) as u32;
    if x2 > x1 && y2 > y1 {
        Some(image.crop_imm(x1, y1, x2 - x1, y2 - y1))
    } else {
        None
    }
}

// NMS helpers

/// Indices of the boxes kept after greedy non-maximum suppression, highest
/// confidence first.
pub fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    if boxes.is_empty() {
        return vec![];
    }
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..indices.len() {
        let ia = indices[i];
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if suppressed[ib] {
                continue;
            }
            if calculate_iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

pub fn calculate_iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

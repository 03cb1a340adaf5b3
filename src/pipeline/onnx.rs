//! SCRFD face detection and ArcFace embeddings via ONNX Runtime.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::models::EMBEDDING_DIM;
use crate::pipeline::face::{crop_face, nms, FaceBbox, FaceCrop, FaceDetector, FaceEmbedder, ModelError};
use crate::utils::config::Config;

// Model URLs
const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL_URL_PRIMARY: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

const SCRFD_FILE: &str = "scrfd_500m_bnkps.onnx";
const ARCFACE_FILE: &str = "w600k_r50.onnx";

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const ARCFACE_INPUT_SIZE: u32 = 112;

pub type ScrfdPreprocessResult = ([i64; 4], Vec<f32>, f32);

/// Output tensor names for one stride: (score, bbox).
type StrideOutputs = (String, String);

struct Scrfd {
    session: Mutex<Session>,
    input_name: String,
    strides: [StrideOutputs; 3],
}

struct ArcFace {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

/// Holds the SCRFD and ArcFace sessions for the life of the process.
///
/// Either session may be missing (download failed, files absent); calls then
/// fail with [`ModelError::NotLoaded`] instead of taking the server down.
pub struct FaceProcessor {
    pub models_dir: PathBuf,
    auto_download: bool,
    confidence_threshold: f32,
    scrfd: Option<Scrfd>,
    arcface: Option<ArcFace>,
}

impl FaceProcessor {
    pub fn new(cfg: &Config) -> Self {
        Self {
            models_dir: cfg.models_dir.clone(),
            auto_download: cfg.face_auto_download,
            confidence_threshold: cfg.face_confidence_threshold,
            scrfd: None,
            arcface: None,
        }
    }

    // Lightweight accessors for model load state
    pub fn scrfd_loaded(&self) -> bool { self.scrfd.is_some() }
    pub fn arcface_loaded(&self) -> bool { self.arcface.is_some() }

    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir)
            .context("Failed to create models directory")?;

        if self.auto_download {
            if let Err(e) = self.download_models().await {
                warn!("Face model auto-download failed: {}", e);
            }
        } else {
            info!("Face model auto-download disabled by config.");
        }

        if let Err(e) = self.load_models() {
            warn!("Face models not loaded: {:#}", e);
        }
        Ok(())
    }

    async fn download_models(&self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);
        let client = create_http_client()?;

        if !scrfd_path.exists() {
            info!("Downloading SCRFD face detection model...");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
                warn!("Failed to download from Hugging Face: {}. Trying GitHub...", e);
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
            }
        }

        if !arcface_path.exists() {
            info!("Downloading ArcFace recognition model ({})...", ARCFACE_FILE);
            download_file(&client, ARCFACE_MODEL_URL_PRIMARY, &arcface_path).await?;
        }

        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);

        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!(
                "Face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path, arcface_path
            );
        }

        let scrfd = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let input_name = scrfd.inputs.first().map(|i| i.name.clone()).context("SCRFD model has no inputs")?;
        let output_names: Vec<String> = scrfd.outputs.iter().map(|o| o.name.clone()).collect();
        let strides = discover_stride_outputs(&output_names)?;
        debug!(?strides, "SCRFD output tensor mapping");
        self.scrfd = Some(Scrfd { session: Mutex::new(scrfd), input_name, strides });

        let arc = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;
        let input_name = arc.inputs.first().map(|i| i.name.clone()).context("ArcFace model has no inputs")?;
        let output_name = arc.outputs.first().map(|o| o.name.clone()).context("ArcFace model has no outputs")?;
        self.arcface = Some(ArcFace { session: Mutex::new(arc), input_name, output_name });

        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(())
    }

    pub fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBbox>, ModelError> {
        let scrfd = self.scrfd.as_ref().ok_or(ModelError::NotLoaded("detection"))?;
        let (shape, data, scale) = preprocess_scrfd(image);
        let input = Value::from_array((shape.to_vec(), data))?;

        let mut session = scrfd.session.lock();
        let outputs = session.run(ort::inputs![scrfd.input_name.as_str() => input])?;

        let mut raw: Vec<FaceBbox> = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_name, bbox_name) = &scrfd.strides[pos];
            let scores = outputs
                .get(score_name.as_str())
                .ok_or_else(|| ModelError::Inference(format!("missing SCRFD output {}", score_name)))?;
            let boxes = outputs
                .get(bbox_name.as_str())
                .ok_or_else(|| ModelError::Inference(format!("missing SCRFD output {}", bbox_name)))?;
            let (_, scores) = scores.try_extract_tensor::<f32>()?;
            let (_, boxes) = boxes.try_extract_tensor::<f32>()?;
            raw.extend(decode_stride(scores, boxes, stride, scale, self.confidence_threshold));
        }

        let img_w = image.width() as f32;
        let img_h = image.height() as f32;
        let faces: Vec<FaceBbox> = nms(&raw, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|idx| {
                let b = &raw[idx];
                FaceBbox {
                    x1: b.x1.clamp(0.0, img_w),
                    y1: b.y1.clamp(0.0, img_h),
                    x2: b.x2.clamp(0.0, img_w),
                    y2: b.y2.clamp(0.0, img_h),
                    confidence: b.confidence,
                }
            })
            .collect();
        debug!("SCRFD: {} candidates, {} faces after NMS", raw.len(), faces.len());
        Ok(faces)
    }

    pub fn recognize_face(&self, face_crop: &DynamicImage) -> Result<Vec<f32>, ModelError> {
        let arcface = self.arcface.as_ref().ok_or(ModelError::NotLoaded("recognition"))?;
        let (shape, data) = preprocess_arcface(face_crop);
        let input = Value::from_array((shape.to_vec(), data))?;

        let mut session = arcface.session.lock();
        let outputs = session.run(ort::inputs![arcface.input_name.as_str() => input])?;
        let output = outputs
            .get(arcface.output_name.as_str())
            .ok_or_else(|| ModelError::Inference(format!("missing ArcFace output {}", arcface.output_name)))?;
        let (_, values) = output.try_extract_tensor::<f32>()?;
        if values.len() != EMBEDDING_DIM {
            return Err(ModelError::Inference(format!(
                "expected {}-dim embedding, got {}",
                EMBEDDING_DIM,
                values.len()
            )));
        }
        Ok(values.to_vec())
    }
}

impl FaceDetector for FaceProcessor {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceCrop>, ModelError> {
        let boxes = self.detect_faces(image)?;
        Ok(boxes
            .into_iter()
            .filter_map(|bbox| crop_face(image, &bbox).map(|crop| FaceCrop { bbox, image: crop }))
            .collect())
    }

    fn is_ready(&self) -> bool {
        self.scrfd_loaded()
    }
}

impl FaceEmbedder for FaceProcessor {
    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>, ModelError> {
        self.recognize_face(&face.image)
    }

    fn is_ready(&self) -> bool {
        self.arcface_loaded()
    }
}

fn create_http_client() -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.is_empty() {
            info!("Using Hugging Face token for model download.");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read response body")?;
    // ONNX files are never this small; treat it as an error page
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes), may be corrupted", bytes.len());
    }
    std::fs::write(path, &bytes).with_context(|| format!("Failed to write file: {:?}", path))?;
    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

/// Map SCRFD output tensors to strides 8/16/32. Exports either name them
/// `score_8`, `bbox_8`, ... or use opaque numeric names in the standard order
/// `[scores x3, bboxes x3, kps x3]`.
fn discover_stride_outputs(names: &[String]) -> Result<[StrideOutputs; 3]> {
    let find = |prefix: &str, stride: u32| -> Option<String> {
        let target = format!("{}_{}", prefix, stride);
        names.iter().find(|n| **n == target).cloned()
    };
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();
    if let Some(named) = named {
        if let Ok(arr) = <[StrideOutputs; 3]>::try_from(named) {
            return Ok(arr);
        }
    }
    if names.len() < 6 {
        anyhow::bail!("SCRFD model needs score and bbox outputs for 3 strides, got {:?}", names);
    }
    info!(?names, "SCRFD: output names not recognized, using positional mapping");
    Ok([
        (names[0].clone(), names[3].clone()),
        (names[1].clone(), names[4].clone()),
        (names[2].clone(), names[5].clone()),
    ])
}

/// Resize into the top-left of a 640x640 canvas, BGR, NCHW, normalized to roughly [-1, 1].
fn preprocess_scrfd(image: &DynamicImage) -> ScrfdPreprocessResult {
    let size = SCRFD_INPUT_SIZE;
    let (ow, oh) = (image.width() as f32, image.height() as f32);
    let scale = size as f32 / ow.max(oh);
    let nw = ((ow * scale) as u32).clamp(1, size);
    let nh = ((oh * scale) as u32).clamp(1, size);
    let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
    let mut padded = DynamicImage::new_rgb8(size, size);
    image::imageops::overlay(&mut padded, &resized, 0, 0);
    let rgb = padded.to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, p) in rgb.enumerate_pixels() {
        let i = (y * size + x) as usize;
        // InsightFace models expect BGR
        data[i] = (p[2] as f32 - 127.5) / 128.0;
        data[plane + i] = (p[1] as f32 - 127.5) / 128.0;
        data[2 * plane + i] = (p[0] as f32 - 127.5) / 128.0;
    }
    ([1, 3, size as i64, size as i64], data, scale)
}

fn preprocess_arcface(face_crop: &DynamicImage) -> ([i64; 4], Vec<f32>) {
    let size = ARCFACE_INPUT_SIZE;
    let rgb = face_crop
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, p) in rgb.enumerate_pixels() {
        let i = (y * size + x) as usize;
        for c in 0..3 {
            data[c * plane + i] = (p[c] as f32 - 127.5) / 127.5;
        }
    }
    ([1, 3, size as i64, size as i64], data)
}

/// Decode one stride's anchor-free predictions back into source-image coordinates.
fn decode_stride(scores: &[f32], boxes: &[f32], stride: u32, scale: f32, threshold: f32) -> Vec<FaceBbox> {
    let grid = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;
    let mut out = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score < threshold {
            continue;
        }
        let off = idx * 4;
        if off + 3 >= boxes.len() {
            break;
        }
        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;
        out.push(FaceBbox {
            x1: (cx - boxes[off] * s) / scale,
            y1: (cy - boxes[off + 1] * s) / scale,
            x2: (cx + boxes[off + 2] * s) / scale,
            y2: (cy + boxes[off + 3] * s) / scale,
            confidence: score,
        });
    }
    out
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::serve;
use castid_backend::api::routes;
use castid_backend::db::{Catalog, CatalogError, DownloadError, ImageSource};
use castid_backend::models::{BackfillRow, CatalogRecord, RecordId, EMBEDDING_DIM};
use castid_backend::pipeline::face::FaceBbox;
use castid_backend::pipeline::{FaceCrop, FaceDetector, FaceEmbedder, FaceModels, ModelError};
use castid_backend::utils::config::{Config, DEFAULT_MAX_UPLOAD_BYTES};
use castid_backend::AppState;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use tokio::net::TcpListener;

/// A 512-d vector with the given non-zero components.
pub fn vector(components: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    for &(i, x) in components {
        v[i] = x;
    }
    v
}

/// PNG of `width` x 4 pixels. The fake detector keys on the width.
pub fn png_bytes(width: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 4, Rgb([200, 180, 160])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

/// Finds a fixed number of faces per image width. Each crop is a single pixel
/// carrying `[width, face_index, 0]` so the embedder can tell faces apart.
#[derive(Default)]
pub struct FakeDetector {
    faces_by_width: HashMap<u32, usize>,
}

impl FakeDetector {
    pub fn with_faces(mut self, width: u32, count: usize) -> Self {
        self.faces_by_width.insert(width, count);
        self
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceCrop>, ModelError> {
        let width = image.width();
        let count = self.faces_by_width.get(&width).copied().unwrap_or(0);
        Ok((0..count)
            .map(|i| FaceCrop {
                bbox: FaceBbox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0, confidence: 0.99 - i as f32 * 0.01 },
                image: DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([width as u8, i as u8, 0]))),
            })
            .collect())
    }
}

/// Returns the configured vector for `(width, face_index)`, or a basis vector
/// unique to that pair.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: HashMap<(u8, u8), Vec<f32>>,
}

impl FakeEmbedder {
    pub fn with_vector(mut self, width: u8, face_index: u8, v: Vec<f32>) -> Self {
        self.vectors.insert((width, face_index), v);
        self
    }

    pub fn vector_for(&self, width: u8, face_index: u8) -> Vec<f32> {
        self.vectors
            .get(&(width, face_index))
            .cloned()
            .unwrap_or_else(|| vector(&[((width as usize * 8 + face_index as usize) % EMBEDDING_DIM, 1.0)]))
    }
}

impl FaceEmbedder for FakeEmbedder {
    fn embed(&self, face: &FaceCrop) -> Result<Vec<f32>, ModelError> {
        let px = face.image.to_rgb8().get_pixel(0, 0).0;
        Ok(self.vector_for(px[0], px[1]))
    }
}

pub fn fake_models(detector: FakeDetector, embedder: FakeEmbedder) -> FaceModels {
    FaceModels::new(Arc::new(detector), Arc::new(embedder))
}

#[derive(Clone, Debug)]
pub struct FakeRow {
    pub id: i64,
    pub name: String,
    pub image_path: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl FakeRow {
    pub fn new(id: i64, name: &str, image_path: Option<&str>, embedding: Option<Vec<f32>>) -> Self {
        Self { id, name: name.to_string(), image_path: image_path.map(str::to_string), embedding }
    }
}

/// In-memory catalog. `fail` makes every read fail like an unreachable store.
#[derive(Default)]
pub struct FakeCatalog {
    pub rows: Mutex<Vec<FakeRow>>,
    pub fail: AtomicBool,
    pub page_requests: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_rows(rows: Vec<FakeRow>) -> Self {
        Self { rows: Mutex::new(rows), ..Default::default() }
    }

    pub fn embedding_of(&self, id: i64) -> Option<Vec<f32>> {
        self.rows.lock().iter().find(|r| r.id == id).and_then(|r| r.embedding.clone())
    }

    fn check(&self) -> Result<(), CatalogError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Status { status: 500, body: "unavailable".to_string() });
        }
        Ok(())
    }
}

impl Catalog for FakeCatalog {
    fn fetch_all_embeddings(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .map(|r| CatalogRecord {
                id: RecordId::Int(r.id),
                name: Some(r.name.clone()),
                dob: Some("1970-01-01".to_string()),
                filmography: serde_json::json!(["Film A", "Film B"]),
                embedding: r.embedding.clone(),
            })
            .collect())
    }

    fn fetch_page(&self, offset: usize, size: usize) -> Result<Vec<BackfillRow>, CatalogError> {
        self.check()?;
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .iter()
            .skip(offset)
            .take(size)
            .map(|r| BackfillRow {
                id: RecordId::Int(r.id),
                image_path: r.image_path.clone(),
                embedding: r.embedding.as_ref().map(|e| serde_json::json!(e)).unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    fn update_embedding(&self, id: &RecordId, embedding: &[f32]) -> Result<(), CatalogError> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|r| RecordId::Int(r.id) == *id)
            .ok_or_else(|| CatalogError::Status { status: 404, body: format!("no row {}", id) })?;
        row.embedding = Some(embedding.to_vec());
        Ok(())
    }
}

/// Serves blank images whose width is looked up by path; unknown paths 404.
#[derive(Default)]
pub struct FakeImageSource {
    widths: HashMap<String, u32>,
    pub fetches: AtomicUsize,
}

impl FakeImageSource {
    pub fn with_image(mut self, path: &str, width: u32) -> Self {
        self.widths.insert(path.to_string(), width);
        self
    }
}

impl ImageSource for FakeImageSource {
    fn fetch(&self, image_path: &str) -> Result<DynamicImage, DownloadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let width = self.widths.get(image_path).ok_or(DownloadError::Status(404))?;
        Ok(DynamicImage::ImageRgb8(RgbImage::new(*width, 4)))
    }
}

pub fn test_config() -> Config {
    Config {
        supabase_url: None,
        supabase_key: None,
        table_name: None,
        image_url_prefix: None,
        catalog_schema: None,
        port: 0,
        models_dir: PathBuf::from("./models"),
        face_auto_download: false,
        face_confidence_threshold: 0.5,
        backfill_delay: Duration::ZERO,
        download_timeout: Duration::from_secs(1),
        max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
    }
}

pub fn test_state(models: FaceModels, catalog: Arc<FakeCatalog>, images: Arc<FakeImageSource>) -> AppState {
    AppState::new(test_config(), models, catalog, images)
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_app(state: AppState) -> String {
    let app = routes::router(Arc::new(state));
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(&addr).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        serve(listener, app.into_make_service()).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

pub mod api;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod utils;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use db::{Catalog, ImageSource};
use pipeline::FaceModels;
use utils::config::Config;

/// Shared, read-only handles every request works with. Everything is built
/// once in `main` and injected; tests swap in fakes.
#[derive(Clone)]
pub struct AppState {
    pub started_at: std::time::Instant,
    pub config: Config,
    pub models: FaceModels,
    pub catalog: Arc<dyn Catalog>,
    pub images: Arc<dyn ImageSource>,
    /// Set while a backfill run is in flight; a second trigger is refused.
    pub backfill_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        config: Config,
        models: FaceModels,
        catalog: Arc<dyn Catalog>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            config,
            models,
            catalog,
            images,
            backfill_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

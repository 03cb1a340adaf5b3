use std::net::SocketAddr;
use std::sync::Arc;

use castid_backend::db::{CatalogSettings, HttpImageSource, RestCatalog};
use castid_backend::pipeline::FaceModels;
use castid_backend::utils::config::Config;
use castid_backend::utils::logging;
use castid_backend::AppState;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be populated
    let _ = dotenvy::dotenv();
    logging::init();
    let cfg = Config::from_env();

    if cfg.supabase_url.is_none() || cfg.supabase_key.is_none() || cfg.table_name.is_none() {
        warn!("Catalog is not fully configured (FSUPABASE_URL, FSUPABASE_KEY, FTABLE_NAME); identification will return 503");
    }

    let models = load_models(&cfg).await?;
    if !models.is_ready() {
        warn!("Face models unavailable; identification and backfill will return 503");
    }

    let catalog = Arc::new(RestCatalog::new(CatalogSettings::from(&cfg)));
    let images = Arc::new(HttpImageSource::new(cfg.image_url_prefix.clone(), cfg.download_timeout));
    let port = cfg.port;
    let state = Arc::new(AppState::new(cfg, models, catalog, images));

    let app = castid_backend::api::routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "facial-recognition")]
async fn load_models(cfg: &Config) -> anyhow::Result<FaceModels> {
    let mut processor = castid_backend::pipeline::onnx::FaceProcessor::new(cfg);
    processor.initialize().await?;
    Ok(FaceModels::from_shared(Arc::new(processor)))
}

#[cfg(not(feature = "facial-recognition"))]
async fn load_models(_cfg: &Config) -> anyhow::Result<FaceModels> {
    warn!("Built without facial-recognition support");
    Ok(FaceModels::from_shared(Arc::new(castid_backend::pipeline::face::UnloadedModels)))
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Process configuration read from the environment.
///
/// Catalog settings stay optional here: a missing value only fails the first
/// request that needs it, so the server can still boot and report health.
#[derive(Clone, Debug)]
pub struct Config {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub table_name: Option<String>,
    pub image_url_prefix: Option<String>,
    pub catalog_schema: Option<String>,
    pub port: u16,
    pub models_dir: PathBuf,
    pub face_auto_download: bool,
    pub face_confidence_threshold: f32,
    pub backfill_delay: Duration,
    pub download_timeout: Duration,
    pub max_upload_bytes: usize,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("CASTID_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);
        let models_dir = env::var("CASTID_MODELS_DIR").unwrap_or_else(|_| "./models".to_string());
        let face_auto_download = env::var("CASTID_FACE_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        let face_confidence_threshold = env::var("CASTID_FACE_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.5);
        let backfill_delay_ms = env::var("CASTID_BACKFILL_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(1000);
        let download_timeout_secs = env::var("CASTID_DOWNLOAD_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(10);
        let max_upload_bytes = env::var("CASTID_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        Self {
            supabase_url: non_empty("FSUPABASE_URL"),
            supabase_key: non_empty("FSUPABASE_KEY"),
            table_name: non_empty("FTABLE_NAME"),
            image_url_prefix: non_empty("FIMAGE_URL_PREFIX"),
            catalog_schema: non_empty("CASTID_CATALOG_SCHEMA"),
            port,
            models_dir: PathBuf::from(models_dir),
            face_auto_download,
            face_confidence_threshold,
            backfill_delay: Duration::from_millis(backfill_delay_ms),
            download_timeout: Duration::from_secs(download_timeout_secs),
            max_upload_bytes,
        }
    }
}

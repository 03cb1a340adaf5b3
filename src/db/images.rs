use std::time::Duration;

use image::DynamicImage;
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("image source is not configured: FIMAGE_URL_PREFIX is not set")]
    NotConfigured,
    #[error("download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("download returned HTTP {0}")]
    Status(u16),
    #[error("downloaded bytes are not an image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Where catalog images referenced by `image_path` are fetched from.
pub trait ImageSource: Send + Sync {
    fn fetch(&self, image_path: &str) -> Result<DynamicImage, DownloadError>;
}

/// Downloads `prefix + image_path` over HTTP with a fixed timeout.
pub struct HttpImageSource {
    url_prefix: Option<String>,
    timeout: Duration,
    client: OnceCell<Client>,
}

impl HttpImageSource {
    pub fn new(url_prefix: Option<String>, timeout: Duration) -> Self {
        Self { url_prefix, timeout, client: OnceCell::new() }
    }

    fn client(&self) -> Result<&Client, DownloadError> {
        self.client.get_or_try_init(|| {
            Client::builder()
                .connect_timeout(self.timeout)
                .timeout(self.timeout)
                .build()
                .map_err(DownloadError::from)
        })
    }

    pub fn url_for(&self, image_path: &str) -> Result<String, DownloadError> {
        let prefix = self.url_prefix.as_deref().ok_or(DownloadError::NotConfigured)?;
        Ok(format!("{}{}", prefix, image_path))
    }
}

impl ImageSource for HttpImageSource {
    fn fetch(&self, image_path: &str) -> Result<DynamicImage, DownloadError> {
        let url = self.url_for(image_path)?;
        let resp = self.client()?.get(&url).send()?;
        if !resp.status().is_success() {
            return Err(DownloadError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes()?;
        let img = image::load_from_memory(&bytes)?;
        info!("Downloaded image: {}", image_path);
        Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
    }
}

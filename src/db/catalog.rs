//! Remote identity catalog.
//!
//! The catalog is a single table exposed through Supabase's PostgREST
//! endpoint (`{url}/rest/v1/{table}`). Reads page with the `Range` header and
//! writes patch one row at a time by primary key.

use once_cell::sync::OnceCell;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{BackfillRow, CatalogRecord, RecordId};
use crate::utils::config::Config;

const IDENTITY_COLUMNS: &str = "id,name,dob,filmography,embedding";
const BACKFILL_COLUMNS: &str = "id,image_path,embedding";
/// Rows requested per read when loading the whole catalog.
const CATALOG_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is not configured: {0} is not set")]
    NotConfigured(&'static str),
    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("catalog response could not be decoded: {0}")]
    Decode(String),
}

/// Read/write access to the identity catalog.
pub trait Catalog: Send + Sync {
    /// Every identity row with its metadata and (possibly missing) embedding.
    fn fetch_all_embeddings(&self) -> Result<Vec<CatalogRecord>, CatalogError>;

    /// Rows `offset ..= offset + size - 1`. An empty page means the table is exhausted.
    fn fetch_page(&self, offset: usize, size: usize) -> Result<Vec<BackfillRow>, CatalogError>;

    fn update_embedding(&self, id: &RecordId, embedding: &[f32]) -> Result<(), CatalogError>;
}

#[derive(Clone, Debug, Default)]
pub struct CatalogSettings {
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: Option<String>,
    /// PostgREST schema profile; `None` uses the server's default schema.
    pub schema: Option<String>,
}

impl From<&Config> for CatalogSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            url: cfg.supabase_url.clone(),
            key: cfg.supabase_key.clone(),
            table: cfg.table_name.clone(),
            schema: cfg.catalog_schema.clone(),
        }
    }
}

/// PostgREST-backed catalog using a blocking HTTP client.
///
/// The client is built on first use so construction never blocks, and so it
/// is always created on the blocking thread that is about to use it.
pub struct RestCatalog {
    settings: CatalogSettings,
    client: OnceCell<Client>,
}

struct Endpoint<'a> {
    table_url: String,
    key: &'a str,
}

impl RestCatalog {
    pub fn new(settings: CatalogSettings) -> Self {
        Self { settings, client: OnceCell::new() }
    }

    fn client(&self) -> Result<&Client, CatalogError> {
        self.client.get_or_try_init(|| Client::builder().build().map_err(CatalogError::from))
    }

    fn endpoint(&self) -> Result<Endpoint<'_>, CatalogError> {
        let url = self.settings.url.as_deref().ok_or(CatalogError::NotConfigured("FSUPABASE_URL"))?;
        let key = self.settings.key.as_deref().ok_or(CatalogError::NotConfigured("FSUPABASE_KEY"))?;
        let table = self.settings.table.as_deref().ok_or(CatalogError::NotConfigured("FTABLE_NAME"))?;
        Ok(Endpoint {
            table_url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            key,
        })
    }

    fn authorize(&self, req: RequestBuilder, key: &str, profile_header: &'static str) -> RequestBuilder {
        let req = req.header("apikey", key).bearer_auth(key);
        match self.settings.schema.as_deref() {
            Some(schema) => req.header(profile_header, schema),
            None => req,
        }
    }

    fn select<T: DeserializeOwned>(&self, columns: &str, range: Option<(usize, usize)>) -> Result<Vec<T>, CatalogError> {
        let endpoint = self.endpoint()?;
        let mut req = self
            .client()?
            .get(&endpoint.table_url)
            .query(&[("select", columns)]);
        if let Some((offset, size)) = range {
            let last = offset + size.saturating_sub(1);
            req = req
                .query(&[("order", "id.asc")])
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", offset, last));
        }
        let resp = self.authorize(req, endpoint.key, "Accept-Profile").send()?;
        let status = resp.status();
        // PostgREST answers 416 when the requested window starts past the last row.
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        let body = resp.text()?;
        if !status.is_success() {
            return Err(CatalogError::Status { status: status.as_u16(), body });
        }
        serde_json::from_str(&body).map_err(|e| CatalogError::Decode(e.to_string()))
    }
}

fn decode_record(row: serde_json::Value) -> Option<CatalogRecord> {
    match serde_json::from_value::<CatalogRecord>(row) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping undecodable catalog row: {}", e);
            None
        }
    }
}

impl Catalog for RestCatalog {
    fn fetch_all_embeddings(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<serde_json::Value> = self.select(IDENTITY_COLUMNS, Some((offset, CATALOG_PAGE_SIZE)))?;
            if page.is_empty() {
                break;
            }
            // The server may cap a page below the requested size.
            offset += page.len();
            records.extend(page.into_iter().filter_map(decode_record));
        }
        debug!("Fetched {} catalog rows", records.len());
        Ok(records)
    }

    fn fetch_page(&self, offset: usize, size: usize) -> Result<Vec<BackfillRow>, CatalogError> {
        info!("Fetching rows {} to {}", offset, offset + size.saturating_sub(1));
        self.select(BACKFILL_COLUMNS, Some((offset, size)))
    }

    fn update_embedding(&self, id: &RecordId, embedding: &[f32]) -> Result<(), CatalogError> {
        let endpoint = self.endpoint()?;
        let req = self
            .client()?
            .patch(&endpoint.table_url)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "embedding": embedding }));
        let resp = self.authorize(req, endpoint.key, "Content-Profile").send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(CatalogError::Status { status: status.as_u16(), body });
        }
        info!("Updated embedding for ID: {}", id);
        Ok(())
    }
}

pub mod catalog;
pub mod images;

pub use catalog::{Catalog, CatalogError, CatalogSettings, RestCatalog};
pub use images::{DownloadError, HttpImageSource, ImageSource};

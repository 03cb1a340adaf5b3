pub mod catalog;

pub use catalog::{
    BackfillRow, CatalogRecord, Identification, IdentificationEntry, RecordId, EMBEDDING_DIM,
};

// Catalog embedding index
// -----------------------
//
// Brute-force cosine search over the valid catalog rows of one request.

use crate::models::CatalogRecord;
use crate::pipeline::face::l2_normalize;

pub struct CatalogIndex {
    records: Vec<CatalogRecord>,
    embeddings: Vec<Vec<f32>>,
}

impl CatalogIndex {
    /// Keep only records valid for matching and pre-normalize their embeddings.
    pub fn build(rows: Vec<CatalogRecord>) -> Self {
        let mut records = Vec::new();
        let mut embeddings = Vec::new();
        for mut record in rows.into_iter().filter(CatalogRecord::is_valid_for_matching) {
            if let Some(mut embedding) = record.embedding.take() {
                l2_normalize(&mut embedding);
                embeddings.push(embedding);
                records.push(record);
            }
        }
        Self { records, embeddings }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Best-scoring record for an already-normalized probe. Ties keep the earlier row.
    pub fn best_match(&self, probe: &[f32]) -> Option<(&CatalogRecord, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, emb) in self.embeddings.iter().enumerate() {
            let score: f32 = emb.iter().zip(probe.iter()).map(|(a, b)| a * b).sum();
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((idx, score)),
            }
        }
        best.map(|(idx, score)| (&self.records[idx], score.clamp(-1.0, 1.0)))
    }
}

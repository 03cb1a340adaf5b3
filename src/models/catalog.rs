use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Length every stored embedding must have to take part in matching.
pub const EMBEDDING_DIM: usize = 512;

/// Primary key of a catalog row. PostgREST hands back whatever the column
/// type is, so both integer and text keys are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(v) => write!(f, "{}", v),
            RecordId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RecordId {
    fn from(v: i64) -> Self {
        RecordId::Int(v)
    }
}

/// A known identity, as read by the identification pipeline.
///
/// Metadata columns are decoded leniently: a null or oddly typed `name`/`dob`
/// never rejects the row, only a missing or malformed `id` does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: RecordId,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub dob: Option<String>,
    #[serde(default)]
    pub filmography: serde_json::Value,
    #[serde(default, deserialize_with = "deserialize_embedding")]
    pub embedding: Option<Vec<f32>>,
}

impl CatalogRecord {
    /// A record takes part in matching only with a present, full-length embedding.
    pub fn is_valid_for_matching(&self) -> bool {
        matches!(&self.embedding, Some(e) if e.len() == EMBEDDING_DIM)
    }
}

/// A catalog row as seen by the backfill job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillRow {
    pub id: RecordId,
    #[serde(default)]
    pub image_path: Option<String>,
    /// Left undecoded: the backfill only asks whether *anything* is stored.
    #[serde(default)]
    pub embedding: serde_json::Value,
}

impl BackfillRow {
    /// Null, empty arrays, empty strings, `false` and zero all count as "no embedding".
    pub fn has_embedding(&self) -> bool {
        use serde_json::Value;
        match &self.embedding {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(true),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref().filter(|p| !p.trim().is_empty())
    }
}

/// One entry per detected face, in detection order. A match carries the
/// catalog metadata as stored, nulls included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IdentificationEntry {
    pub face_index: usize,
    /// Catalog name, or `"Unknown"` below the threshold.
    pub name: Option<String>,
    pub dob: Option<String>,
    #[schema(value_type = Object)]
    pub filmography: serde_json::Value,
    /// Best cosine similarity against the catalog, rounded to three decimals.
    pub similarity_score: f32,
}

pub const UNKNOWN_NAME: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "N/A";

impl IdentificationEntry {
    pub fn matched(face_index: usize, record: &CatalogRecord, similarity_score: f32) -> Self {
        Self {
            face_index,
            name: record.name.clone(),
            dob: record.dob.clone(),
            filmography: record.filmography.clone(),
            similarity_score,
        }
    }

    pub fn unknown(face_index: usize, similarity_score: f32) -> Self {
        Self {
            face_index,
            name: Some(UNKNOWN_NAME.to_string()),
            dob: Some(NOT_AVAILABLE.to_string()),
            filmography: serde_json::Value::String(NOT_AVAILABLE.to_string()),
            similarity_score,
        }
    }

    pub fn is_match(&self) -> bool {
        self.name.as_deref() != Some(UNKNOWN_NAME)
    }
}

/// Outcome of identifying every face in one uploaded image.
#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub results: Vec<IdentificationEntry>,
    pub total_faces: usize,
}

/// Strings pass through, numbers and booleans are rendered, anything else is `None`.
fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Accepts a JSON array of numbers or pgvector's text form (`"[0.1,0.2]"`).
/// Anything else decodes as no embedding rather than failing the whole page.
fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_embedding(&value))
}

pub fn parse_embedding(value: &serde_json::Value) -> Option<Vec<f32>> {
    use serde_json::Value;
    match value {
        Value::Array(items) => items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect(),
        Value::String(text) => {
            let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
            if inner.is_empty() {
                return Some(Vec::new());
            }
            inner.split(',').map(|part| part.trim().parse::<f32>().ok()).collect()
        }
        _ => None,
    }
}

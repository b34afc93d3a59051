//! Defines the models shared by every connector.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod connection;
pub mod document;

/// Metadata key holding the text of a chunk.
pub const TEXT_KEY: &str = "text";

/// A backend native grouping of vectors (collection, class, table, namespace)
/// normalized to the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    pub count: usize,
    pub metadata: Map<String, Value>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One chunk of a document along with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique within its namespace and stable for the lifetime of the chunk.
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub text: String,
}

/// A stored vector as returned by raw reads and as written to the vector cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEntry {
    #[serde(rename = "vectorDbId")]
    pub vector_id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

impl From<&VectorRecord> for VectorEntry {
    fn from(record: &VectorRecord) -> Self {
        Self {
            vector_id: record.id.clone(),
            values: record.embedding.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

impl From<VectorEntry> for VectorRecord {
    fn from(entry: VectorEntry) -> Self {
        let text = entry
            .metadata
            .get(TEXT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            id: entry.vector_id,
            embedding: entry.values,
            metadata: entry.metadata,
            text,
        }
    }
}

/// A single page of raw vectors.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPage {
    pub ids: Vec<String>,
    pub data: Vec<VectorEntry>,
    pub error: Option<String>,
}

impl RawPage {
    pub fn new(data: Vec<VectorEntry>) -> Self {
        Self {
            ids: data.iter().map(|e| e.vector_id.clone()).collect(),
            data,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// A single nearest neighbour hit as reported by a backend, in backend ranked order.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,

    /// The score exactly as the backend reports it.
    pub raw_score: f32,

    /// Chunk text if the backend stores it separately from the metadata.
    pub text: Option<String>,

    pub metadata: Map<String, Value>,
}

/// Parallel arrays of the best matches for a query, best match first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResponse {
    pub vector_ids: Vec<String>,
    pub context_texts: Vec<String>,
    pub source_documents: Vec<Map<String, Value>>,
    pub scores: Vec<f32>,
}

impl SimilarityResponse {
    pub fn len(&self) -> usize {
        self.vector_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector_ids.is_empty()
    }

    pub(crate) fn push(
        &mut self,
        id: String,
        text: String,
        source: Map<String, Value>,
        score: f32,
    ) {
        self.vector_ids.push(id);
        self.context_texts.push(text);
        self.source_documents.push(source);
        self.scores.push(score);
    }
}

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub result: bool,
    pub error: Option<String>,
}

/// Result of counting all vectors in a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Count {
    pub result: usize,
    pub error: Option<String>,
}

/// Flat result of a mutation, for callers that only need to branch on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: Option<String>,
}

impl<T> From<Result<T, crate::error::HubError>> for Outcome {
    fn from(result: Result<T, crate::error::HubError>) -> Self {
        match result {
            Ok(_) => Outcome {
                success: true,
                message: None,
            },
            Err(e) => Outcome {
                success: false,
                message: Some(e.to_string()),
            },
        }
    }
}

/// Parse a metadata blob stored as text. Anything that is not a JSON object
/// degrades to `{ "text": raw }`.
pub fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert(TEXT_KEY.to_string(), Value::String(raw.to_string()));
            map
        }
    }
}

/// Convert an arbitrary JSON value to metadata, applying the same fallback as
/// [parse_metadata] to strings.
pub fn metadata_from_value(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::String(s) => parse_metadata(&s),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert(TEXT_KEY.to_string(), Value::String(other.to_string()));
            map
        }
    }
}

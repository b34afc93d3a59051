use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::prelude::FromRow;

/// A document as handed to the ingestion pipeline, i.e. `{ id?, pageContent, ...metadata }`.
///
/// Every key other than `id` and `pageContent` ends up in `metadata` and is attached
/// to each chunk of the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default)]
    pub page_content: String,

    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl DocumentPayload {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            id: None,
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// The workspace document the vectors are recorded for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    /// Primary key of the document.
    pub id: i64,

    /// Public document identifier, also used to derive the cache key.
    pub doc_id: String,

    pub workspace_id: i64,

    pub organization_id: i64,
}

/// Join row linking a document to one of the vectors it produced.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVector {
    pub id: i64,
    pub doc_id: String,
    pub vector_id: String,
    pub document_id: i64,
    pub workspace_id: i64,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [DocumentVector].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentVectorInsert<'a> {
    pub doc_id: &'a str,
    pub vector_id: &'a str,
    pub document_id: i64,
    pub workspace_id: i64,
    pub organization_id: i64,
}

impl<'a> DocumentVectorInsert<'a> {
    pub fn new(document: &'a DocumentRecord, vector_id: &'a str) -> Self {
        Self {
            doc_id: &document.doc_id,
            vector_id,
            document_id: document.id,
            workspace_id: document.workspace_id,
            organization_id: document.organization_id,
        }
    }
}

/// Summary of a successfully ingested document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    pub vector_ids: Vec<String>,
    pub cache_key: String,
}

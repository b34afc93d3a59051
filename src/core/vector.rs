use super::model::{connection::ConnectorType, Hit, Namespace, RawPage, VectorRecord};
use crate::error::HubError;

/// How a backend reports closeness of a hit.
///
/// Every backend declares its own kind explicitly so the conversion to a
/// similarity is visible per backend instead of being baked into the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Higher is better, already in the similarity domain (cosine similarity, certainty).
    Similarity,

    /// Smaller is better, cosine distance in `[0, 2]`. Converted with `1 - d`.
    CosineDistance,
}

impl ScoreKind {
    /// Convert a raw backend score to a similarity-like value. The result
    /// is not clamped, see [normalize_score].
    pub fn to_similarity(self, raw: f32) -> f32 {
        match self {
            ScoreKind::Similarity => raw,
            ScoreKind::CosineDistance => 1.0 - raw,
        }
    }

    /// Convert and clamp a raw backend score to `[0, 1]`.
    pub fn normalize(self, raw: f32) -> f32 {
        normalize_score(self.to_similarity(raw))
    }
}

/// Clamp a similarity-like value to `[0, 1]`, passing everything in between
/// through unchanged. NaN is treated as no similarity.
pub fn normalize_score(value: f32) -> f32 {
    if value.is_nan() || value <= 0.0 {
        0.0
    } else if value >= 1.0 {
        1.0
    } else {
        value
    }
}

/// Vector database operations, implemented once per backend.
///
/// Every method reports failures as errors; the policy of degrading reads to
/// empty results lives in [Connector][super::connector::Connector].
#[async_trait::async_trait]
pub trait VectorDb {
    fn id(&self) -> ConnectorType;

    /// The native metric of the backend's similarity search.
    fn score_kind(&self) -> ScoreKind;

    /// Single round trip liveness probe using the backend's native health call.
    async fn heartbeat(&self) -> Result<(), HubError>;

    /// Total amount of vectors stored across all namespaces.
    async fn total_vectors(&self) -> Result<usize, HubError>;

    /// List all namespaces.
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError>;

    /// Get a single namespace, `None` if the backend does not know it.
    ///
    /// * `name`: Namespace name.
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError>;

    /// Create the namespace if it does not exist.
    ///
    /// * `name`: Namespace name.
    /// * `dimension`: Size of the vectors stored in the namespace.
    async fn ensure_namespace(&self, name: &str, dimension: usize) -> Result<(), HubError>;

    /// Read raw vectors page by page.
    ///
    /// * `name`: Namespace name.
    /// * `limit`: Page size.
    /// * `offset`: Amount of vectors to skip.
    async fn raw_get(&self, name: &str, limit: usize, offset: usize)
        -> Result<RawPage, HubError>;

    /// Store the records in the namespace in a single request.
    ///
    /// * `namespace`: Namespace to insert to.
    /// * `records`: The records to insert.
    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError>;

    /// Nearest neighbour search, best match first.
    ///
    /// * `namespace`: Namespace to search in.
    /// * `vector`: The query embedding.
    /// * `top_k`: Maximum amount of hits.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError>;

    /// Fetch the metadata of the given vectors. Every returned map contains the
    /// `vectorId` and `text` keys.
    ///
    /// * `namespace`: Namespace to fetch from.
    /// * `ids`: Vector IDs.
    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, HubError>;

    /// Delete the vectors with the given IDs. IDs that do not exist are ignored.
    ///
    /// * `namespace`: Namespace to delete from.
    /// * `ids`: Vector IDs.
    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError>;
}

/// Key added to metadata returned by [VectorDb::get_metadata].
pub const VECTOR_ID_KEY: &str = "vectorId";

/// Build the metadata map returned from [VectorDb::get_metadata].
pub fn augment_metadata(
    mut metadata: serde_json::Map<String, serde_json::Value>,
    id: &str,
    text: Option<String>,
) -> serde_json::Map<String, serde_json::Value> {
    use super::model::TEXT_KEY;
    use serde_json::Value;

    metadata.insert(VECTOR_ID_KEY.to_string(), Value::String(id.to_string()));
    let text = match text {
        Some(text) => text,
        None => metadata
            .get(TEXT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    metadata.insert(TEXT_KEY.to_string(), Value::String(text));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_clamps_and_passes_through() {
        assert_eq!(1.0, normalize_score(1.5));
        assert_eq!(1.0, normalize_score(1.0));
        assert_eq!(0.0, normalize_score(-0.2));
        assert_eq!(0.0, normalize_score(0.0));
        assert_eq!(0.42, normalize_score(0.42));
        assert_eq!(0.0, normalize_score(f32::NAN));
    }

    #[test]
    fn distance_scores_are_inverted_before_clamping() {
        assert_eq!(0.75, ScoreKind::CosineDistance.normalize(0.25));
        assert_eq!(1.0, ScoreKind::CosineDistance.normalize(0.0));
        assert_eq!(0.0, ScoreKind::CosineDistance.normalize(1.7));
        assert_eq!(0.25, ScoreKind::Similarity.normalize(0.25));
    }

    #[test]
    fn distance_inversion_preserves_ranking() {
        let distances = [0.1_f32, 0.3, 0.9];
        let scores: Vec<f32> = distances
            .iter()
            .map(|d| ScoreKind::CosineDistance.normalize(*d))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn augments_metadata_with_id_and_text() {
        let map = json!({ "title": "t", "text": "chunk" })
            .as_object()
            .cloned()
            .unwrap();
        let map = augment_metadata(map, "v1", None);
        assert_eq!(Some(&json!("v1")), map.get(VECTOR_ID_KEY));
        assert_eq!(Some(&json!("chunk")), map.get("text"));

        let map = augment_metadata(serde_json::Map::new(), "v2", Some("other".into()));
        assert_eq!(Some(&json!("other")), map.get("text"));
    }
}

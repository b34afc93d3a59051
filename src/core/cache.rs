use super::model::VectorEntry;
use crate::error::HubError;
use sha2::{Digest, Sha256};

/// Durable, backend independent snapshot of the vectors of a document.
/// Used to re-hydrate a namespace without embedding again.
#[async_trait::async_trait]
pub trait VectorCache {
    fn id(&self) -> &'static str;

    /// Store the entries under `key`, overwriting any previous snapshot.
    ///
    /// * `entries`: The vectors of a single document.
    /// * `key`: See [cache_key].
    async fn store_vector_result(&self, entries: &[VectorEntry], key: &str)
        -> Result<(), HubError>;

    /// Read a previously stored snapshot, `None` if there is none.
    ///
    /// * `key`: See [cache_key].
    async fn read_vector_result(&self, key: &str) -> Result<Option<Vec<VectorEntry>>, HubError>;
}

/// Deterministic cache file name for a document.
pub fn cache_key(doc_id: &str) -> String {
    format!("{}.json", sha256(doc_id.as_bytes()))
}

pub fn sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    hex::encode(out)
}

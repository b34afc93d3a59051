//! The uniform interface callers use to talk to any backend.
//!
//! Reads degrade to empty results with the cause logged, so that a single
//! unavailable backend never fails an aggregate view. Mutations return
//! errors the caller has to handle.

use super::model::{
    connection::ConnectorType, Count, Heartbeat, Namespace, RawPage, SimilarityResponse, TEXT_KEY,
};
use super::vector::VectorDb;
use crate::{err, error::HubError};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub mod ingest;

pub type DynVectorDb = Arc<dyn VectorDb + Send + Sync>;

/// A backend bound to the connector type it was registered with.
#[derive(Clone)]
pub struct Connector {
    ty: ConnectorType,
    db: DynVectorDb,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("type", &self.ty)
            .field("backend", &self.db.id())
            .finish()
    }
}

impl Connector {
    /// * `ty`: The connector type the backend is expected to implement.
    /// * `db`: The backend.
    pub fn new(ty: ConnectorType, db: DynVectorDb) -> Self {
        Self { ty, db }
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.ty
    }

    /// Obtain a handle to a healthy backend.
    ///
    /// Errors if the backend does not implement the expected connector type
    /// or if it fails its liveness probe.
    pub async fn connect(&self) -> Result<&DynVectorDb, HubError> {
        let (expected, actual) = (self.ty, self.db.id());
        if expected != actual {
            return err!(TypeMismatch, "expected '{expected}', backend is '{actual}'");
        }

        if let Err(e) = self.db.heartbeat().await {
            error!("{actual} | heartbeat failed: {e}");
            return err!(Unhealthy, "{actual}: {e}");
        }

        Ok(&self.db)
    }

    pub async fn heartbeat(&self) -> Heartbeat {
        match self.db.heartbeat().await {
            Ok(_) => Heartbeat {
                result: true,
                error: None,
            },
            Err(e) => {
                warn!("{} | heartbeat failed: {e}", self.ty);
                Heartbeat {
                    result: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Total amount of vectors in the backend, 0 on failure.
    pub async fn total_indicies(&self) -> Count {
        match self.db.total_vectors().await {
            Ok(result) => Count {
                result,
                error: None,
            },
            Err(e) => {
                error!("{} | counting vectors failed: {e}", self.ty);
                Count {
                    result: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// All namespaces of the backend, empty on failure.
    pub async fn namespaces(&self) -> Vec<Namespace> {
        match self.db.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!("{} | listing namespaces failed: {e}", self.ty);
                vec![]
            }
        }
    }

    /// Look up a namespace. Errors only if `name` is missing, a failed lookup
    /// yields `None`.
    ///
    /// * `name`: Namespace name.
    pub async fn namespace(&self, name: Option<&str>) -> Result<Option<Namespace>, HubError> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return err!(MissingArgument, "namespace name");
        };

        match self.db.get_namespace(name).await {
            Ok(namespace) => Ok(namespace),
            Err(e) => {
                error!("{} | namespace '{name}' lookup failed: {e}", self.ty);
                Ok(None)
            }
        }
    }

    /// Whether the namespace exists. Any error, including an empty `name`, yields `false`.
    ///
    /// * `name`: Namespace name.
    pub async fn namespace_exists(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        match self.db.get_namespace(name).await {
            Ok(namespace) => namespace.is_some(),
            Err(e) => {
                error!("{} | namespace '{name}' existence check failed: {e}", self.ty);
                false
            }
        }
    }

    /// Read a page of raw vectors. On failure the page is empty and carries the error.
    ///
    /// * `name`: Namespace name.
    /// * `page_size`: Maximum amount of vectors in the page.
    /// * `offset`: Amount of vectors to skip.
    pub async fn raw_get(&self, name: &str, page_size: usize, offset: usize) -> RawPage {
        if name.is_empty() {
            return RawPage::failed("missing namespace name");
        }

        match self.db.raw_get(name, page_size, offset).await {
            Ok(page) => page,
            Err(e) => {
                error!("{} | raw read of '{name}' failed: {e}", self.ty);
                RawPage::failed(e)
            }
        }
    }

    /// Nearest neighbour search returning at most `top_k` hits with scores
    /// normalized to `[0, 1]`, best match first. Empty on failure.
    ///
    /// * `namespace`: Namespace to search in.
    /// * `query_vector`: The query embedding.
    /// * `top_k`: Maximum amount of hits.
    pub async fn similarity_response(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> SimilarityResponse {
        let mut response = SimilarityResponse::default();

        if top_k == 0 || query_vector.is_empty() || namespace.is_empty() {
            warn!(
                "{} | invalid similarity query (namespace: '{namespace}', dim: {}, top_k: {top_k})",
                self.ty,
                query_vector.len()
            );
            return response;
        }

        let hits = match self.db.query(namespace, query_vector, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("{} | similarity query on '{namespace}' failed: {e}", self.ty);
                return response;
            }
        };

        let score_kind = self.db.score_kind();

        for hit in hits.into_iter().take(top_k) {
            let text = hit
                .text
                .or_else(|| {
                    hit.metadata
                        .get(TEXT_KEY)
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or_default();
            let score = score_kind.normalize(hit.raw_score);
            response.push(hit.id, text, hit.metadata, score);
        }

        debug!(
            "{} | {} hit(s) in '{namespace}' (top_k: {top_k})",
            self.ty,
            response.len()
        );

        response
    }

    /// Metadata of the given vectors, each augmented with `vectorId` and `text`.
    /// Empty on failure.
    ///
    /// * `namespace`: Namespace to fetch from.
    /// * `vector_ids`: Vector IDs.
    pub async fn get_metadata(
        &self,
        namespace: &str,
        vector_ids: &[String],
    ) -> Vec<Map<String, Value>> {
        if vector_ids.is_empty() {
            return vec![];
        }

        match self.db.get_metadata(namespace, vector_ids).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("{} | fetching metadata from '{namespace}' failed: {e}", self.ty);
                vec![]
            }
        }
    }

    /// Delete vectors by ID. Does not check that the vectors exist.
    ///
    /// * `namespace`: Namespace to delete from.
    /// * `vector_ids`: Vector IDs.
    pub async fn delete_vectors(
        &self,
        namespace: &str,
        vector_ids: &[String],
    ) -> Result<(), HubError> {
        if namespace.is_empty() {
            return err!(MissingArgument, "namespace name");
        }

        if vector_ids.is_empty() {
            return Ok(());
        }

        let db = self.connect().await?;

        if let Err(e) = db.delete_vectors(namespace, vector_ids).await {
            error!("{} | deleting vectors from '{namespace}' failed: {e}", self.ty);
            return Err(e);
        }

        debug!(
            "{} | deleted {} vector(s) from '{namespace}'",
            self.ty,
            vector_ids.len()
        );

        Ok(())
    }
}

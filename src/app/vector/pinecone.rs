use super::{base_url, flatten_metadata, page_end, parse_settings, read_empty, read_json};
use crate::core::model::{
    connection::ConnectorType, metadata_from_value, Hit, Namespace, RawPage, VectorEntry,
    VectorRecord,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::{err, error::HubError, map_err};
use dto::{FetchResponse, IndexDescription, IndexStats, ListResponse, QueryResponse};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use validify::Validify;

pub const PINECONE_CONTROLLER_URL: &str = "https://api.pinecone.io";

const PINECONE_API_VERSION: &str = "2024-07";

/// Maximum page size of the list endpoint.
const LIST_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
pub struct PineconeSettings {
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub api_key: String,

    /// Name of the index. Pinecone namespaces live inside it.
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub index: String,

    /// Control plane endpoint, defaults to [PINECONE_CONTROLLER_URL].
    pub controller_url: Option<String>,
}

/// A single Pinecone index. Its namespaces are the connector's namespaces.
///
/// The data plane host is resolved from the control plane on first use.
pub struct PineconeDb {
    settings: PineconeSettings,
    client: OnceCell<reqwest::Client>,
    host: OnceCell<String>,
}

impl PineconeDb {
    pub fn new(settings: PineconeSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
            host: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Value) -> Result<Self, HubError> {
        Ok(Self::new(parse_settings(settings)?))
    }

    async fn client(&self) -> Result<&reqwest::Client, HubError> {
        self.client
            .get_or_try_init(|| async {
                let mut headers = HeaderMap::new();

                let key = match HeaderValue::from_str(&self.settings.api_key) {
                    Ok(key) => key,
                    Err(e) => return err!(InvalidArgument, "pinecone api key: {e}"),
                };

                headers.insert("Api-Key", key);
                headers.insert(
                    "X-Pinecone-API-Version",
                    HeaderValue::from_static(PINECONE_API_VERSION),
                );

                Ok(map_err!(reqwest::Client::builder()
                    .default_headers(headers)
                    .build()))
            })
            .await
    }

    fn controller_url(&self) -> &str {
        base_url(
            self.settings
                .controller_url
                .as_deref()
                .unwrap_or(PINECONE_CONTROLLER_URL),
        )
    }

    async fn describe_index(&self) -> Result<IndexDescription, HubError> {
        let client = self.client().await?;
        let url = format!("{}/indexes/{}", self.controller_url(), self.settings.index);
        let response = map_err!(client.get(url).send().await);
        read_json(response).await
    }

    /// Data plane URL of the index.
    async fn host(&self) -> Result<&str, HubError> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let index = self.describe_index().await?;
                info!("Resolved pinecone index '{}' to {}", index.name, index.host);
                Ok::<_, HubError>(if index.host.starts_with("http") {
                    base_url(&index.host).to_string()
                } else {
                    format!("https://{}", base_url(&index.host))
                })
            })
            .await?;
        Ok(host.as_str())
    }

    async fn stats(&self) -> Result<IndexStats, HubError> {
        let client = self.client().await?;
        let url = format!("{}/describe_index_stats", self.host().await?);
        let response = map_err!(client.post(url).json(&json!({})).send().await);
        read_json(response).await
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<FetchResponse, HubError> {
        let client = self.client().await?;
        let url = format!("{}/vectors/fetch", self.host().await?);

        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", namespace));

        let response = map_err!(client.get(url).query(&query).send().await);
        read_json(response).await
    }

    /// List vector IDs in the namespace until `amount` are collected or the namespace is exhausted.
    async fn list_ids(&self, namespace: &str, amount: usize) -> Result<Vec<String>, HubError> {
        let client = self.client().await?;
        let url = format!("{}/vectors/list", self.host().await?);

        let mut ids = Vec::with_capacity(amount.min(LIST_PAGE_LIMIT));
        let mut token: Option<String> = None;

        while ids.len() < amount {
            let limit = LIST_PAGE_LIMIT.min(amount - ids.len()).to_string();
            let mut query = vec![("namespace", namespace), ("limit", limit.as_str())];
            if let Some(ref token) = token {
                query.push(("paginationToken", token.as_str()));
            }

            let response = map_err!(client.get(&url).query(&query).send().await);
            let page: ListResponse = read_json(response).await?;

            if page.vectors.is_empty() {
                break;
            }

            ids.extend(page.vectors.into_iter().map(|v| v.id));

            match page.pagination.and_then(|p| p.next) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }
}

#[async_trait::async_trait]
impl VectorDb for PineconeDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::Pinecone
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        let index = self.describe_index().await?;
        if !index.status.ready {
            return err!(
                Unhealthy,
                "pinecone index '{}' is not ready ({})",
                index.name,
                index.status.state.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        Ok(self.stats().await?.total_vector_count)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        Ok(self
            .stats()
            .await?
            .namespaces
            .into_iter()
            .map(|(name, ns)| Namespace::new(name, ns.vector_count))
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        Ok(self
            .stats()
            .await?
            .namespaces
            .remove(name)
            .map(|ns| Namespace::new(name, ns.vector_count)))
    }

    async fn ensure_namespace(&self, name: &str, _dimension: usize) -> Result<(), HubError> {
        // Pinecone creates namespaces on first upsert.
        debug!("pinecone | namespace '{name}' is created on upsert");
        Ok(())
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let end = page_end(limit, offset)?;
        let ids: Vec<String> = self
            .list_ids(name, end)
            .await?
            .into_iter()
            .skip(offset)
            .collect();

        if ids.is_empty() {
            return Ok(RawPage::new(vec![]));
        }

        let mut fetched = self.fetch(name, &ids).await?.vectors;

        let entries = ids
            .iter()
            .filter_map(|id| fetched.remove(id))
            .map(|v| VectorEntry {
                vector_id: v.id,
                values: v.values.unwrap_or_default(),
                metadata: metadata_from_value(v.metadata.unwrap_or(Value::Null)),
            })
            .collect();

        Ok(RawPage::new(entries))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        let client = self.client().await?;
        let url = format!("{}/vectors/upsert", self.host().await?);

        let vectors: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "values": r.embedding,
                    "metadata": flatten_metadata(&r.metadata),
                })
            })
            .collect();

        let response = map_err!(
            client
                .post(url)
                .json(&json!({ "vectors": vectors, "namespace": namespace }))
                .send()
                .await
        );

        read_empty(response).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        let client = self.client().await?;
        let url = format!("{}/query", self.host().await?);

        let response = map_err!(
            client
                .post(url)
                .json(&json!({
                    "namespace": namespace,
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }))
                .send()
                .await
        );

        let response: QueryResponse = read_json(response).await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| Hit {
                id: m.id,
                raw_score: m.score,
                text: None,
                metadata: metadata_from_value(m.metadata.unwrap_or(Value::Null)),
            })
            .collect())
    }

    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, HubError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut fetched = self.fetch(namespace, ids).await?.vectors;

        Ok(ids
            .iter()
            .filter_map(|id| fetched.remove(id))
            .map(|v| {
                let metadata = metadata_from_value(v.metadata.unwrap_or(Value::Null));
                augment_metadata(metadata, &v.id, None)
            })
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let client = self.client().await?;
        let url = format!("{}/vectors/delete", self.host().await?);

        let response = map_err!(
            client
                .post(url)
                .json(&json!({ "ids": ids, "namespace": namespace }))
                .send()
                .await
        );

        read_empty(response).await
    }
}

mod dto {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct IndexDescription {
        pub name: String,
        pub host: String,
        pub status: IndexStatus,
    }

    #[derive(Debug, Deserialize)]
    pub struct IndexStatus {
        pub ready: bool,
        pub state: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct IndexStats {
        #[serde(default)]
        pub namespaces: HashMap<String, NamespaceStats>,
        #[serde(default)]
        pub total_vector_count: usize,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct NamespaceStats {
        pub vector_count: usize,
    }

    #[derive(Debug, Deserialize)]
    pub struct QueryResponse {
        #[serde(default)]
        pub matches: Vec<Match>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Match {
        pub id: String,
        pub score: f32,
        pub metadata: Option<Value>,
    }

    #[derive(Debug, Deserialize)]
    pub struct FetchResponse {
        #[serde(default)]
        pub vectors: HashMap<String, FetchedVector>,
    }

    #[derive(Debug, Deserialize)]
    pub struct FetchedVector {
        pub id: String,
        pub values: Option<Vec<f32>>,
        pub metadata: Option<Value>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ListResponse {
        #[serde(default)]
        pub vectors: Vec<ListedVector>,
        pub pagination: Option<Pagination>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ListedVector {
        pub id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Pagination {
        pub next: Option<String>,
    }
}

#[cfg(test)]
mod pinecone_tests {
    use super::*;
    use crate::core::connector::Connector;
    use std::sync::Arc;
    use wiremock::{
        matchers::{body_partial_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    async fn setup(ready: bool) -> (MockServer, PineconeDb) {
        let server = MockServer::start().await;
        let state = if ready { "Ready" } else { "Initializing" };

        Mock::given(method("GET"))
            .and(path("/indexes/docs"))
            .and(header("Api-Key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "docs",
                "dimension": 3,
                "metric": "cosine",
                "host": server.uri(),
                "status": { "ready": ready, "state": state }
            })))
            .mount(&server)
            .await;

        let db = PineconeDb::from_settings(&json!({
            "apiKey": "key",
            "index": "docs",
            "controllerUrl": server.uri()
        }))
        .unwrap();

        (server, db)
    }

    #[test]
    fn requires_api_key_and_index() {
        assert!(PineconeDb::from_settings(&json!({ "index": "docs" })).is_err());
        assert!(PineconeDb::from_settings(&json!({ "apiKey": " ", "index": "docs" })).is_err());
        assert!(PineconeDb::from_settings(&json!({ "apiKey": "k", "index": "docs" })).is_ok());
    }

    #[tokio::test]
    async fn heartbeat_requires_ready_index() {
        let (_server, db) = setup(true).await;
        db.heartbeat().await.unwrap();

        let (_server, db) = setup(false).await;
        assert!(db.heartbeat().await.is_err());
    }

    #[tokio::test]
    async fn namespaces_come_from_stats() {
        let (server, db) = setup(true).await;

        Mock::given(method("POST"))
            .and(path("/describe_index_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "namespaces": { "a": { "vectorCount": 4 }, "b": { "vectorCount": 1 } },
                "dimension": 3,
                "totalVectorCount": 5
            })))
            .mount(&server)
            .await;

        assert_eq!(5, db.total_vectors().await.unwrap());
        assert_eq!(2, db.list_namespaces().await.unwrap().len());
        assert_eq!(4, db.get_namespace("a").await.unwrap().unwrap().count);
        assert!(db.get_namespace("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_returns_similarity_scores() {
        let (server, db) = setup(true).await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(body_partial_json(json!({ "namespace": "a", "topK": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{ "id": "v1", "score": 0.83, "metadata": { "text": "hello" } }]
            })))
            .mount(&server)
            .await;

        let hits = db.query("a", &[0.1, 0.2, 0.3], 1).await.unwrap();
        assert_eq!(1, hits.len());
        assert_eq!("v1", hits[0].id);
        assert!((hits[0].raw_score - 0.83).abs() < 1e-6);
        assert_eq!(Some(&json!("hello")), hits[0].metadata.get("text"));
    }

    #[tokio::test]
    async fn raw_get_pages_through_list() {
        let (server, db) = setup(true).await;

        Mock::given(method("GET"))
            .and(path("/vectors/list"))
            .and(query_param("namespace", "a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vectors": [{ "id": "v1" }, { "id": "v2" }, { "id": "v3" }],
                "pagination": null
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/vectors/fetch"))
            .and(query_param("ids", "v3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vectors": {
                    "v3": { "id": "v3", "values": [1.0, 0.0, 0.0], "metadata": { "text": "c" } }
                }
            })))
            .mount(&server)
            .await;

        let page = db.raw_get("a", 5, 2).await.unwrap();
        assert_eq!(vec!["v3"], page.ids);
        assert_eq!(vec![1.0, 0.0, 0.0], page.data[0].values);
        assert!(page.error.is_none());
    }

    #[tokio::test]
    async fn deletes_by_id() {
        let (server, db) = setup(true).await;

        Mock::given(method("POST"))
            .and(path("/vectors/delete"))
            .and(body_partial_json(json!({ "ids": ["v1", "v2"], "namespace": "a" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        db.delete_vectors("a", &["v1".to_string(), "v2".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn raw_get_out_of_range_page_is_an_error() {
        let (server, db) = setup(true).await;

        Mock::given(method("GET"))
            .and(path("/vectors/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vectors": [],
                "pagination": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connector = Connector::new(ConnectorType::Pinecone, Arc::new(db));

        let page = connector.raw_get("a", usize::MAX, 1).await;
        assert!(page.ids.is_empty());
        assert!(page.data.is_empty());
        assert!(page.error.is_some());

        let page = connector.raw_get("a", usize::MAX, 0).await;
        assert!(page.data.is_empty());
        assert!(page.error.is_none());
    }
}

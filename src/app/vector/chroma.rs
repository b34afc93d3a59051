use super::{base_url, flatten_metadata, parse_settings, read_empty, read_json};
use crate::core::model::{
    connection::ConnectorType, metadata_from_value, Hit, Namespace, RawPage, VectorEntry,
    VectorRecord,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::{err, error::HubError, map_err};
use dto::{ChromaCollection, GetResult, QueryResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use validify::{schema_err, schema_validation, ValidationErrors, Validify};

/// Connection settings of a Chroma instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
#[validate(Self::validate_schema)]
pub struct ChromaSettings {
    #[serde(rename = "instanceURL")]
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub instance_url: String,

    /// Token sent with every request, requires `auth_token_header`.
    pub auth_token: Option<String>,

    /// The header the token is sent in. For `Authorization` the token is sent as a bearer token.
    pub auth_token_header: Option<String>,
}

impl ChromaSettings {
    #[schema_validation]
    fn validate_schema(&self) -> Result<(), ValidationErrors> {
        let ChromaSettings {
            auth_token,
            auth_token_header,
            ..
        } = self;
        match (auth_token, auth_token_header) {
            (Some(token), None) if !token.is_empty() => {
                schema_err!(
                    "auth_token_header",
                    "an auth token requires the header it is sent in"
                );
            }
            (Some(token), Some(header)) if !token.is_empty() && header.trim().is_empty() => {
                schema_err!(
                    "auth_token_header",
                    "an auth token requires the header it is sent in"
                );
            }
            _ => {}
        }
    }
}

/// Chroma over its REST API. Collections are namespaces and are created
/// in cosine space, so query distances are cosine distances.
pub struct ChromaDb {
    settings: ChromaSettings,
    client: OnceCell<reqwest::Client>,
}

impl ChromaDb {
    pub fn new(settings: ChromaSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Value) -> Result<Self, HubError> {
        Ok(Self::new(parse_settings(settings)?))
    }

    async fn client(&self) -> Result<&reqwest::Client, HubError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to chroma at {}", self.settings.instance_url);

                let mut headers = HeaderMap::new();

                if let (Some(token), Some(header)) = (
                    &self.settings.auth_token,
                    &self.settings.auth_token_header,
                ) {
                    let name = match HeaderName::from_bytes(header.trim().as_bytes()) {
                        Ok(name) => name,
                        Err(e) => return err!(InvalidArgument, "auth header '{header}': {e}"),
                    };

                    let value = if name == AUTHORIZATION {
                        format!("Bearer {token}")
                    } else {
                        token.clone()
                    };

                    let value = match HeaderValue::from_str(&value) {
                        Ok(value) => value,
                        Err(e) => return err!(InvalidArgument, "auth token: {e}"),
                    };

                    headers.insert(name, value);
                }

                Ok(map_err!(reqwest::Client::builder()
                    .default_headers(headers)
                    .build()))
            })
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", base_url(&self.settings.instance_url))
    }

    /// Get a collection by name, `None` if Chroma reports it as missing.
    async fn collection(&self, name: &str) -> Result<Option<ChromaCollection>, HubError> {
        let name = collection_name(name)?;
        let client = self.client().await?;
        let response = map_err!(client.get(self.url(&format!("collections/{name}"))).send().await);

        let status = response.status();
        if status.is_success() {
            return Ok(Some(map_err!(response.json().await)));
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND || body.contains("does not exist") {
            debug!("chroma | collection '{name}' does not exist");
            return Ok(None);
        }

        err!(Transport, "chroma responded with {status}: {body}")
    }

    async fn existing_collection(&self, name: &str) -> Result<ChromaCollection, HubError> {
        match self.collection(name).await? {
            Some(collection) => Ok(collection),
            None => err!(DoesNotExist, "Chroma collection '{name}'"),
        }
    }

    async fn count(&self, collection_id: &str) -> Result<usize, HubError> {
        let client = self.client().await?;
        let response = map_err!(
            client
                .get(self.url(&format!("collections/{collection_id}/count")))
                .send()
                .await
        );
        read_json(response).await
    }

    async fn get(&self, collection_id: &str, body: Value) -> Result<GetResult, HubError> {
        let client = self.client().await?;
        let response = map_err!(
            client
                .post(self.url(&format!("collections/{collection_id}/get")))
                .json(&body)
                .send()
                .await
        );
        read_json(response).await
    }
}

#[async_trait::async_trait]
impl VectorDb for ChromaDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::Chroma
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::CosineDistance
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        let client = self.client().await?;
        let response = map_err!(client.get(self.url("heartbeat")).send().await);
        read_empty(response).await
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        Ok(self
            .list_namespaces()
            .await?
            .iter()
            .map(|ns| ns.count)
            .sum())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        let client = self.client().await?;
        let response = map_err!(client.get(self.url("collections")).send().await);
        let collections: Vec<ChromaCollection> = read_json(response).await?;

        let mut namespaces = Vec::with_capacity(collections.len());

        for collection in collections {
            let count = self.count(&collection.id).await?;
            namespaces.push(collection.into_namespace(count));
        }

        Ok(namespaces)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        let Some(collection) = self.collection(name).await? else {
            return Ok(None);
        };
        let count = self.count(&collection.id).await?;
        Ok(Some(collection.into_namespace(count)))
    }

    async fn ensure_namespace(&self, name: &str, _dimension: usize) -> Result<(), HubError> {
        let name = collection_name(name)?;
        let client = self.client().await?;
        let response = map_err!(
            client
                .post(self.url("collections"))
                .json(&json!({
                    "name": name,
                    "metadata": { "hnsw:space": "cosine" },
                    "get_or_create": true
                }))
                .send()
                .await
        );
        read_empty(response).await
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let collection = self.existing_collection(name).await?;

        let result = self
            .get(
                &collection.id,
                json!({
                    "limit": limit,
                    "offset": offset,
                    "include": ["embeddings", "metadatas", "documents"]
                }),
            )
            .await?;

        let entries = result
            .into_rows()
            .map(|row| VectorEntry {
                vector_id: row.id,
                values: row.embedding.unwrap_or_default(),
                metadata: row.metadata,
            })
            .collect();

        Ok(RawPage::new(entries))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        let collection = self.existing_collection(namespace).await?;
        let client = self.client().await?;

        let body = json!({
            "ids": records.iter().map(|r| &r.id).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| &r.embedding).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|r| flatten_metadata(&r.metadata)).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| &r.text).collect::<Vec<_>>(),
        });

        let response = map_err!(
            client
                .post(self.url(&format!("collections/{}/add", collection.id)))
                .json(&body)
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
        let collection = self.existing_collection(namespace).await?;
        let client = self.client().await?;

        let response = map_err!(
            client
                .post(self.url(&format!("collections/{}/query", collection.id)))
                .json(&json!({
                    "query_embeddings": [vector],
                    "n_results": top_k,
                    "include": ["metadatas", "documents", "distances"]
                }))
                .send()
                .await
        );

        let result: QueryResult = read_json(response).await?;

        Ok(result.into_hits())
    }

    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, HubError> {
        let collection = self.existing_collection(namespace).await?;

        let result = self
            .get(
                &collection.id,
                json!({ "ids": ids, "include": ["metadatas", "documents"] }),
            )
            .await?;

        Ok(result
            .into_rows()
            .map(|row| augment_metadata(row.metadata, &row.id, row.document))
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let collection = self.existing_collection(namespace).await?;
        let client = self.client().await?;

        let response = map_err!(
            client
                .post(self.url(&format!("collections/{}/delete", collection.id)))
                .json(&json!({ "ids": ids }))
                .send()
                .await
        );

        read_empty(response).await
    }
}

/// Collection names end up in URL paths, so only the characters Chroma
/// itself allows in them are accepted.
fn collection_name(name: &str) -> Result<&str, HubError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !valid {
        return err!(InvalidArgument, "invalid chroma collection name '{name}'");
    }

    Ok(name)
}

mod dto {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct ChromaCollection {
        pub id: String,
        pub name: String,
        pub metadata: Option<Map<String, Value>>,
    }

    impl ChromaCollection {
        pub fn into_namespace(self, count: usize) -> Namespace {
            Namespace::new(self.name, count).with_metadata(self.metadata.unwrap_or_default())
        }
    }

    /// Response of the `get` endpoint. Every list is parallel to `ids`.
    #[derive(Debug, Deserialize)]
    pub struct GetResult {
        pub ids: Vec<String>,
        pub embeddings: Option<Vec<Option<Vec<f32>>>>,
        pub metadatas: Option<Vec<Option<Value>>>,
        pub documents: Option<Vec<Option<String>>>,
    }

    pub struct Row {
        pub id: String,
        pub embedding: Option<Vec<f32>>,
        pub metadata: Map<String, Value>,
        pub document: Option<String>,
    }

    impl GetResult {
        pub fn into_rows(self) -> impl Iterator<Item = Row> {
            let mut embeddings = self.embeddings.unwrap_or_default().into_iter();
            let mut metadatas = self.metadatas.unwrap_or_default().into_iter();
            let mut documents = self.documents.unwrap_or_default().into_iter();

            self.ids.into_iter().map(move |id| Row {
                id,
                embedding: embeddings.next().flatten(),
                metadata: metadata_from_value(metadatas.next().flatten().unwrap_or(Value::Null)),
                document: documents.next().flatten(),
            })
        }
    }

    /// Response of the `query` endpoint. Outer lists have one element per query embedding.
    #[derive(Debug, Deserialize)]
    pub struct QueryResult {
        pub ids: Vec<Vec<String>>,
        pub distances: Option<Vec<Vec<f32>>>,
        pub metadatas: Option<Vec<Vec<Option<Value>>>>,
        pub documents: Option<Vec<Vec<Option<String>>>>,
    }

    /// The results of the first query embedding.
    fn first<T>(v: Option<Vec<Vec<T>>>) -> Option<Vec<T>> {
        v.and_then(|v| v.into_iter().next())
    }

    impl QueryResult {
        pub fn into_hits(self) -> Vec<Hit> {
            let Some(ids) = self.ids.into_iter().next() else {
                return vec![];
            };

            let mut distances = first(self.distances).unwrap_or_default().into_iter();
            let mut metadatas = first(self.metadatas).unwrap_or_default().into_iter();
            let mut documents = first(self.documents).unwrap_or_default().into_iter();

            ids.into_iter()
                .map(|id| Hit {
                    id,
                    raw_score: distances.next().unwrap_or(f32::NAN),
                    metadata: metadata_from_value(
                        metadatas.next().flatten().unwrap_or(Value::Null),
                    ),
                    text: documents.next().flatten(),
                })
                .collect()
        }
    }
}

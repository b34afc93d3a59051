use super::{base_url, parse_settings};
use crate::core::model::{
    connection::ConnectorType, metadata_from_value, Hit, Namespace, RawPage, VectorEntry,
    VectorRecord, TEXT_KEY,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::{err, error::HubError, map_err};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use validify::{schema_err, schema_validation, ValidationErrors, Validify};

const ID_FIELD: &str = "id";
const VECTOR_FIELD: &str = "vector";
const METADATA_FIELD: &str = "metadata";
const ID_MAX_LENGTH: &str = "255";

#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
#[validate(Self::validate_schema)]
pub struct MilvusSettings {
    /// Base URL of the Milvus proxy, e.g. `http://localhost:19530`.
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub host: String,

    /// API token, takes precedence over username and password.
    pub token: Option<String>,

    pub username: Option<String>,

    pub password: Option<String>,
}

impl MilvusSettings {
    #[schema_validation]
    fn validate_schema(&self) -> Result<(), ValidationErrors> {
        if self.username.is_some() != self.password.is_some() {
            schema_err!(
                "username!=password",
                "username and password must be given together"
            );
        }
    }

    fn bearer(&self) -> Option<String> {
        match (&self.token, &self.username, &self.password) {
            (Some(token), _, _) => Some(token.clone()),
            (None, Some(user), Some(password)) => Some(format!("{user}:{password}")),
            _ => None,
        }
    }
}

/// Milvus over its v2 RESTful API. Collections are created with the
/// `COSINE` metric, for which search distances are similarities.
///
/// Chunk text and metadata are stored in dynamic fields.
pub struct MilvusDb {
    settings: MilvusSettings,
    client: OnceCell<reqwest::Client>,
}

/// Every v2 response is wrapped in a code envelope, with `0` denoting success.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

impl MilvusDb {
    pub fn new(settings: MilvusSettings) -> Self {
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
                info!("Connecting to milvus at {}", self.settings.host);

                let mut headers = HeaderMap::new();
                if let Some(bearer) = self.settings.bearer() {
                    let value = match HeaderValue::from_str(&format!("Bearer {bearer}")) {
                        Ok(value) => value,
                        Err(e) => return err!(InvalidArgument, "milvus credentials: {e}"),
                    };
                    headers.insert(AUTHORIZATION, value);
                }

                Ok(map_err!(reqwest::Client::builder()
                    .default_headers(headers)
                    .build()))
            })
            .await
    }

    /// POST to a v2 endpoint and unwrap its envelope.
    async fn call<T>(&self, endpoint: &str, body: Value) -> Result<Option<T>, HubError>
    where
        T: DeserializeOwned,
    {
        let client = self.client().await?;
        let url = format!(
            "{}/v2/vectordb/{endpoint}",
            base_url(&self.settings.host)
        );

        let response = map_err!(client.post(&url).json(&body).send().await);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return err!(Transport, "{url} responded with {status}: {body}");
        }

        let envelope: Envelope<T> = map_err!(response.json().await);

        if envelope.code != 0 {
            return err!(
                Transport,
                "milvus {endpoint} failed with code {}: {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            );
        }

        Ok(envelope.data)
    }

    async fn has_collection(&self, name: &str) -> Result<bool, HubError> {
        #[derive(Deserialize)]
        struct Has {
            has: bool,
        }

        let has: Option<Has> = self
            .call("collections/has", json!({ "collectionName": name }))
            .await?;

        Ok(has.is_some_and(|h| h.has))
    }

    async fn row_count(&self, name: &str) -> Result<usize, HubError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Stats {
            row_count: usize,
        }

        let stats: Option<Stats> = self
            .call("collections/get_stats", json!({ "collectionName": name }))
            .await?;

        Ok(stats.map(|s| s.row_count).unwrap_or_default())
    }

    async fn collection_names(&self) -> Result<Vec<String>, HubError> {
        let names: Option<Vec<String>> = self.call("collections/list", json!({})).await?;
        Ok(names.unwrap_or_default())
    }
}

/// Split an entity returned from Milvus into its ID, vector, text and metadata.
fn split_entity(
    mut entity: Map<String, Value>,
) -> (String, Option<Vec<f32>>, Option<String>, Map<String, Value>) {
    let id = match entity.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let vector = entity
        .remove(VECTOR_FIELD)
        .and_then(|v| serde_json::from_value(v).ok());

    let text = match entity.remove(TEXT_KEY) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    };

    let metadata = entity
        .remove(METADATA_FIELD)
        .map(metadata_from_value)
        .unwrap_or_default();

    (id, vector, text, metadata)
}

/// Build a Milvus boolean expression matching the given primary keys.
fn id_filter(ids: &[String]) -> Result<String, HubError> {
    Ok(format!("{ID_FIELD} in {}", map_err!(serde_json::to_string(ids))))
}

#[async_trait::async_trait]
impl VectorDb for MilvusDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::Milvus
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        self.collection_names().await.map(|_| ())
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        let mut total = 0;
        for name in self.collection_names().await? {
            total += self.row_count(&name).await?;
        }
        Ok(total)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        let names = self.collection_names().await?;
        let mut namespaces = Vec::with_capacity(names.len());
        for name in names {
            let count = self.row_count(&name).await?;
            namespaces.push(Namespace::new(name, count));
        }
        Ok(namespaces)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        if !self.has_collection(name).await? {
            return Ok(None);
        }
        let count = self.row_count(name).await?;
        Ok(Some(Namespace::new(name, count)))
    }

    async fn ensure_namespace(&self, name: &str, dimension: usize) -> Result<(), HubError> {
        if self.has_collection(name).await? {
            return Ok(());
        }

        debug!("milvus | creating collection '{name}' ({dimension})");

        let _: Option<Value> = self
            .call(
                "collections/create",
                json!({
                    "collectionName": name,
                    "dimension": dimension,
                    "metricType": "COSINE",
                    "primaryFieldName": ID_FIELD,
                    "idType": "VarChar",
                    "vectorFieldName": VECTOR_FIELD,
                    "params": { "max_length": ID_MAX_LENGTH }
                }),
            )
            .await?;

        Ok(())
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let entities: Option<Vec<Map<String, Value>>> = self
            .call(
                "entities/query",
                json!({
                    "collectionName": name,
                    "filter": "",
                    "limit": limit,
                    "offset": offset,
                    "outputFields": [ID_FIELD, VECTOR_FIELD, TEXT_KEY, METADATA_FIELD]
                }),
            )
            .await?;

        let entries = entities
            .unwrap_or_default()
            .into_iter()
            .map(split_entity)
            .map(|(id, vector, _, metadata)| VectorEntry {
                vector_id: id,
                values: vector.unwrap_or_default(),
                metadata,
            })
            .collect();

        Ok(RawPage::new(entries))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        let data: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    ID_FIELD: r.id,
                    VECTOR_FIELD: r.embedding,
                    TEXT_KEY: r.text,
                    METADATA_FIELD: r.metadata,
                })
            })
            .collect();

        let _: Option<Value> = self
            .call(
                "entities/insert",
                json!({ "collectionName": namespace, "data": data }),
            )
            .await?;

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        let results: Option<Vec<Map<String, Value>>> = self
            .call(
                "entities/search",
                json!({
                    "collectionName": namespace,
                    "data": [vector],
                    "annsField": VECTOR_FIELD,
                    "limit": top_k,
                    "outputFields": [TEXT_KEY, METADATA_FIELD]
                }),
            )
            .await?;

        Ok(results
            .unwrap_or_default()
            .into_iter()
            .map(|mut entity| {
                let raw_score = entity
                    .remove("distance")
                    .and_then(|d| d.as_f64())
                    .map(|d| d as f32)
                    .unwrap_or(f32::NAN);
                let (id, _, text, metadata) = split_entity(entity);
                Hit {
                    id,
                    raw_score,
                    text,
                    metadata,
                }
            })
            .collect())
    }

    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, HubError> {
        let entities: Option<Vec<Map<String, Value>>> = self
            .call(
                "entities/get",
                json!({
                    "collectionName": namespace,
                    "id": ids,
                    "outputFields": [TEXT_KEY, METADATA_FIELD]
                }),
            )
            .await?;

        Ok(entities
            .unwrap_or_default()
            .into_iter()
            .map(split_entity)
            .map(|(id, _, text, metadata)| augment_metadata(metadata, &id, text))
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let _: Option<Value> = self
            .call(
                "entities/delete",
                json!({ "collectionName": namespace, "filter": id_filter(ids)? }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod milvus_tests {
    use super::*;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn milvus(server: &MockServer) -> MilvusDb {
        MilvusDb::from_settings(&json!({ "host": server.uri(), "token": "root:Milvus" })).unwrap()
    }

    #[test]
    fn credentials_come_in_pairs() {
        let only_user = json!({ "host": "http://localhost:19530", "username": "root" });
        assert!(MilvusDb::from_settings(&only_user).is_err());

        let only_pass = json!({ "host": "http://localhost:19530", "password": "pw" });
        assert!(MilvusDb::from_settings(&only_pass).is_err());

        let both = json!({ "host": "http://localhost:19530", "username": "root", "password": "pw" });
        let db = MilvusDb::from_settings(&both).unwrap();
        assert_eq!(Some("root:pw".to_string()), db.settings.bearer());

        assert!(MilvusDb::from_settings(&json!({ "host": "" })).is_err());
    }

    #[test]
    fn builds_id_filter() {
        let filter = id_filter(&["v1".to_string(), "v\"2".to_string()]).unwrap();
        assert_eq!(r#"id in ["v1","v\"2"]"#, filter);
    }

    #[tokio::test]
    async fn error_code_is_a_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/list"))
            .and(header("authorization", "Bearer root:Milvus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1800,
                "message": "user hasn't authenticated"
            })))
            .mount(&server)
            .await;

        let err = milvus(&server).heartbeat().await.unwrap_err();
        assert!(err.to_string().contains("user hasn't authenticated"));
    }

    #[tokio::test]
    async fn lists_collections_with_row_counts() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": ["docs"] })),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/get_stats"))
            .and(body_partial_json(json!({ "collectionName": "docs" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "code": 0, "data": { "rowCount": 12 } })),
            )
            .mount(&server)
            .await;

        let db = milvus(&server);
        db.heartbeat().await.unwrap();

        let namespaces = db.list_namespaces().await.unwrap();
        assert_eq!(1, namespaces.len());
        assert_eq!("docs", namespaces[0].name);
        assert_eq!(12, namespaces[0].count);
        assert_eq!(12, db.total_vectors().await.unwrap());
    }

    #[tokio::test]
    async fn creates_missing_collection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/has"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "code": 0, "data": { "has": false } })),
            )
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/create"))
            .and(body_partial_json(json!({
                "collectionName": "docs",
                "dimension": 3,
                "metricType": "COSINE"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
            .expect(1)
            .mount(&server)
            .await;

        milvus(&server).ensure_namespace("docs", 3).await.unwrap();
    }

    #[tokio::test]
    async fn search_hits_keep_text_and_metadata() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/search"))
            .and(body_partial_json(json!({ "collectionName": "docs", "limit": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    { "id": "v1", "distance": 0.91, "text": "one", "metadata": { "title": "T" } },
                    { "id": "v2", "distance": 0.55, "text": "two", "metadata": "not json" }
                ]
            })))
            .mount(&server)
            .await;

        let hits = milvus(&server).query("docs", &[0.1, 0.2, 0.3], 2).await.unwrap();

        assert_eq!(2, hits.len());
        assert_eq!("v1", hits[0].id);
        assert_eq!(Some("one".to_string()), hits[0].text);
        assert_eq!(Some(&json!("T")), hits[0].metadata.get("title"));
        assert!((hits[1].raw_score - 0.55).abs() < 1e-6);
        assert_eq!(Some(&json!("not json")), hits[1].metadata.get("text"));
    }
}

use super::{parse_settings, to_u32};
use crate::core::model::{
    connection::ConnectorType, parse_metadata, Hit, Namespace, RawPage, VectorEntry,
    VectorRecord, TEXT_KEY,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::{err, error::HubError, map_err};
use dto::{AdditionalProps, WeaviateError, WeaviateObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;
use validify::Validify;
use weaviate_community::{
    collections::{
        auth::AuthApiKey,
        batch::{BatchDeleteRequest, MatchConfig},
        error::SchemaError,
        objects::{ConsistencyLevel, MultiObjects, Object},
        query::{GetQuery, RawQuery},
        schema::{Class, Properties, PropertyBuilder},
    },
    WeaviateClient,
};

/// Metadata is stored as its JSON string since classes have a fixed set of properties.
const METADATA_PROPERTY: &str = "metadata";

#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
pub struct WeaviateSettings {
    /// REST endpoint of the cluster, e.g. `http://localhost:8080`.
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub cluster_url: String,

    pub api_key: Option<String>,
}

/// Weaviate over its REST and GraphQL APIs. Classes are namespaces. Hits
/// carry their certainty, which is already a similarity.
pub struct WeaviateDb {
    settings: WeaviateSettings,
    client: OnceCell<WeaviateClient>,
}

impl WeaviateDb {
    pub fn new(settings: WeaviateSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Value) -> Result<Self, HubError> {
        Ok(Self::new(parse_settings(settings)?))
    }

    async fn client(&self) -> Result<&WeaviateClient, HubError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to weaviate at {}", self.settings.cluster_url);
                let auth = self.settings.api_key.as_deref().map(AuthApiKey::new);
                match WeaviateClient::new(&self.settings.cluster_url, auth, None) {
                    Ok(client) => Ok(client),
                    Err(e) => err!(Weaviate, "{e}"),
                }
            })
            .await
    }

    async fn class_names(&self) -> Result<Vec<String>, HubError> {
        let client = self.client().await?;
        match client.schema.get().await {
            Ok(schema) => Ok(schema.classes.into_iter().map(|c| c.class).collect()),
            Err(e) => err!(Weaviate, "{e}"),
        }
    }

    async fn count(&self, class: &str) -> Result<usize, HubError> {
        let client = self.client().await?;
        let query = RawQuery::new(&format!("{{ Aggregate {{ {class} {{ meta {{ count }} }} }} }}"));

        let response = match client.query.raw(query).await {
            Ok(response) => response,
            Err(e) => return err!(Weaviate, "{e}"),
        };

        Ok(response
            .pointer(&format!("/data/Aggregate/{class}/0/meta/count"))
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize)
    }

    /// Run a Get query and return the objects of the class.
    async fn get(&self, class: &str, query: GetQuery) -> Result<Vec<WeaviateObject>, HubError> {
        let client = self.client().await?;

        let response = match client.query.get(query).await {
            Ok(res) => res,
            Err(e) => return err!(Weaviate, "{e}"),
        };

        if let Some(errors) = response.get("errors") {
            return err!(Weaviate, "{errors}");
        }

        let Some(objects) = response.pointer(&format!("/data/Get/{class}")) else {
            return err!(
                Weaviate,
                "Response error - cannot index into '{class}' in {response}"
            );
        };

        if objects.is_null() {
            return Ok(vec![]);
        }

        Ok(map_err!(serde_json::from_value(objects.clone())))
    }
}

/// Describe the objects of a batch add response whose status is `FAILED`.
fn failed_objects(response: &Value) -> Vec<String> {
    let Some(objects) = response.as_array() else {
        return vec![];
    };

    objects
        .iter()
        .filter(|obj| obj.pointer("/result/status").and_then(Value::as_str) == Some("FAILED"))
        .map(|obj| {
            let id = obj.get("id").and_then(Value::as_str).unwrap_or("<no id>");
            let messages: Vec<&str> = obj
                .pointer("/result/errors/error")
                .and_then(Value::as_array)
                .map(|errors| {
                    errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .collect()
                })
                .unwrap_or_default();

            if messages.is_empty() {
                id.to_string()
            } else {
                format!("{id} ({})", messages.join("; "))
            }
        })
        .collect()
}

/// Weaviate capitalizes class names.
fn class_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A where filter matching any of the given object IDs.
fn id_filter(ids: &[String]) -> Result<String, HubError> {
    let operands = ids
        .iter()
        .map(|id| Ok(format!(
            "{{ path: [\"id\"], operator: Equal, valueText: {} }}",
            map_err!(serde_json::to_string(id))
        )))
        .collect::<Result<Vec<_>, HubError>>()?;
    Ok(format!("{{ operator: Or, operands: [{}] }}", operands.join(", ")))
}

/// Attempt to parse a Weaviate error response.
fn parse_weaviate_error(s: &str) -> Option<WeaviateError> {
    let json_err = s.rsplit_once("Response: ")?.1;
    serde_json::from_str(json_err).ok()
}

#[async_trait::async_trait]
impl VectorDb for WeaviateDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::Weaviate
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        let client = self.client().await?;
        match client.is_live().await {
            Ok(true) => Ok(()),
            Ok(false) => err!(Unhealthy, "weaviate is not live"),
            Err(e) => err!(Weaviate, "{e}"),
        }
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        let mut total = 0;
        for class in self.class_names().await? {
            total += self.count(&class).await?;
        }
        Ok(total)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        let classes = self.class_names().await?;
        let mut namespaces = Vec::with_capacity(classes.len());
        for class in classes {
            let count = self.count(&class).await?;
            namespaces.push(Namespace::new(class, count));
        }
        Ok(namespaces)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        let class = class_name(name);
        if !self.class_names().await?.contains(&class) {
            return Ok(None);
        }
        let count = self.count(&class).await?;
        Ok(Some(Namespace::new(class, count)))
    }

    async fn ensure_namespace(&self, name: &str, _dimension: usize) -> Result<(), HubError> {
        let class = class_name(name);
        if self.class_names().await?.contains(&class) {
            return Ok(());
        }

        debug!("weaviate | creating class '{class}'");

        let client = self.client().await?;

        let properties = Properties::new(vec![
            PropertyBuilder::new(TEXT_KEY, vec!["text"]).build(),
            PropertyBuilder::new(METADATA_PROPERTY, vec!["text"]).build(),
        ]);

        let class = Class::builder(&class)
            .with_description("Document chunks")
            .with_properties(properties)
            .build();

        if let Err(e) = client.schema.create_class(&class).await {
            let Some(err) = e.downcast_ref::<SchemaError>() else {
                return err!(Weaviate, "{e}");
            };

            let Some(err) = parse_weaviate_error(&err.0) else {
                return err!(Weaviate, "{e}");
            };

            if !err.error.iter().any(|e| e.message.contains("already exists")) {
                return err!(Weaviate, "{e}");
            }
        }

        Ok(())
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let class = class_name(name);
        let (limit, offset) = (to_u32(limit, "limit")?, to_u32(offset, "offset")?);

        let query = GetQuery::builder(&class, vec![METADATA_PROPERTY])
            .with_additional(vec!["id", "vector"])
            .with_limit(limit)
            .with_offset(offset)
            .build();

        let entries = self
            .get(&class, query)
            .await?
            .into_iter()
            .map(|obj| {
                let AdditionalProps { id, vector, .. } = obj.additional;
                VectorEntry {
                    vector_id: id,
                    values: vector.unwrap_or_default(),
                    metadata: obj.metadata.as_deref().map(parse_metadata).unwrap_or_default(),
                }
            })
            .collect();

        Ok(RawPage::new(entries))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        let class = class_name(namespace);
        let client = self.client().await?;

        let mut objects = Vec::with_capacity(records.len());

        for record in records {
            let properties = json!({
                TEXT_KEY: record.text,
                METADATA_PROPERTY: map_err!(serde_json::to_string(&record.metadata)),
            });
            let object = Object::builder(&class, properties)
                .with_vector(record.embedding.iter().map(|v| *v as f64).collect())
                .with_id(map_err!(Uuid::parse_str(&record.id)))
                .build();
            objects.push(object);
        }

        let response = match client
            .batch
            .objects_batch_add(MultiObjects::new(objects), Some(ConsistencyLevel::ONE), None)
            .await
        {
            Ok(response) => response,
            Err(e) => return err!(Weaviate, "{e}"),
        };

        // Rejected objects still come back with a 200.
        let failed = failed_objects(&map_err!(serde_json::to_value(&response)));
        if !failed.is_empty() {
            return err!(
                Weaviate,
                "{} of {} object(s) rejected: {}",
                failed.len(),
                records.len(),
                failed.join(", ")
            );
        }

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        let class = class_name(namespace);

        let near_vector = format!("{{ vector: {} }}", map_err!(serde_json::to_string(vector)));
        let query = GetQuery::builder(&class, vec![TEXT_KEY, METADATA_PROPERTY])
            .with_near_vector(&near_vector)
            .with_additional(vec!["id", "certainty"])
            .with_limit(to_u32(top_k, "top_k")?)
            .build();

        Ok(self
            .get(&class, query)
            .await?
            .into_iter()
            .map(|obj| Hit {
                id: obj.additional.id,
                raw_score: obj.additional.certainty.unwrap_or(f32::NAN),
                metadata: obj.metadata.as_deref().map(parse_metadata).unwrap_or_default(),
                text: obj.text,
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

        let class = class_name(namespace);

        let query = GetQuery::builder(&class, vec![TEXT_KEY, METADATA_PROPERTY])
            .with_additional(vec!["id"])
            .with_where(&id_filter(ids)?)
            .with_limit(to_u32(ids.len(), "id count")?)
            .build();

        Ok(self
            .get(&class, query)
            .await?
            .into_iter()
            .map(|obj| {
                let metadata = obj.metadata.as_deref().map(parse_metadata).unwrap_or_default();
                augment_metadata(metadata, &obj.additional.id, obj.text)
            })
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let class = class_name(namespace);
        let client = self.client().await?;

        let operands: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "path": ["id"], "operator": "Equal", "valueText": id }))
            .collect();

        let delete = BatchDeleteRequest::builder(MatchConfig::new(
            &class,
            json!({ "operator": "Or", "operands": operands }),
        ))
        .build();

        if let Err(e) = client
            .batch
            .objects_batch_delete(delete, Some(ConsistencyLevel::ALL), None)
            .await
        {
            return err!(Weaviate, "{e}");
        }

        Ok(())
    }
}

mod dto {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct WeaviateError {
        pub error: Vec<ErrorMessage>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorMessage {
        pub message: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct WeaviateObject {
        pub text: Option<String>,
        pub metadata: Option<String>,
        #[serde(rename = "_additional")]
        pub additional: AdditionalProps,
    }

    #[derive(Debug, Deserialize)]
    pub struct AdditionalProps {
        pub id: String,
        pub certainty: Option<f32>,
        pub vector: Option<Vec<f32>>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn capitalizes_class_names() {
        assert_eq!("Docs", class_name("docs"));
        assert_eq!("Docs", class_name("Docs"));
        assert_eq!("", class_name(""));
    }

    #[test]
    fn builds_id_filter() {
        let filter = id_filter(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(
            r#"{ operator: Or, operands: [{ path: ["id"], operator: Equal, valueText: "a" }, { path: ["id"], operator: Equal, valueText: "b" }] }"#,
            filter
        );
    }

    #[test]
    fn collects_failed_batch_objects() {
        let response = json!([
            { "id": "a", "result": { "status": "SUCCESS" } },
            { "id": "b", "result": { "status": "FAILED" } },
            {
                "id": "c",
                "result": {
                    "status": "FAILED",
                    "errors": { "error": [{ "message": "vector lengths don't match" }] }
                }
            }
        ]);
        assert_eq!(
            vec!["b".to_string(), "c (vector lengths don't match)".to_string()],
            failed_objects(&response)
        );
        assert!(failed_objects(&json!([])).is_empty());
    }

    fn record(id: Uuid) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding: vec![0.1, 0.2, 0.3],
            metadata: Map::new(),
            text: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn rejected_batch_objects_fail_the_insert() {
        let server = MockServer::start().await;
        let (ok, rejected) = (Uuid::new_v4(), Uuid::new_v4());

        Mock::given(method("POST"))
            .and(path("/v1/batch/objects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "class": "Docs",
                    "properties": {},
                    "id": ok,
                    "result": { "status": "SUCCESS" }
                },
                {
                    "class": "Docs",
                    "properties": {},
                    "id": rejected,
                    "result": {
                        "status": "FAILED",
                        "errors": { "error": [{ "message": "vector lengths don't match" }] }
                    }
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let db = WeaviateDb::from_settings(&json!({ "clusterUrl": server.uri() })).unwrap();
        let error = db
            .insert_records("docs", &[record(ok), record(rejected)])
            .await
            .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("1 of 2"));
        assert!(message.contains(&rejected.to_string()));
    }

    #[tokio::test]
    async fn accepted_batch_succeeds() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/v1/batch/objects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "class": "Docs",
                "properties": {},
                "id": id,
                "result": { "status": "SUCCESS" }
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let db = WeaviateDb::from_settings(&json!({ "clusterUrl": server.uri() })).unwrap();
        db.insert_records("docs", &[record(id)]).await.unwrap();
    }

    #[tokio::test]
    async fn raw_get_rejects_pages_out_of_range() {
        let db = WeaviateDb::from_settings(&json!({ "clusterUrl": "http://127.0.0.1:9" })).unwrap();
        let error = db.raw_get("docs", u32::MAX as usize + 1, 0).await.unwrap_err();
        assert!(matches!(error.error, crate::error::HubErr::InvalidArgument(_)));
    }

    #[test]
    fn requires_cluster_url() {
        assert!(WeaviateDb::from_settings(&json!({ "clusterUrl": "" })).is_err());
        assert!(WeaviateDb::from_settings(&json!({ "clusterUrl": "http://localhost:8080" })).is_ok());
    }
}

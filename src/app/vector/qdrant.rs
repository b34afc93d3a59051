use super::{page_end, parse_settings, to_u32};
use crate::core::model::{
    connection::ConnectorType, metadata_from_value, Hit, Namespace, RawPage, VectorEntry,
    VectorRecord, TEXT_KEY,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::error::{HubErr, HubError};
use crate::map_err;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::vectors::VectorsOptions;
use qdrant_client::qdrant::vectors_config::Config;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{
    value, CreateCollection, DeletePointsBuilder, Distance, GetPointsBuilder, PointId,
    PointStruct, PointsIdsList, RetrievedPoint, ScrollPointsBuilder, SearchParams, SearchPoints,
    UpsertPointsBuilder, VectorParams, VectorsConfig, WithPayloadSelector,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use validify::Validify;

const METADATA_KEY: &str = "metadata";

#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
pub struct QdrantSettings {
    /// gRPC endpoint of the cluster, e.g. `http://localhost:6334`.
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub cluster_url: String,

    pub api_key: Option<String>,
}

/// Qdrant over gRPC. Collections are created with the cosine distance,
/// for which Qdrant reports scores as similarities.
pub struct QdrantDb {
    settings: QdrantSettings,
    client: OnceCell<Qdrant>,
}

impl QdrantDb {
    pub fn new(settings: QdrantSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Value) -> Result<Self, HubError> {
        Ok(Self::new(parse_settings(settings)?))
    }

    async fn client(&self) -> Result<&Qdrant, HubError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to qdrant at {}", self.settings.cluster_url);
                let mut config = Qdrant::from_url(&self.settings.cluster_url);
                if let Some(ref key) = self.settings.api_key {
                    config = config.api_key(key.clone());
                }
                Ok(map_err!(config.build()))
            })
            .await
    }

    async fn collection_names(&self) -> Result<Vec<String>, HubError> {
        let client = self.client().await?;
        Ok(map_err!(client.list_collections().await)
            .collections
            .into_iter()
            .map(|col| col.name)
            .collect())
    }

    async fn points_count(&self, name: &str) -> Result<usize, HubError> {
        let client = self.client().await?;
        let info = map_err!(client.collection_info(name).await);
        Ok(info
            .result
            .and_then(|info| info.points_count)
            .unwrap_or_default() as usize)
    }
}

#[async_trait::async_trait]
impl VectorDb for QdrantDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::Qdrant
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        let client = self.client().await?;
        let reply = map_err!(client.health_check().await);
        debug!("qdrant | {} {}", reply.title, reply.version);
        Ok(())
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        let mut total = 0;
        for name in self.collection_names().await? {
            total += self.points_count(&name).await?;
        }
        Ok(total)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        let names = self.collection_names().await?;
        let mut namespaces = Vec::with_capacity(names.len());
        for name in names {
            let count = self.points_count(&name).await?;
            namespaces.push(Namespace::new(name, count));
        }
        Ok(namespaces)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        if !self.collection_names().await?.iter().any(|n| n == name) {
            return Ok(None);
        }
        let count = self.points_count(name).await?;
        Ok(Some(Namespace::new(name, count)))
    }

    async fn ensure_namespace(&self, name: &str, dimension: usize) -> Result<(), HubError> {
        if self.collection_names().await?.iter().any(|n| n == name) {
            return Ok(());
        }

        let client = self.client().await?;

        let config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: dimension as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        let result = client
            .create_collection(CreateCollection {
                collection_name: name.to_string(),
                vectors_config: Some(config),
                ..Default::default()
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // Created concurrently
            Err(QdrantError::ResponseError { status })
                if matches!(status.code(), tonic::Code::AlreadyExists) =>
            {
                Ok(())
            }
            Err(e) => Err(HubError::new(file!(), line!(), column!(), HubErr::Qdrant(e))),
        }
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let end = to_u32(page_end(limit, offset)?, "page end")?;
        let client = self.client().await?;

        let scroll = map_err!(
            client
                .scroll(
                    ScrollPointsBuilder::new(name)
                        .limit(end)
                        .with_payload(true)
                        .with_vectors(true),
                )
                .await
        );

        let entries = scroll
            .result
            .into_iter()
            .skip(offset)
            .map(|point| {
                let (id, vector, _, metadata) = split_point(point);
                VectorEntry {
                    vector_id: id,
                    values: vector,
                    metadata,
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
        let client = self.client().await?;

        debug!("qdrant | inserting {} points to {namespace}", records.len());

        let points: Vec<PointStruct> = records
            .iter()
            .map(|record| {
                let mut payload = Payload::new();
                payload.insert(TEXT_KEY, record.text.clone());
                payload.insert(METADATA_KEY, Value::Object(record.metadata.clone()));
                PointStruct::new(record.id.clone(), record.embedding.clone(), payload)
            })
            .collect();

        map_err!(
            client
                .upsert_points(UpsertPointsBuilder::new(namespace, points).wait(true))
                .await
        );

        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        let client = self.client().await?;

        let search_points = SearchPoints {
            collection_name: namespace.to_string(),
            vector: vector.to_vec(),
            filter: None,
            limit: top_k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            params: Some(SearchParams::default()),
            ..Default::default()
        };

        let search_result = map_err!(client.search_points(search_points).await);

        Ok(search_result
            .result
            .into_iter()
            .map(|point| {
                let (text, metadata) = split_payload(point.payload);
                Hit {
                    id: point_id_to_string(point.id),
                    raw_score: point.score,
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
        let client = self.client().await?;

        let ids: Vec<PointId> = ids.iter().cloned().map(PointId::from).collect();

        let response = map_err!(
            client
                .get_points(GetPointsBuilder::new(namespace, ids).with_payload(true))
                .await
        );

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let (id, _, text, metadata) = split_point(point);
                augment_metadata(metadata, &id, text)
            })
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let client = self.client().await?;

        let ids = PointsIdsList {
            ids: ids.iter().cloned().map(PointId::from).collect(),
        };

        map_err!(
            client
                .delete_points(DeletePointsBuilder::new(namespace).points(ids).wait(true))
                .await
        );

        Ok(())
    }
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(id)) => id,
        Some(PointIdOptions::Num(id)) => id.to_string(),
        None => String::new(),
    }
}

fn split_point(point: RetrievedPoint) -> (String, Vec<f32>, Option<String>, Map<String, Value>) {
    let id = point_id_to_string(point.id);
    let vector = match point.vectors.and_then(|v| v.vectors_options) {
        Some(VectorsOptions::Vector(vector)) => vector.data,
        _ => vec![],
    };
    let (text, metadata) = split_payload(point.payload);
    (id, vector, text, metadata)
}

/// Extract the chunk text and metadata from a point payload.
fn split_payload(
    mut payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> (Option<String>, Map<String, Value>) {
    let text = match payload.remove(TEXT_KEY).map(to_json) {
        Some(Value::String(text)) => Some(text),
        _ => None,
    };
    let metadata = payload
        .remove(METADATA_KEY)
        .map(to_json)
        .map(metadata_from_value)
        .unwrap_or_default();
    (text, metadata)
}

fn to_json(value: qdrant_client::qdrant::Value) -> Value {
    match value.kind {
        Some(value::Kind::NullValue(_)) | None => Value::Null,
        Some(value::Kind::BoolValue(b)) => Value::Bool(b),
        Some(value::Kind::IntegerValue(i)) => Value::from(i),
        Some(value::Kind::DoubleValue(d)) => Value::from(d),
        Some(value::Kind::StringValue(s)) => Value::String(s),
        Some(value::Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(to_json).collect())
        }
        Some(value::Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect(),
        ),
    }
}

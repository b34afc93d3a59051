//! Test suites and utilites.
//!
//! Container helpers for the integration suites live next to in-memory fakes
//! used to exercise the connector facade and the ingestion pipeline.

use super::state::EmbeddingProvider;
use crate::{
    core::{
        cache::{cache_key, VectorCache},
        connector::{ingest::Pipeline, Connector, DynVectorDb},
        embedder::Embedder,
        model::{
            connection::{
                ConnectionInsert, ConnectorType, OrganizationConnection, Validation,
            },
            document::{DocumentPayload, DocumentRecord, DocumentVector, DocumentVectorInsert},
            Hit, Namespace, RawPage, VectorEntry, VectorRecord, Outcome, TEXT_KEY,
        },
        provider::{ConnectorProvider, ProviderFactory},
        repo::{ConnectionRepo, DocumentVectorRepo},
        service::connection::ConnectionService,
        vector::{augment_metadata, ScoreKind, VectorDb},
    },
    err,
    error::{HubErr, HubError},
};
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage};
use testcontainers_modules::postgres::Postgres;

pub type PostgresContainer = ContainerAsync<Postgres>;
pub type AsyncContainer = ContainerAsync<GenericImage>;

/// Setup a postgres test container and connect to it using PgPool.
/// Runs the migrations in the container.
/// When using suitest's [before_all][suitest::before_all], make sure you return this, othwerise the
/// container will get dropped and cleaned up.
pub async fn init_postgres() -> (sqlx::PgPool, PostgresContainer) {
    let pg_image = Postgres::default()
        .start()
        .await
        .expect("postgres container error");

    let pg_host = pg_image.get_host().await.unwrap();
    let pg_port = pg_image.get_host_port_ipv4(5432).await.unwrap();
    let pg_url = format!("postgresql://postgres:postgres@{pg_host}:{pg_port}/postgres");
    let pool = crate::app::repo::pg::init(&pg_url)
        .await
        .expect("postgres init error");
    (pool, pg_image)
}

/// Setup a qdrant test container and build a QdrantDb pointing to it.
/// When using suitest's [before_all][suitest::before_all], make sure you return this, othwerise the
/// container will get dropped and cleaned up.
#[cfg(feature = "qdrant")]
pub async fn init_qdrant() -> (super::vector::qdrant::QdrantDb, AsyncContainer) {
    use testcontainers::core::{IntoContainerPort, WaitFor};

    let qd_image = GenericImage::new("qdrant/qdrant", "latest")
        .with_exposed_port(6334.tcp())
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening on"))
        .start()
        .await
        .expect("qdrant container error");

    let qd_host = qd_image.get_host().await.unwrap();
    let qd_port = qd_image.get_host_port_ipv4(6334).await.unwrap();
    let qd_url = format!("http://{qd_host}:{qd_port}");
    let qdrant = super::vector::qdrant::QdrantDb::from_settings(&json!({ "clusterUrl": qd_url }))
        .expect("qdrant settings error");
    (qdrant, qd_image)
}

/// Setup a weaviate test container and build a WeaviateDb pointing to it.
/// When using suitest's [before_all][suitest::before_all], make sure you return this, othwerise the
/// container will get dropped and cleaned up.
#[cfg(feature = "weaviate")]
pub async fn init_weaviate() -> (super::vector::weaviate::WeaviateDb, AsyncContainer) {
    use testcontainers::core::{ImageExt, IntoContainerPort, WaitFor};

    let wv_image = GenericImage::new("semitechnologies/weaviate", "1.24.12")
        .with_exposed_port(8080.tcp())
        .with_exposed_port(50051.tcp())
        .with_wait_for(WaitFor::message_on_stderr("Serving weaviate"))
        .with_env_var("AUTHENTICATION_ANONYMOUS_ACCESS_ENABLED", "true")
        .with_env_var("PERSISTENCE_DATA_PATH", "/var/lib/weaviate")
        .start()
        .await
        .expect("weaviate container error");

    let wv_host = wv_image.get_host().await.unwrap();
    let wv_port = wv_image.get_host_port_ipv4(8080).await.unwrap();
    let wv_url = format!("http://{wv_host}:{wv_port}");
    let weaviate =
        super::vector::weaviate::WeaviateDb::from_settings(&json!({ "clusterUrl": wv_url }))
            .expect("weaviate settings error");
    (weaviate, wv_image)
}

/// In memory backend. Scores are cosine similarities reported in the
/// configured [ScoreKind].
pub struct MemoryDb {
    ty: ConnectorType,
    score_kind: ScoreKind,
    namespaces: Mutex<HashMap<String, Vec<VectorRecord>>>,

    /// Every operation fails when set.
    unreachable: bool,

    /// The insert call with this index (0 based) fails.
    fail_insert_at: Option<usize>,
    inserts: AtomicUsize,
}

impl MemoryDb {
    pub fn new(ty: ConnectorType) -> Self {
        Self {
            ty,
            score_kind: ScoreKind::Similarity,
            namespaces: Mutex::new(HashMap::new()),
            unreachable: false,
            fail_insert_at: None,
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn fail_insert_at(mut self, call: usize) -> Self {
        self.fail_insert_at = Some(call);
        self
    }

    pub fn with_score_kind(mut self, kind: ScoreKind) -> Self {
        self.score_kind = kind;
        self
    }

    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn records(&self, namespace: &str) -> Vec<VectorRecord> {
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed(&self, namespace: &str, records: Vec<VectorRecord>) {
        self.namespaces
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .extend(records);
    }

    fn reachable(&self) -> Result<(), HubError> {
        if self.unreachable {
            return err!(Transport, "connection refused");
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(a, b)| a * b).sum();
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait::async_trait]
impl VectorDb for MemoryDb {
    fn id(&self) -> ConnectorType {
        self.ty
    }

    fn score_kind(&self) -> ScoreKind {
        self.score_kind
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        self.reachable()
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        self.reachable()?;
        Ok(self.namespaces.lock().unwrap().values().map(Vec::len).sum())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        self.reachable()?;
        let mut namespaces: Vec<Namespace> = self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .map(|(name, records)| Namespace::new(name, records.len()))
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        self.reachable()?;
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(name)
            .map(|records| Namespace::new(name, records.len())))
    }

    async fn ensure_namespace(&self, name: &str, _dimension: usize) -> Result<(), HubError> {
        self.reachable()?;
        self.namespaces
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn raw_get(&self, name: &str, limit: usize, offset: usize) -> Result<RawPage, HubError> {
        self.reachable()?;
        let data = self
            .records(name)
            .iter()
            .skip(offset)
            .take(limit)
            .map(VectorEntry::from)
            .collect();
        Ok(RawPage::new(data))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        self.reachable()?;
        let call = self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert_at == Some(call) {
            return err!(Transport, "batch {call} rejected");
        }
        self.seed(namespace, records.to_vec());
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        self.reachable()?;
        let mut hits: Vec<Hit> = self
            .records(namespace)
            .into_iter()
            .map(|record| {
                let similarity = cosine(&record.embedding, vector);
                let raw_score = match self.score_kind {
                    ScoreKind::Similarity => similarity,
                    ScoreKind::CosineDistance => 1.0 - similarity,
                };
                Hit {
                    id: record.id,
                    raw_score,
                    text: None,
                    metadata: record.metadata,
                }
            })
            .collect();

        match self.score_kind {
            ScoreKind::Similarity => hits.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score)),
            ScoreKind::CosineDistance => hits.sort_by(|a, b| a.raw_score.total_cmp(&b.raw_score)),
        }
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, HubError> {
        self.reachable()?;
        Ok(self
            .records(namespace)
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .map(|r| augment_metadata(r.metadata, &r.id, Some(r.text)))
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        self.reachable()?;
        if let Some(records) = self.namespaces.lock().unwrap().get_mut(namespace) {
            records.retain(|r| !ids.contains(&r.id));
        }
        Ok(())
    }
}

/// What [FakeEmbedder] returns for a batch of chunks.
#[derive(Debug, Clone, Copy)]
pub enum EmbedMode {
    /// One vector of the given size per chunk.
    Fixed(usize),

    /// Nothing at all.
    Empty,

    /// One vector less than there are chunks.
    Short,
}

pub struct FakeEmbedder {
    mode: EmbedMode,
    pub calls: AtomicUsize,
    pub embedded: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(mode: EmbedMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            embedded: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Embedder for FakeEmbedder {
    fn id(&self) -> &'static str {
        "fake"
    }

    fn model(&self) -> (String, usize) {
        match self.mode {
            EmbedMode::Fixed(size) => ("fake".to_string(), size),
            _ => ("fake".to_string(), 3),
        }
    }

    async fn embed_text_chunks(&self, chunks: &[&str]) -> Result<Vec<Vec<f32>>, HubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.embedded.fetch_add(chunks.len(), Ordering::SeqCst);

        let vector = |i: usize, size: usize| {
            let mut v = vec![0.1; size];
            v[i % size] = 1.0;
            v
        };

        Ok(match self.mode {
            EmbedMode::Fixed(size) => (0..chunks.len()).map(|i| vector(i, size)).collect(),
            EmbedMode::Empty => vec![],
            EmbedMode::Short => (1..chunks.len()).map(|i| vector(i, 3)).collect(),
        })
    }
}

#[derive(Default)]
pub struct MemoryRepo {
    rows: Mutex<Vec<DocumentVector>>,
    connections: Mutex<Vec<OrganizationConnection>>,
}

impl MemoryRepo {
    pub fn rows(&self) -> Vec<DocumentVector> {
        self.rows.lock().unwrap().clone()
    }
}

impl DocumentVectorRepo for MemoryRepo {
    async fn insert_document_vectors(
        &self,
        rows: &[DocumentVectorInsert<'_>],
    ) -> Result<u64, HubError> {
        let mut stored = self.rows.lock().unwrap();
        let mut created = 0;
        for row in rows {
            if stored.iter().any(|r| r.vector_id == row.vector_id) {
                continue;
            }
            let next = stored.len() as i64 + 1;
            stored.push(DocumentVector {
                id: next,
                doc_id: row.doc_id.to_string(),
                vector_id: row.vector_id.to_string(),
                document_id: row.document_id,
                workspace_id: row.workspace_id,
                organization_id: row.organization_id,
                created_at: chrono::Utc::now(),
            });
            created += 1;
        }
        Ok(created)
    }

    async fn list_document_vectors(&self, document_id: i64) -> Result<Vec<DocumentVector>, HubError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| r.document_id == document_id)
            .collect())
    }

    async fn delete_document_vectors(&self, vector_ids: &[String]) -> Result<u64, HubError> {
        let mut stored = self.rows.lock().unwrap();
        let before = stored.len();
        stored.retain(|r| !vector_ids.contains(&r.vector_id));
        Ok((before - stored.len()) as u64)
    }
}

impl ConnectionRepo for MemoryRepo {
    async fn insert_connection(
        &self,
        insert: ConnectionInsert<'_>,
    ) -> Result<OrganizationConnection, HubError> {
        let mut stored = self.connections.lock().unwrap();
        let next = stored.len() as i64 + 1;
        let connection = OrganizationConnection {
            id: next,
            organization_id: insert.organization_id,
            ty: insert.ty.to_string(),
            settings: insert.settings.clone(),
            created_at: chrono::Utc::now(),
        };
        stored.push(connection.clone());
        Ok(connection)
    }

    async fn get_connection(&self, id: i64) -> Result<Option<OrganizationConnection>, HubError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_connections(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationConnection>, HubError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<VectorEntry>>>,
}

impl MemoryCache {
    pub fn stored(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl VectorCache for MemoryCache {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn store_vector_result(
        &self,
        entries: &[VectorEntry],
        key: &str,
    ) -> Result<(), HubError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), entries.to_vec());
        Ok(())
    }

    async fn read_vector_result(&self, key: &str) -> Result<Option<Vec<VectorEntry>>, HubError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }
}

/// Accepts settings containing `"valid": true` and builds in memory backends.
pub struct FakeConnectors;

#[async_trait::async_trait]
impl ConnectorProvider for FakeConnectors {
    fn select(&self, ty: &str, _settings: &Value) -> Result<Connector, HubError> {
        let ty: ConnectorType = ty.parse()?;
        Ok(Connector::new(ty, Arc::new(MemoryDb::new(ty))))
    }

    async fn validate(&self, ty: &str, settings: &Value) -> Validation {
        if let Err(e) = ty.parse::<ConnectorType>() {
            return Validation::invalid(e.error);
        }
        match settings.get("valid").and_then(Value::as_bool) {
            Some(true) => Validation::valid(),
            _ => Validation::invalid("backend unreachable"),
        }
    }
}

fn pipeline(mode: EmbedMode) -> (Pipeline<MemoryRepo, MemoryCache>, Arc<FakeEmbedder>) {
    let embedder = Arc::new(FakeEmbedder::new(mode));
    let mut embedders = EmbeddingProvider::default();
    embedders.register(embedder.id(), embedder.clone());
    let pipeline = Pipeline::new(
        MemoryRepo::default(),
        MemoryCache::default(),
        Arc::new(embedders),
    );
    (pipeline, embedder)
}

fn document() -> DocumentRecord {
    DocumentRecord {
        id: 1,
        doc_id: "doc-1".to_string(),
        workspace_id: 2,
        organization_id: 3,
    }
}

fn connector(db: MemoryDb) -> (Connector, Arc<MemoryDb>) {
    let db = Arc::new(db);
    let dyn_db: DynVectorDb = db.clone();
    (Connector::new(db.id(), dyn_db), db)
}

#[tokio::test]
async fn ingest_chunks_embeds_and_records_every_chunk() {
    let (pipeline, embedder) = pipeline(EmbedMode::Fixed(3));
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Chroma));
    let payload = DocumentPayload::new("A".repeat(4000)).with_metadata("title", "Doc");

    let processed = connector
        .process_document(&pipeline, "docs", payload, "fake", &document())
        .await
        .unwrap();

    assert_eq!(1, embedder.calls.load(Ordering::SeqCst));
    assert_eq!(4, embedder.embedded.load(Ordering::SeqCst));
    assert_eq!(4, processed.vector_ids.len());
    assert_eq!(cache_key("doc-1"), processed.cache_key);

    let records = db.records("docs");
    assert_eq!(4, records.len());
    assert_eq!(1000, records[0].text.len());
    for record in &records {
        assert_eq!(Some(&json!("Doc")), record.metadata.get("title"));
        assert_eq!(Some(&json!(record.text)), record.metadata.get(TEXT_KEY));
        assert!(!record.metadata.contains_key("pageContent"));
    }

    let rows = pipeline.repo.rows();
    assert_eq!(4, rows.len());
    for (row, id) in rows.iter().zip(&processed.vector_ids) {
        assert_eq!(id, &row.vector_id);
        assert_eq!("doc-1", row.doc_id);
        assert_eq!((1, 2, 3), (row.document_id, row.workspace_id, row.organization_id));
    }

    let cached = pipeline
        .cache
        .read_vector_result(&processed.cache_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(4, cached.len());
    assert_eq!(processed.vector_ids[0], cached[0].vector_id);
}

#[tokio::test]
async fn empty_embeddings_never_reach_the_backend() {
    let (pipeline, embedder) = pipeline(EmbedMode::Empty);
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Pinecone));
    let payload = DocumentPayload::new("Some text worth embedding");

    let result = connector
        .process_document(&pipeline, "docs", payload, "fake", &document())
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error.error, HubErr::EmbeddingFailure(_)));
    assert_eq!(1, embedder.calls.load(Ordering::SeqCst));
    assert_eq!(0, db.insert_calls());
    assert!(pipeline.repo.rows().is_empty());
    assert_eq!(0, pipeline.cache.stored());

    let outcome = Outcome::from(Err::<(), _>(error));
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("Embedding failure"));
}

#[tokio::test]
async fn mismatched_embedding_count_fails() {
    let (pipeline, _) = pipeline(EmbedMode::Short);
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Qdrant));
    let payload = DocumentPayload::new("B".repeat(2500));

    let error = connector
        .process_document(&pipeline, "docs", payload, "fake", &document())
        .await
        .unwrap_err();

    assert!(matches!(error.error, HubErr::EmbeddingFailure(_)));
    assert_eq!(0, db.insert_calls());
}

#[tokio::test]
async fn whitespace_document_is_not_embedded() {
    let (pipeline, embedder) = pipeline(EmbedMode::Fixed(3));
    let (connector, _) = connector(MemoryDb::new(ConnectorType::Milvus));

    let error = connector
        .process_document(&pipeline, "docs", DocumentPayload::new("  \n"), "fake", &document())
        .await
        .unwrap_err();

    assert!(matches!(error.error, HubErr::EmbeddingFailure(_)));
    assert_eq!(0, embedder.calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_batch_keeps_earlier_batches_and_skips_cache() {
    let (pipeline, _) = pipeline(EmbedMode::Fixed(3));
    let pipeline = pipeline.with_batch_size(2);
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Weaviate).fail_insert_at(1));
    let payload = DocumentPayload::new("C".repeat(4000));

    let error = connector
        .process_document(&pipeline, "docs", payload, "fake", &document())
        .await
        .unwrap_err();

    assert!(matches!(error.error, HubErr::Transport(_)));
    assert_eq!(2, db.insert_calls());

    let stored: Vec<String> = db.records("docs").into_iter().map(|r| r.id).collect();
    let mapped: Vec<String> = pipeline.repo.rows().into_iter().map(|r| r.vector_id).collect();
    assert_eq!(2, stored.len());
    assert_eq!(stored, mapped);
    assert_eq!(0, pipeline.cache.stored());
}

#[tokio::test]
async fn ingest_requires_namespace_and_known_embedder() {
    let (pipeline, _) = pipeline(EmbedMode::Fixed(3));
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Chroma));

    let error = connector
        .process_document(&pipeline, "", DocumentPayload::new("text"), "fake", &document())
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::MissingArgument(_)));

    let error = connector
        .process_document(&pipeline, "docs", DocumentPayload::new("text"), "nope", &document())
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::InvalidProvider(_)));
    assert_eq!(0, db.insert_calls());
}

#[tokio::test]
async fn connect_rejects_mismatched_backend() {
    let db: DynVectorDb = Arc::new(MemoryDb::new(ConnectorType::Qdrant));
    let connector = Connector::new(ConnectorType::Chroma, db);

    let Err(error) = connector.connect().await else {
        panic!("connected to a mismatched backend");
    };
    assert!(matches!(error.error, HubErr::TypeMismatch(_)));

    let (pipeline, embedder) = pipeline(EmbedMode::Fixed(3));
    let error = connector
        .process_document(&pipeline, "docs", DocumentPayload::new("text"), "fake", &document())
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::TypeMismatch(_)));
    assert_eq!(0, embedder.calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn connect_rejects_unhealthy_backend() {
    let (connector, _) = connector(MemoryDb::new(ConnectorType::ClickHouse).unreachable());
    let Err(error) = connector.connect().await else {
        panic!("connected to an unreachable backend");
    };
    assert!(matches!(error.error, HubErr::Unhealthy(_)));
}

#[tokio::test]
async fn reads_degrade_when_backend_is_unreachable() {
    let (connector, _) = connector(MemoryDb::new(ConnectorType::Pinecone).unreachable());

    let heartbeat = connector.heartbeat().await;
    assert!(!heartbeat.result);
    assert!(heartbeat.error.is_some());

    let count = connector.total_indicies().await;
    assert_eq!(0, count.result);
    assert!(count.error.is_some());

    assert!(connector.namespaces().await.is_empty());
    assert!(!connector.namespace_exists("docs").await);
    assert!(connector.namespace(Some("docs")).await.unwrap().is_none());

    let page = connector.raw_get("docs", 10, 0).await;
    assert!(page.data.is_empty());
    assert!(page.error.is_some());

    let response = connector.similarity_response("docs", &[1.0, 0.0, 0.0], 4).await;
    assert!(response.is_empty());
    assert!(connector
        .get_metadata("docs", &["v1".to_string()])
        .await
        .is_empty());
}

#[tokio::test]
async fn namespace_lookup_requires_a_name() {
    let (connector, _) = connector(MemoryDb::new(ConnectorType::Chroma));
    let error = connector.namespace(None).await.unwrap_err();
    assert!(matches!(error.error, HubErr::MissingArgument(_)));
    let error = connector.namespace(Some("")).await.unwrap_err();
    assert!(matches!(error.error, HubErr::MissingArgument(_)));
    assert!(!connector.namespace_exists("").await);
}

#[tokio::test]
async fn similarity_response_is_bounded_and_normalized() {
    for kind in [ScoreKind::Similarity, ScoreKind::CosineDistance] {
        let (pipeline, _) = pipeline(EmbedMode::Fixed(3));
        let (connector, _) = connector(MemoryDb::new(ConnectorType::Chroma).with_score_kind(kind));
        let payload = DocumentPayload::new("D".repeat(5000)).with_metadata("title", "Doc");
        connector
            .process_document(&pipeline, "docs", payload, "fake", &document())
            .await
            .unwrap();

        let response = connector
            .similarity_response("docs", &[1.0, 0.1, 0.1], 3)
            .await;

        assert_eq!(3, response.len());
        assert_eq!(3, response.context_texts.len());
        assert_eq!(3, response.source_documents.len());
        assert_eq!(3, response.scores.len());
        assert!(response.scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(response.scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(response.context_texts.iter().all(|t| t.starts_with('D')));
        assert_eq!(Some(&json!("Doc")), response.source_documents[0].get("title"));
    }
}

#[tokio::test]
async fn similarity_response_rejects_invalid_queries() {
    let (connector, _) = connector(MemoryDb::new(ConnectorType::Chroma));
    assert!(connector.similarity_response("docs", &[1.0], 0).await.is_empty());
    assert!(connector.similarity_response("docs", &[], 4).await.is_empty());
    assert!(connector.similarity_response("", &[1.0], 4).await.is_empty());
}

#[tokio::test]
async fn delete_ignores_missing_vectors() {
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Milvus));
    db.seed(
        "docs",
        vec![VectorRecord {
            id: "v1".to_string(),
            embedding: vec![1.0, 0.0],
            metadata: Map::new(),
            text: "one".to_string(),
        }],
    );

    let ids = vec!["v1".to_string(), "v2".to_string()];
    let outcome = Outcome::from(connector.delete_vectors("docs", &ids).await);

    assert!(outcome.success);
    assert!(outcome.message.is_none());
    assert!(db.records("docs").is_empty());

    let error = connector.delete_vectors("", &ids).await.unwrap_err();
    assert!(matches!(error.error, HubErr::MissingArgument(_)));
}

#[tokio::test]
async fn metadata_is_augmented_with_id_and_text() {
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Qdrant));
    let mut metadata = Map::new();
    metadata.insert("title".to_string(), json!("Doc"));
    db.seed(
        "docs",
        vec![VectorRecord {
            id: "v1".to_string(),
            embedding: vec![1.0, 0.0],
            metadata,
            text: "one".to_string(),
        }],
    );

    let metadata = connector.get_metadata("docs", &["v1".to_string()]).await;
    assert_eq!(1, metadata.len());
    assert_eq!(Some(&json!("v1")), metadata[0].get("vectorId"));
    assert_eq!(Some(&json!("one")), metadata[0].get("text"));
    assert_eq!(Some(&json!("Doc")), metadata[0].get("title"));
}

#[tokio::test]
async fn register_persists_only_valid_connections() {
    let service = ConnectionService::new(MemoryRepo::default(), Arc::new(FakeConnectors));

    let error = service
        .register(1, "qdrant", &json!({ "valid": false }))
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::Validation(_)));

    let error = service
        .register(1, "lancedb", &json!({ "valid": true }))
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::UnsupportedConnector(_)));

    let connection = service
        .register(1, "qdrant", &json!({ "valid": true }))
        .await
        .unwrap();
    assert_eq!("qdrant", connection.ty);

    let connections = service.list(1).await.unwrap();
    assert_eq!(1, connections.len());
    assert!(service.list(2).await.unwrap().is_empty());

    let connector = service.connector(connection.id).await.unwrap();
    assert_eq!(ConnectorType::Qdrant, connector.connector_type());

    let error = service.connector(42).await.unwrap_err();
    assert!(matches!(error.error, HubErr::DoesNotExist(_)));
}

#[tokio::test]
async fn restore_reinserts_cached_vectors_without_embedding() {
    let (pipeline, embedder) = pipeline(EmbedMode::Fixed(3));
    let (source, _) = connector(MemoryDb::new(ConnectorType::Chroma));
    let payload = DocumentPayload::new("E".repeat(2500)).with_metadata("title", "Doc");

    let processed = source
        .process_document(&pipeline, "docs", payload, "fake", &document())
        .await
        .unwrap();
    let mapped = pipeline.repo.list_document_vectors(1).await.unwrap();
    assert_eq!(3, mapped.len());

    let (target, db) = connector(MemoryDb::new(ConnectorType::Qdrant));
    let restored = target
        .restore_document(&pipeline, "restored", &document())
        .await
        .unwrap();

    assert_eq!(1, embedder.calls.load(Ordering::SeqCst));
    assert_eq!(processed.vector_ids, restored.vector_ids);
    assert_eq!(processed.cache_key, restored.cache_key);

    let records = db.records("restored");
    assert_eq!(3, records.len());
    assert!(records.iter().all(|r| r.text.starts_with('E')));
    assert_eq!(Some(&json!("Doc")), records[0].metadata.get("title"));

    assert_eq!(3, pipeline.repo.list_document_vectors(1).await.unwrap().len());
}

#[tokio::test]
async fn restore_requires_a_cache_artifact() {
    let (pipeline, _) = pipeline(EmbedMode::Fixed(3));
    let (connector, db) = connector(MemoryDb::new(ConnectorType::Milvus));

    let error = connector
        .restore_document(&pipeline, "docs", &document())
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::DoesNotExist(_)));

    let error = connector
        .restore_document(&pipeline, "", &document())
        .await
        .unwrap_err();
    assert!(matches!(error.error, HubErr::MissingArgument(_)));
    assert_eq!(0, db.insert_calls());
}

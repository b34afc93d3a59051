use super::{Connector, DynVectorDb};
use crate::{
    core::{
        cache::{cache_key, VectorCache},
        model::{
            document::{DocumentPayload, DocumentRecord, DocumentVectorInsert, ProcessedDocument},
            VectorEntry, VectorRecord, TEXT_KEY,
        },
        provider::{DynEmbedder, ProviderFactory},
        repo::DocumentVectorRepo,
    },
    err,
    error::HubError,
};
use chunx::SlidingWindow;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Maximum amount of records sent to a backend in a single insert.
pub const INSERT_BATCH_SIZE: usize = 500;

pub type DynEmbedderFactory = Arc<dyn ProviderFactory<DynEmbedder> + Send + Sync>;

/// Collaborators of [Connector::process_document] that live outside the backend.
pub struct Pipeline<R, C> {
    /// Records which vectors belong to which document.
    pub repo: R,

    /// Stores the vector snapshots of ingested documents.
    pub cache: C,

    /// Embedders, looked up by the key passed along with each document.
    pub embedders: DynEmbedderFactory,

    pub chunker: SlidingWindow,

    pub batch_size: usize,
}

impl<R, C> Pipeline<R, C> {
    pub fn new(repo: R, cache: C, embedders: DynEmbedderFactory) -> Self {
        Self {
            repo,
            cache,
            embedders,
            chunker: SlidingWindow::default(),
            batch_size: INSERT_BATCH_SIZE,
        }
    }

    pub fn with_chunker(mut self, chunker: SlidingWindow) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Connector {
    /// Chunk, embed and store a document in `namespace`.
    ///
    /// Nothing is written to the backend unless the embedder returns one vector
    /// per chunk. Records are inserted in batches; the mapping rows of a batch
    /// are persisted right after the batch is accepted by the backend, so
    /// a failing batch leaves earlier batches inserted and mapped (no rollback).
    /// The cache artifact is written once every batch succeeded.
    ///
    /// * `pipeline`: Repository, cache and embedders to use.
    /// * `namespace`: Namespace to store the vectors in, created if missing.
    /// * `payload`: The document text and its metadata.
    /// * `embedder_key`: Key of the embedder to use.
    /// * `document`: The document the vectors are recorded for.
    pub async fn process_document<R, C>(
        &self,
        pipeline: &Pipeline<R, C>,
        namespace: &str,
        payload: DocumentPayload,
        embedder_key: &str,
        document: &DocumentRecord,
    ) -> Result<ProcessedDocument, HubError>
    where
        R: DocumentVectorRepo + Sync,
        C: VectorCache + Sync,
    {
        let result = self
            .process_document_inner(pipeline, namespace, payload, embedder_key, document)
            .await;

        if let Err(ref e) = result {
            error!(
                "{} | processing document '{}' failed: {e}",
                self.ty, document.doc_id
            );
        }

        result
    }

    async fn process_document_inner<R, C>(
        &self,
        pipeline: &Pipeline<R, C>,
        namespace: &str,
        payload: DocumentPayload,
        embedder_key: &str,
        document: &DocumentRecord,
    ) -> Result<ProcessedDocument, HubError>
    where
        R: DocumentVectorRepo + Sync,
        C: VectorCache + Sync,
    {
        if namespace.is_empty() {
            return err!(MissingArgument, "namespace name");
        }

        let db = self.connect().await?;
        let embedder = pipeline.embedders.get_provider(embedder_key)?;

        let DocumentPayload {
            page_content,
            metadata,
            ..
        } = payload;

        let chunks = pipeline.chunker.chunk(&page_content);

        if chunks.is_empty() {
            return err!(EmbeddingFailure, "document has no text to embed");
        }

        debug!(
            "{} | embedding {} chunk(s) of '{}' with '{}'",
            self.ty,
            chunks.len(),
            document.doc_id,
            embedder.id()
        );

        let vectors = embedder.embed_text_chunks(&chunks).await?;

        if vectors.is_empty() {
            return err!(EmbeddingFailure, "embedding failure");
        }

        if vectors.len() != chunks.len() || vectors.iter().any(Vec::is_empty) {
            let (c, v) = (chunks.len(), vectors.len());
            return err!(
                EmbeddingFailure,
                "embedding failure; expected {c} vectors, received {v}"
            );
        }

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| {
                let mut metadata = metadata.clone();
                metadata.insert(TEXT_KEY.to_string(), Value::String(chunk.to_string()));
                VectorRecord {
                    id: Uuid::new_v4().to_string(),
                    embedding,
                    metadata,
                    text: chunk.to_string(),
                }
            })
            .collect();

        self.store_records(pipeline, db, namespace, &records, document)
            .await?;

        let entries: Vec<VectorEntry> = records.iter().map(VectorEntry::from).collect();
        let key = cache_key(&document.doc_id);

        pipeline.cache.store_vector_result(&entries, &key).await?;

        info!(
            "{} | processed document '{}' into '{namespace}' ({} vector(s))",
            self.ty,
            document.doc_id,
            records.len()
        );

        Ok(ProcessedDocument {
            vector_ids: records.into_iter().map(|r| r.id).collect(),
            cache_key: key,
        })
    }

    /// Re-insert the cached vectors of a document without embedding again.
    ///
    /// The vectors keep their cached IDs and are recorded for `document` the
    /// same way [Connector::process_document] records them. IDs that are
    /// already mapped keep their existing rows.
    ///
    /// * `pipeline`: Repository and cache to use.
    /// * `namespace`: Namespace to restore the vectors to, created if missing.
    /// * `document`: The document whose cache artifact is read.
    pub async fn restore_document<R, C>(
        &self,
        pipeline: &Pipeline<R, C>,
        namespace: &str,
        document: &DocumentRecord,
    ) -> Result<ProcessedDocument, HubError>
    where
        R: DocumentVectorRepo + Sync,
        C: VectorCache + Sync,
    {
        if namespace.is_empty() {
            return err!(MissingArgument, "namespace name");
        }

        let key = cache_key(&document.doc_id);

        let Some(entries) = pipeline.cache.read_vector_result(&key).await? else {
            return err!(DoesNotExist, "cached vectors of document '{}'", document.doc_id);
        };

        if entries.is_empty() || entries.iter().any(|e| e.values.is_empty()) {
            return err!(InvalidArgument, "cache artifact '{key}' holds no usable vectors");
        }

        let db = self.connect().await?;

        let records: Vec<VectorRecord> = entries.into_iter().map(VectorRecord::from).collect();

        self.store_records(pipeline, db, namespace, &records, document)
            .await?;

        info!(
            "{} | restored document '{}' into '{namespace}' ({} vector(s))",
            self.ty,
            document.doc_id,
            records.len()
        );

        Ok(ProcessedDocument {
            vector_ids: records.into_iter().map(|r| r.id).collect(),
            cache_key: key,
        })
    }

    /// Create the namespace and insert the records batch by batch, persisting
    /// the mapping rows of each batch once the backend accepted it.
    async fn store_records<R, C>(
        &self,
        pipeline: &Pipeline<R, C>,
        db: &DynVectorDb,
        namespace: &str,
        records: &[VectorRecord],
        document: &DocumentRecord,
    ) -> Result<(), HubError>
    where
        R: DocumentVectorRepo + Sync,
    {
        let Some(first) = records.first() else {
            return Ok(());
        };

        db.ensure_namespace(namespace, first.embedding.len())
            .await?;

        for (i, batch) in records.chunks(pipeline.batch_size).enumerate() {
            db.insert_records(namespace, batch).await?;

            let rows: Vec<DocumentVectorInsert<'_>> = batch
                .iter()
                .map(|record| DocumentVectorInsert::new(document, &record.id))
                .collect();

            pipeline.repo.insert_document_vectors(&rows).await?;

            debug!(
                "{} | inserted batch {} ({} vector(s)) into '{namespace}'",
                self.ty,
                i + 1,
                batch.len()
            );
        }

        Ok(())
    }
}

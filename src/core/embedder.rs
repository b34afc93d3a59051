use crate::error::HubError;

/// Operations related to embeddings and their models.
#[async_trait::async_trait]
pub trait Embedder {
    fn id(&self) -> &'static str;

    /// The model used for embedding and its vector size.
    fn model(&self) -> (String, usize);

    /// Embed all `chunks` in one batched request. The returned vectors
    /// are in the same order as the input. An empty result means the
    /// provider produced nothing and is treated as a total failure by callers.
    ///
    /// * `chunks`: The text to embed.
    async fn embed_text_chunks(&self, chunks: &[&str]) -> Result<Vec<Vec<f32>>, HubError>;
}

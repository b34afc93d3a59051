use crate::core::embedder::Embedder;
use crate::error::HubError;
use crate::map_err;

pub use vectorhub_embedders::openai::OpenAiEmbeddings;

#[async_trait::async_trait]
impl Embedder for OpenAiEmbeddings {
    fn id(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> (String, usize) {
        let size = self
            .list_embedding_models()
            .into_iter()
            .find(|(name, _)| name == self.model())
            .map(|(_, size)| size)
            .unwrap_or_default();
        (self.model().to_string(), size)
    }

    async fn embed_text_chunks(&self, chunks: &[&str]) -> Result<Vec<Vec<f32>>, HubError> {
        Ok(super::to_f32(map_err!(self.embed(chunks).await)))
    }
}

use crate::core::embedder::Embedder;
use crate::error::HubError;
use crate::map_err;

pub use vectorhub_embedders::fastembed::{remote::RemoteFastEmbedder, DEFAULT_MODEL};

/// Vector size of [DEFAULT_MODEL].
pub const DEFAULT_MODEL_SIZE: usize = 768;

pub fn init(url: String) -> RemoteFastEmbedder {
    RemoteFastEmbedder::new(url, DEFAULT_MODEL.to_string())
}

#[async_trait::async_trait]
impl Embedder for RemoteFastEmbedder {
    fn id(&self) -> &'static str {
        "fembed"
    }

    fn model(&self) -> (String, usize) {
        let size = if self.model == DEFAULT_MODEL {
            DEFAULT_MODEL_SIZE
        } else {
            0
        };
        (self.model.clone(), size)
    }

    async fn embed_text_chunks(&self, chunks: &[&str]) -> Result<Vec<Vec<f32>>, HubError> {
        Ok(super::to_f32(map_err!(self.embed(chunks).await)))
    }
}

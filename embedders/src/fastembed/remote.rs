use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Embedder implementation for communicating with a fastembed server on a remote
/// machine.
pub struct RemoteFastEmbedder {
    pub client: reqwest::Client,
    pub url: String,
    pub model: String,
}

impl RemoteFastEmbedder {
    /// Initialise the FastEmbedder remote client.
    pub fn new(url: String, model: String) -> RemoteFastEmbedder {
        tracing::info!("Initializing remote Fastembed at {url} ({model})");
        let client = reqwest::Client::new();
        RemoteFastEmbedder { client, url, model }
    }

    pub async fn list_models(&self) -> Result<Vec<(String, usize)>, EmbeddingError> {
        let url = self.url("list");
        let response: HashMap<String, usize> = self.client.get(&url).send().await?.json().await?;
        Ok(response.into_iter().collect())
    }

    pub async fn embed(&self, content: &[&str]) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        if content.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "cannot embed empty input".to_string(),
            ));
        }

        let url = self.url("embed");
        let request = EmbedRequest {
            model: self.model.clone(),
            content: content.iter().map(|s| s.to_string()).collect(),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: EmbedResponse = response.json().await?;

        debug!(
            "Embedded {} chunk(s) with '{}'",
            response.embeddings.len(),
            self.model
        );

        Ok(response.embeddings)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
pub struct EmbedRequest {
    model: String,
    content: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    embeddings: Vec<Vec<f64>>,
}

impl std::fmt::Debug for RemoteFastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFastEmbedder")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

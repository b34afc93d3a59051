use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tracing::debug;

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com";

/// Model used when the caller does not pick one.
pub const DEFAULT_OPENAI_MODEL: &str = TEXT_EMBEDDING_ADA_002;

pub struct OpenAiEmbeddings {
    endpoint: String,
    key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: &str) -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            key: api_key.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at an OpenAI compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Result<Self, EmbeddingError> {
        if !self
            .list_embedding_models()
            .iter()
            .any(|(name, _)| name == model)
        {
            return Err(EmbeddingError::InvalidModel(model.to_string()));
        }
        self.model = model.to_string();
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn list_embedding_models(&self) -> Vec<(String, usize)> {
        vec![
            (String::from(TEXT_EMBEDDING_3_LARGE), 3072),
            (String::from(TEXT_EMBEDDING_3_SMALL), 1536),
            (String::from(TEXT_EMBEDDING_ADA_002), 1536),
        ]
    }

    /// Embed all of `input` in a single request. The returned vectors are
    /// in the same order as `input`.
    pub async fn embed(&self, input: &[&str]) -> Result<Vec<Vec<f64>>, EmbeddingError> {
        if input.is_empty() {
            return Err(EmbeddingError::InvalidInput(format!(
                "cannot be empty (len = {})",
                input.len()
            )));
        }

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: input.iter().map(|s| s.to_string()).collect(),
        };

        let response = match self
            .client
            .post(format!("{}/v1/embeddings", self.endpoint))
            .bearer_auth(&self.key)
            .json(&request)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                tracing::error!("Error in OpenAI request: {e}");
                return Err(EmbeddingError::Reqwest(e));
            }
        };

        if response.status() != 200 {
            tracing::error!(
                "Request to {} failed with status {}",
                response.url(),
                response.status()
            );
            let response = match response.json::<OpenAIError>().await {
                Ok(res) => res,
                Err(e) => {
                    tracing::error!("Error reading OpenAI response: {}", e);
                    tracing::error!("Source: {:?}", e.source());
                    return Err(EmbeddingError::Reqwest(e));
                }
            };
            tracing::error!("Response: {response:?}");
            return Err(EmbeddingError::OpenAI(response));
        }

        let mut response = match response.json::<EmbeddingResponse>().await {
            Ok(res) => res,
            Err(e) => {
                tracing::error!("Error decoding OpenAI response: {}", e);
                tracing::error!("Source: {:?}", e.source());
                return Err(EmbeddingError::Reqwest(e));
            }
        };

        debug!(
            "Embedded {} chunk(s) with '{}', used tokens {}-{} (prompt-total)",
            input.len(),
            response.model,
            response.usage.prompt_tokens,
            response.usage.total_tokens
        );

        response.data.sort_by_key(|o| o.index);

        Ok(response.data.into_iter().map(|o| o.embedding).collect())
    }
}

impl std::fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingObject>,
    model: String,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingObject {
    embedding: Vec<f64>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    total_tokens: usize,
}

#[derive(Debug, Deserialize, Error)]
#[error("{message}, type: {r#type}, param: {param:?}, code: {code:?}")]
pub struct OpenAIErrorParams {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Deserialize, Error)]
#[error("Open AI error response {{ {error} }}")]
pub struct OpenAIError {
    pub error: OpenAIErrorParams,
}

const TEXT_EMBEDDING_3_LARGE: &str = "text-embedding-3-large";
const TEXT_EMBEDDING_3_SMALL: &str = "text-embedding-3-small";
const TEXT_EMBEDDING_ADA_002: &str = "text-embedding-ada-002";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn orders_embeddings_by_index() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "model": "text-embedding-ada-002",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [1.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [0.0, 0.0] }
                ],
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbeddings::new("sk-test").with_endpoint(&server.uri());
        let embeddings = embedder.embed(&["first", "second"]).await.unwrap();

        assert_eq!(vec![vec![0.0, 0.0], vec![1.0, 1.0]], embeddings);
    }

    #[tokio::test]
    async fn maps_api_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key provided",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": "invalid_api_key"
                }
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbeddings::new("sk-bad").with_endpoint(&server.uri());
        let err = embedder.embed(&["first"]).await.unwrap_err();

        assert!(matches!(err, EmbeddingError::OpenAI(_)));
    }

    #[test]
    fn rejects_unknown_models() {
        assert!(OpenAiEmbeddings::new("k").with_model("nope").is_err());
        assert!(OpenAiEmbeddings::new("k")
            .with_model("text-embedding-3-small")
            .is_ok());
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[cfg(feature = "openai")]
    #[error(transparent)]
    OpenAI(#[from] crate::openai::OpenAIError),

    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[cfg(any(feature = "openai", feature = "fe-remote"))]
    #[error("http client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

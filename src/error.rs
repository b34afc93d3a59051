use std::error::Error as _;
use thiserror::Error;
use tracing::error;
use validify::ValidationErrors;

#[cfg(feature = "qdrant")]
use qdrant_client::QdrantError;

#[derive(Debug, Error)]
pub enum HubErr {
    #[error("Unsupported connector; {0}")]
    UnsupportedConnector(String),

    #[error("Connector validation failed; {0}")]
    Validation(String),

    #[error("Embedding failure; {0}")]
    EmbeddingFailure(String),

    #[error("Backend transport; {0}")]
    Transport(String),

    #[error("Missing argument; {0}")]
    MissingArgument(String),

    #[error("Invalid argument; {0}")]
    InvalidArgument(String),

    #[error("Connector type mismatch; {0}")]
    TypeMismatch(String),

    #[error("Backend unhealthy; {0}")]
    Unhealthy(String),

    #[error("Does not exist; {0}")]
    DoesNotExist(String),

    #[error("Invalid provider; {0}")]
    InvalidProvider(String),

    #[error("Invalid settings; {0}")]
    Settings(#[from] ValidationErrors),

    #[cfg(any(feature = "openai", feature = "fe-remote"))]
    #[error("embedding error; {0}")]
    Embedding(#[from] vectorhub_embedders::error::EmbeddingError),

    #[error("IO; {0}")]
    IO(#[from] std::io::Error),

    #[error("SQL; {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration; {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error; {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Http; {0}")]
    Reqwest(#[from] reqwest::Error),

    #[cfg(feature = "qdrant")]
    #[error("Qdrant; {0}")]
    Qdrant(#[from] QdrantError),

    #[cfg(feature = "weaviate")]
    #[error("Weaviate; {0}")]
    Weaviate(String),

    #[error("uuid: {0}")]
    Uuid(#[from] uuid::Error),
}

#[derive(Debug, Error)]
#[error("{error}")]
pub struct HubError {
    file: &'static str,
    line: u32,
    column: u32,
    pub error: HubErr,
}

impl HubError {
    pub fn new(file: &'static str, line: u32, column: u32, error: HubErr) -> HubError {
        HubError {
            file,
            line,
            column,
            error,
        }
    }

    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file, self.line, self.column)
    }

    pub fn print(&self) {
        let location = self.location();

        error!("{location} | {self}");

        if self.error.source().is_some() {
            error!("Causes:");
        }

        let mut src = self.error.source();
        while let Some(source) = src {
            error!(" - {source}");
            src = source.source();
        }
    }
}

#[macro_export]
macro_rules! err {
    ($ty:ident $(, $l:literal $(,)? $($args:expr),* )?) => {
        Err($crate::error::HubError::new(
            file!(),
            line!(),
            column!(),
            $crate::error::HubErr::$ty $( (format!($l, $( $args, )*)) )?,
        ))
    };
}

#[macro_export]
macro_rules! map_err {
    ($ex:expr) => {
        $ex.map_err(|e| $crate::error::HubError::new(file!(), line!(), column!(), e.into()))?
    };
}

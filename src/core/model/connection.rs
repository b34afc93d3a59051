use crate::{err, error::HubError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use std::{fmt::Display, str::FromStr};

/// The closed set of backends a connector can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Chroma,
    Pinecone,
    Qdrant,
    Weaviate,
    Milvus,
    ClickHouse,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 6] = [
        ConnectorType::Chroma,
        ConnectorType::Pinecone,
        ConnectorType::Qdrant,
        ConnectorType::Weaviate,
        ConnectorType::Milvus,
        ConnectorType::ClickHouse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Chroma => "chroma",
            ConnectorType::Pinecone => "pinecone",
            ConnectorType::Qdrant => "qdrant",
            ConnectorType::Weaviate => "weaviate",
            ConnectorType::Milvus => "milvus",
            ConnectorType::ClickHouse => "clickhouse",
        }
    }
}

impl Display for ConnectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chroma" => Ok(ConnectorType::Chroma),
            "pinecone" => Ok(ConnectorType::Pinecone),
            "qdrant" => Ok(ConnectorType::Qdrant),
            "weaviate" => Ok(ConnectorType::Weaviate),
            "milvus" => Ok(ConnectorType::Milvus),
            "clickhouse" => Ok(ConnectorType::ClickHouse),
            _ => err!(UnsupportedConnector, "'{s}'"),
        }
    }
}

/// A validated binding between an organization and a backend instance.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationConnection {
    /// Primary key.
    pub id: i64,

    pub organization_id: i64,

    /// Connector type tag, see [ConnectorType].
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub ty: String,

    /// Backend specific settings, opaque to everything but the connector.
    pub settings: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl OrganizationConnection {
    pub fn connector_type(&self) -> Result<ConnectorType, HubError> {
        self.ty.parse()
    }
}

/// Insert payload for [OrganizationConnection].
#[derive(Debug, Clone)]
pub struct ConnectionInsert<'a> {
    pub organization_id: i64,
    pub ty: ConnectorType,
    pub settings: &'a serde_json::Value,
}

/// Result of probing a backend with a set of connector settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub message: Option<String>,
}

impl Validation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl ToString) -> Self {
        Self {
            valid: false,
            message: Some(message.to_string()),
        }
    }
}

//! Maps persisted connector type tags to backend implementations.

use super::vector::{
    chroma::ChromaDb, clickhouse::ClickHouseDb, milvus::MilvusDb, pinecone::PineconeDb,
};
use crate::core::{
    connector::{Connector, DynVectorDb},
    model::connection::{ConnectorType, Validation},
    provider::ConnectorProvider,
};
use crate::error::HubError;
use serde_json::Value;
use std::sync::Arc;

/// The connector factory used by the application.
///
/// Backends behind disabled features are rejected as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connectors;

/// Build the backend for a connector type. Settings are parsed and validated,
/// no connection is made.
///
/// * `ty`: Connector type.
/// * `settings`: Backend specific settings.
pub fn backend(ty: ConnectorType, settings: &Value) -> Result<DynVectorDb, HubError> {
    let db: DynVectorDb = match ty {
        ConnectorType::Chroma => Arc::new(ChromaDb::from_settings(settings)?),
        ConnectorType::Pinecone => Arc::new(PineconeDb::from_settings(settings)?),
        ConnectorType::Milvus => Arc::new(MilvusDb::from_settings(settings)?),
        ConnectorType::ClickHouse => Arc::new(ClickHouseDb::from_settings(settings)?),

        #[cfg(feature = "qdrant")]
        ConnectorType::Qdrant => Arc::new(super::vector::qdrant::QdrantDb::from_settings(settings)?),

        #[cfg(feature = "weaviate")]
        ConnectorType::Weaviate => {
            Arc::new(super::vector::weaviate::WeaviateDb::from_settings(settings)?)
        }

        #[allow(unreachable_patterns)]
        ty => {
            return crate::err!(
                UnsupportedConnector,
                "'{ty}' is not enabled in this build"
            )
        }
    };
    Ok(db)
}

#[async_trait::async_trait]
impl ConnectorProvider for Connectors {
    fn select(&self, ty: &str, settings: &Value) -> Result<Connector, HubError> {
        let ty: ConnectorType = ty.parse()?;
        let db = backend(ty, settings)?;
        Ok(Connector::new(ty, db))
    }

    async fn validate(&self, ty: &str, settings: &Value) -> Validation {
        super::validator::validate(ty, settings).await
    }
}

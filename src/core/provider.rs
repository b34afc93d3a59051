use super::embedder::Embedder;
use crate::error::HubError;
use std::sync::Arc;

pub type DynEmbedder = Arc<dyn Embedder + Send + Sync>;

/// Provider factories are used to decouple concrete implementations from the business logic.
///
/// Embedders are obtained through the key the caller passes along with a document.
pub trait ProviderFactory<T> {
    /// Obtain the provider registered under `input`.
    fn get_provider(&self, input: &str) -> Result<T, HubError>;

    /// A list of available providers for a given functionality.
    fn list_provider_ids(&self) -> Vec<&'static str>;

    /// Register a new provider in this factory.
    fn register(&mut self, id: &'static str, provider: T);
}

/// Turns persisted connector records into live connectors.
#[async_trait::async_trait]
pub trait ConnectorProvider {
    /// Map a connector type tag and its settings to a connector. Performs no I/O.
    ///
    /// * `ty`: Connector type tag.
    /// * `settings`: Backend specific settings.
    fn select(
        &self,
        ty: &str,
        settings: &serde_json::Value,
    ) -> Result<super::connector::Connector, HubError>;

    /// Check the settings and probe the backend once, without persisting anything.
    ///
    /// * `ty`: Connector type tag.
    /// * `settings`: Backend specific settings.
    async fn validate(
        &self,
        ty: &str,
        settings: &serde_json::Value,
    ) -> super::model::connection::Validation;
}

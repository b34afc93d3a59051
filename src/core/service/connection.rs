use crate::core::connector::Connector;
use crate::core::model::connection::{
    ConnectionInsert, ConnectorType, OrganizationConnection, Validation,
};
use crate::core::provider::ConnectorProvider;
use crate::core::repo::ConnectionRepo;
use crate::{err, error::HubError};
use std::sync::Arc;
use tracing::{info, warn};

pub type DynConnectorProvider = Arc<dyn ConnectorProvider + Send + Sync>;

/// High level operations related to registering connectors and obtaining
/// live connectors from them.
#[derive(Clone)]
pub struct ConnectionService<Repo> {
    repo: Repo,
    connectors: DynConnectorProvider,
}

impl<Repo> ConnectionService<Repo> {
    pub fn new(repo: Repo, connectors: DynConnectorProvider) -> Self {
        Self { repo, connectors }
    }
}

impl<Repo> ConnectionService<Repo>
where
    Repo: ConnectionRepo + Send + Sync,
{
    /// Probe the backend with the given settings. Persists nothing.
    ///
    /// * `ty`: Connector type tag.
    /// * `settings`: Backend specific settings.
    pub async fn validate(&self, ty: &str, settings: &serde_json::Value) -> Validation {
        self.connectors.validate(ty, settings).await
    }

    /// Validate the settings and persist the connection only if they are valid.
    ///
    /// * `organization_id`: The organization the connection belongs to.
    /// * `ty`: Connector type tag.
    /// * `settings`: Backend specific settings.
    pub async fn register(
        &self,
        organization_id: i64,
        ty: &str,
        settings: &serde_json::Value,
    ) -> Result<OrganizationConnection, HubError> {
        let connector_type: ConnectorType = ty.parse()?;

        let Validation { valid, message } = self.validate(ty, settings).await;

        if !valid {
            let message = message.unwrap_or_else(|| String::from("unknown reason"));
            warn!("Rejected '{ty}' connector for organization {organization_id}: {message}");
            return err!(Validation, "{message}");
        }

        let connection = self
            .repo
            .insert_connection(ConnectionInsert {
                organization_id,
                ty: connector_type,
                settings,
            })
            .await?;

        info!(
            "Registered '{ty}' connector {} for organization {organization_id}",
            connection.id
        );

        Ok(connection)
    }

    /// Build the connector for a persisted connection.
    ///
    /// * `connection_id`: Connection ID.
    pub async fn connector(&self, connection_id: i64) -> Result<Connector, HubError> {
        let Some(connection) = self.repo.get_connection(connection_id).await? else {
            return err!(DoesNotExist, "Connection with ID '{connection_id}'");
        };
        self.connector_for(&connection)
    }

    /// Build the connector for a connection record.
    ///
    /// * `connection`: The persisted connection.
    pub fn connector_for(&self, connection: &OrganizationConnection) -> Result<Connector, HubError> {
        self.connectors
            .select(&connection.ty, &connection.settings)
    }

    /// List the connections of an organization.
    ///
    /// * `organization_id`: Organization ID.
    pub async fn list(&self, organization_id: i64) -> Result<Vec<OrganizationConnection>, HubError> {
        self.repo.list_connections(organization_id).await
    }
}

use crate::{
    core::{
        model::connection::{ConnectionInsert, OrganizationConnection},
        repo::ConnectionRepo,
    },
    error::HubError,
    map_err,
};
use sqlx::PgPool;

impl ConnectionRepo for PgPool {
    async fn insert_connection(
        &self,
        insert: ConnectionInsert<'_>,
    ) -> Result<OrganizationConnection, HubError> {
        let ConnectionInsert {
            organization_id,
            ty,
            settings,
        } = insert;

        Ok(map_err!(
            sqlx::query_as::<_, OrganizationConnection>(
                "INSERT INTO organization_connections
                    (organization_id, type, settings)
                 VALUES
                    ($1, $2, $3)
                 RETURNING
                    id, organization_id, type, settings, created_at
                ",
            )
            .bind(organization_id)
            .bind(ty.as_str())
            .bind(settings)
            .fetch_one(self)
            .await
        ))
    }

    async fn get_connection(&self, id: i64) -> Result<Option<OrganizationConnection>, HubError> {
        Ok(map_err!(
            sqlx::query_as::<_, OrganizationConnection>(
                "SELECT id, organization_id, type, settings, created_at
                 FROM organization_connections
                 WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(self)
            .await
        ))
    }

    async fn list_connections(
        &self,
        organization_id: i64,
    ) -> Result<Vec<OrganizationConnection>, HubError> {
        Ok(map_err!(
            sqlx::query_as::<_, OrganizationConnection>(
                "SELECT id, organization_id, type, settings, created_at
                 FROM organization_connections
                 WHERE organization_id = $1
                 ORDER BY id",
            )
            .bind(organization_id)
            .fetch_all(self)
            .await
        ))
    }
}

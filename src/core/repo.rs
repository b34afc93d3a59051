use crate::{
    core::model::{
        connection::{ConnectionInsert, OrganizationConnection},
        document::{DocumentVector, DocumentVectorInsert},
    },
    error::HubError,
};
use std::future::Future;

/// Keeps track of validated organization connections.
pub trait ConnectionRepo {
    /// Persist a connection. Callers must validate the settings first.
    ///
    /// * `insert`: Connection insert DTO.
    fn insert_connection(
        &self,
        insert: ConnectionInsert<'_>,
    ) -> impl Future<Output = Result<OrganizationConnection, HubError>> + Send;

    /// Get a connection by its ID.
    ///
    /// * `id`: Connection ID.
    fn get_connection(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<OrganizationConnection>, HubError>> + Send;

    /// List all connections of an organization.
    ///
    /// * `organization_id`: Organization ID.
    fn list_connections(
        &self,
        organization_id: i64,
    ) -> impl Future<Output = Result<Vec<OrganizationConnection>, HubError>> + Send;
}

/// Keeps track of which vectors were produced by which document.
pub trait DocumentVectorRepo {
    /// Insert mapping rows. Rows for vector IDs that are already mapped are skipped,
    /// so re-running an insert for the same vectors is harmless.
    /// Returns the amount of rows created.
    ///
    /// * `rows`: One row per inserted vector.
    fn insert_document_vectors(
        &self,
        rows: &[DocumentVectorInsert<'_>],
    ) -> impl Future<Output = Result<u64, HubError>> + Send;

    /// List all mapping rows of a document.
    ///
    /// * `document_id`: Document ID.
    fn list_document_vectors(
        &self,
        document_id: i64,
    ) -> impl Future<Output = Result<Vec<DocumentVector>, HubError>> + Send;

    /// Delete the mapping rows of the given vectors.
    ///
    /// * `vector_ids`: Vector IDs.
    fn delete_document_vectors(
        &self,
        vector_ids: &[String],
    ) -> impl Future<Output = Result<u64, HubError>> + Send;
}

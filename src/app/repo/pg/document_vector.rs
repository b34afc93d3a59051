use crate::{
    core::{
        model::document::{DocumentVector, DocumentVectorInsert},
        repo::DocumentVectorRepo,
    },
    error::HubError,
    map_err,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

impl DocumentVectorRepo for PgPool {
    async fn insert_document_vectors(
        &self,
        rows: &[DocumentVectorInsert<'_>],
    ) -> Result<u64, HubError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut query = QueryBuilder::<Postgres>::new(
            "INSERT INTO document_vectors
                (doc_id, vector_id, document_id, workspace_id, organization_id) ",
        );

        query.push_values(rows, |mut b, row| {
            b.push_bind(row.doc_id)
                .push_bind(row.vector_id)
                .push_bind(row.document_id)
                .push_bind(row.workspace_id)
                .push_bind(row.organization_id);
        });

        query.push(" ON CONFLICT (vector_id) DO NOTHING");

        let result = map_err!(query.build().execute(self).await);

        Ok(result.rows_affected())
    }

    async fn list_document_vectors(
        &self,
        document_id: i64,
    ) -> Result<Vec<DocumentVector>, HubError> {
        Ok(map_err!(
            sqlx::query_as::<_, DocumentVector>(
                "SELECT id, doc_id, vector_id, document_id, workspace_id, organization_id, created_at
                 FROM document_vectors
                 WHERE document_id = $1
                 ORDER BY id",
            )
            .bind(document_id)
            .fetch_all(self)
            .await
        ))
    }

    async fn delete_document_vectors(&self, vector_ids: &[String]) -> Result<u64, HubError> {
        if vector_ids.is_empty() {
            return Ok(0);
        }

        let result = map_err!(
            sqlx::query("DELETE FROM document_vectors WHERE vector_id = ANY($1)")
                .bind(vector_ids)
                .execute(self)
                .await
        );

        Ok(result.rows_affected())
    }
}

use crate::{error::HubError, map_err};
use sqlx::PgPool;
use tracing::info;

pub mod connection;
pub mod document_vector;

/// Connect to the database and run the embedded migrations.
pub async fn init(url: &str) -> Result<PgPool, HubError> {
    let pool = map_err!(sqlx::postgres::PgPool::connect(url).await);

    map_err!(sqlx::migrate!().run(&pool).await);

    info!("Connected to postgres");

    Ok(pool)
}

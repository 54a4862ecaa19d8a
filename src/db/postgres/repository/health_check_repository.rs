use crate::db::postgres::connection::PostgresConnection;
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait TraitHealthCheckRepository {
    async fn check(&self) -> Result<bool, StorageError>;
}

pub struct StructHealthCheckRepository {
    connection: Arc<PostgresConnection>,
}

impl StructHealthCheckRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitHealthCheckRepository for StructHealthCheckRepository {
    async fn check(&self) -> Result<bool, StorageError> {
        let pool = self.connection.get_pool();

        // Simple health check query
        let result = storage_call(
            self.connection.query_timeout(),
            "health_check",
            sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool),
        )
        .await?;

        Ok(result == 1)
    }
}

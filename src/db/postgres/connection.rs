use crate::env_config::models::app_setting::AppSettings;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
    query_timeout: Duration,
}

impl PostgresConnection {
    pub async fn new(settings: Arc<AppSettings>) -> Result<Self, sqlx::Error> {
        info!("Initializing PostgreSQL connection...");

        let connection_string = format!(
            "postgres://{}:{}@{}/{}",
            settings.app_env.postgres_user,
            settings.app_env.postgres_password,
            settings.app_env.postgres_host,
            settings.app_env.postgres_database
        );

        let config = &settings.app_config.postgres;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(Duration::from_secs(config.max_lifetime))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .acquire_timeout(Duration::from_secs(config.timeout))
            .connect(&connection_string)
            .await?;

        // Test connection
        debug!("Executing test query on PostgreSQL");
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => info!("PostgreSQL connection successful"),
            Err(e) => {
                error!("Failed to connect to PostgreSQL: {}", e);
                return Err(e);
            }
        }

        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout),
        })
    }

    pub fn get_pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }
}

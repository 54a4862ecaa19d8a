// src/db/postgres/repository/component_status_repository.rs
use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::component_status::{
    ComponentName, ComponentState, ComponentStatus, PgComponentStatus,
};
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait TraitComponentStatusRepository {
    /// Sets state and message, leaving run times untouched
    async fn upsert_state(
        &self,
        component: ComponentName,
        state: ComponentState,
        message: &str,
    ) -> Result<(), StorageError>;

    /// Marks the component running and stamps `last_run`
    async fn upsert_run_start(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError>;

    async fn upsert_next_run(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError>;

    async fn get_all(&self) -> Result<Vec<ComponentStatus>, StorageError>;
}

pub struct StructComponentStatusRepository {
    connection: Arc<PostgresConnection>,
}

impl StructComponentStatusRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitComponentStatusRepository for StructComponentStatusRepository {
    async fn upsert_state(
        &self,
        component: ComponentName,
        state: ComponentState,
        message: &str,
    ) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "upsert_component_state",
            sqlx::query(
                "INSERT INTO component_status (component, state, message, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (component)
                 DO UPDATE SET state = $2, message = $3, updated_at = NOW()",
            )
            .bind(component.as_str())
            .bind(state.as_str())
            .bind(message)
            .execute(pool),
        )
        .await;

        match result {
            Ok(_) => {
                debug!("Component {} is now {}: {}", component, state, message);
                Ok(())
            }
            Err(e) => {
                error!("Error updating state of {}: {}", component, e);
                Err(e)
            }
        }
    }

    async fn upsert_run_start(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "upsert_component_run_start",
            sqlx::query(
                "INSERT INTO component_status (component, state, last_run, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (component)
                 DO UPDATE SET state = $2, last_run = $3, updated_at = NOW()",
            )
            .bind(component.as_str())
            .bind(ComponentState::Running.as_str())
            .bind(at)
            .execute(pool),
        )
        .await;

        if let Err(e) = &result {
            error!("Error marking start of {}: {}", component, e);
        }

        result.map(|_| ())
    }

    async fn upsert_next_run(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "upsert_component_next_run",
            sqlx::query(
                "INSERT INTO component_status (component, state, next_run, updated_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (component)
                 DO UPDATE SET next_run = $3, updated_at = NOW()",
            )
            .bind(component.as_str())
            .bind(ComponentState::Running.as_str())
            .bind(at)
            .execute(pool),
        )
        .await;

        if let Err(e) = &result {
            error!("Error updating next run of {}: {}", component, e);
        }

        result.map(|_| ())
    }

    async fn get_all(&self) -> Result<Vec<ComponentStatus>, StorageError> {
        let pool = self.connection.get_pool();

        let rows = storage_call(
            self.connection.query_timeout(),
            "get_component_statuses",
            sqlx::query_as::<_, PgComponentStatus>(
                "SELECT component, state, last_run, next_run, message, updated_at
                 FROM component_status
                 ORDER BY component",
            )
            .fetch_all(pool),
        )
        .await
        .inspect_err(|e| error!("Error fetching component statuses: {}", e))?;

        debug!("Fetched {} component status rows", rows.len());

        rows.into_iter().map(ComponentStatus::try_from).collect()
    }
}

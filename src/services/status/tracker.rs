// src/services/status/tracker.rs
use crate::db::postgres::models::component_status::{ComponentName, ComponentState, ComponentStatus};
use crate::db::postgres::repository::component_status_repository::TraitComponentStatusRepository;
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Records the operational state of each component. Last write wins.
#[derive(Clone)]
pub struct StatusTracker {
    repository: Arc<dyn TraitComponentStatusRepository + Send + Sync>,
}

impl StatusTracker {
    pub fn new(repository: Arc<dyn TraitComponentStatusRepository + Send + Sync>) -> Self {
        Self { repository }
    }

    pub async fn report(
        &self,
        component: ComponentName,
        state: ComponentState,
        message: &str,
    ) -> Result<(), StorageError> {
        match state {
            ComponentState::Error => warn!("{} reported error: {}", component, message),
            _ => info!("{} is {}: {}", component, state, message),
        }
        self.repository.upsert_state(component, state, message).await
    }

    pub async fn heartbeat(&self, component: ComponentName, next_run: DateTime<Utc>) -> Result<(), StorageError> {
        self.repository.upsert_next_run(component, next_run).await
    }

    /// State becomes running and `last_run` is stamped with `now`
    pub async fn mark_started(&self, component: ComponentName, now: DateTime<Utc>) -> Result<(), StorageError> {
        self.repository.upsert_run_start(component, now).await
    }

    pub async fn snapshot(&self) -> Result<Vec<ComponentStatus>, StorageError> {
        self.repository.get_all().await
    }

    /// Marks the component stopped. A failed write is only logged.
    pub async fn stop(&self, component: ComponentName, message: &str) {
        info!("{} stopped: {}", component, message);
        if let Err(e) = self
            .repository
            .upsert_state(component, ComponentState::Stopped, message)
            .await
        {
            warn!("Failed to mark {} stopped: {}", component, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    #[tokio::test]
    async fn test_report_then_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let tracker = StatusTracker::new(store.clone());
        let now = Utc::now();

        tracker.mark_started(ComponentName::DataFetcher, now).await.unwrap();
        tracker
            .report(ComponentName::DataFetcher, ComponentState::Error, "failed: F")
            .await
            .unwrap();
        tracker
            .heartbeat(ComponentName::DataFetcher, now + chrono::Duration::seconds(240))
            .await
            .unwrap();

        let rows = tracker.snapshot().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, ComponentState::Error);
        assert_eq!(rows[0].message, "failed: F");
        assert_eq!(rows[0].last_run, Some(now));
        assert_eq!(rows[0].next_run, Some(now + chrono::Duration::seconds(240)));
    }

    #[tokio::test]
    async fn test_stop_touches_only_its_component() {
        let store = Arc::new(MemoryStore::default());
        let tracker = StatusTracker::new(store.clone());

        tracker
            .report(ComponentName::Analytics, ComponentState::Running, "analyzed 2 tickers")
            .await
            .unwrap();
        tracker.stop(ComponentName::DataFetcher, "shutdown").await;

        let fetcher = store.status(ComponentName::DataFetcher).unwrap();
        assert_eq!(fetcher.state, ComponentState::Stopped);
        assert_eq!(fetcher.message, "shutdown");
        assert_eq!(
            store.status(ComponentName::Analytics).unwrap().state,
            ComponentState::Running
        );
    }
}

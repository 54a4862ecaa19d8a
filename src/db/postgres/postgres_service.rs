use crate::db::postgres::repository::{
    alert_record_repository::{StructAlertRecordRepository, TraitAlertRecordRepository},
    component_status_repository::{StructComponentStatusRepository, TraitComponentStatusRepository},
    daily_bar_repository::{StructDailyBarRepository, TraitDailyBarRepository},
    health_check_repository::{StructHealthCheckRepository, TraitHealthCheckRepository},
    latest_snapshot_repository::{StructLatestSnapshotRepository, TraitLatestSnapshotRepository},
    watchlist_repository::{StructWatchlistRepository, TraitWatchlistRepository},
};
use crate::db::postgres::{connection::PostgresConnection, schema};
use crate::env_config::models::app_setting::AppSettings;
use std::sync::Arc;
use tracing::{error, info};

pub struct PostgresService {
    // Repositories
    pub repository_health_check: Arc<dyn TraitHealthCheckRepository + Send + Sync>,
    pub repository_watchlist: Arc<dyn TraitWatchlistRepository + Send + Sync>,
    pub repository_daily_bar: Arc<dyn TraitDailyBarRepository + Send + Sync>,
    pub repository_latest_snapshot: Arc<dyn TraitLatestSnapshotRepository + Send + Sync>,
    pub repository_component_status: Arc<dyn TraitComponentStatusRepository + Send + Sync>,
    pub repository_alert_record: Arc<dyn TraitAlertRecordRepository + Send + Sync>,
}

impl PostgresService {
    pub async fn new(settings: &Arc<AppSettings>) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing PostgreSQL service components");

        // Initialize PostgreSQL connection
        info!("Creating PostgreSQL connection");
        let postgres_connection = match PostgresConnection::new(settings.clone()).await {
            Ok(conn) => {
                info!("PostgreSQL connection established successfully");
                Arc::new(conn)
            }
            Err(e) => {
                error!("Failed to establish PostgreSQL connection: {}", e);
                return Err(Box::new(e));
            }
        };

        if let Err(e) = schema::ensure_schema(postgres_connection.get_pool()).await {
            error!("Failed to bootstrap database schema: {}", e);
            return Err(Box::new(e));
        }

        // Initialize repositories
        info!("Initializing repositories");

        let health_check_repository = Arc::new(StructHealthCheckRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitHealthCheckRepository + Send + Sync>;

        let watchlist_repository = Arc::new(StructWatchlistRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitWatchlistRepository + Send + Sync>;

        let daily_bar_repository = Arc::new(StructDailyBarRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitDailyBarRepository + Send + Sync>;

        let latest_snapshot_repository = Arc::new(StructLatestSnapshotRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitLatestSnapshotRepository + Send + Sync>;

        let component_status_repository = Arc::new(StructComponentStatusRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitComponentStatusRepository + Send + Sync>;

        let alert_record_repository = Arc::new(StructAlertRecordRepository::new(
            postgres_connection.clone(),
        )) as Arc<dyn TraitAlertRecordRepository + Send + Sync>;

        info!("PostgreSQL service initialized successfully");
        Ok(Self {
            repository_health_check: health_check_repository,
            repository_watchlist: watchlist_repository,
            repository_daily_bar: daily_bar_repository,
            repository_latest_snapshot: latest_snapshot_repository,
            repository_component_status: component_status_repository,
            repository_alert_record: alert_record_repository,
        })
    }
}

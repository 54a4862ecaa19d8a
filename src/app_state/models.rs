// src/app_state/models.rs
use crate::db::postgres::postgres_service::PostgresService;
use crate::env_config::models::app_setting::AppSettings;
use crate::gateway::MarketDataGateway;
use crate::notifier::MessageSink;

use std::sync::Arc;

pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub postgres_service: Arc<PostgresService>,
    pub gateway: Arc<dyn MarketDataGateway + Send + Sync>,
    pub sink: Arc<dyn MessageSink + Send + Sync>,
}

impl AppState {
    pub fn new(
        settings: Arc<AppSettings>,
        postgres_service: Arc<PostgresService>,
        gateway: Arc<dyn MarketDataGateway + Send + Sync>,
        sink: Arc<dyn MessageSink + Send + Sync>,
    ) -> Self {
        Self {
            settings,
            postgres_service,
            gateway,
            sink,
        }
    }
}

use axum::{Json, extract::Extension, extract::Query, http::StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::app_state::models::AppState;
use crate::db::postgres::models::alert_record::AlertRecord;
use crate::db::postgres::models::component_status::ComponentStatus;
use crate::services::status::tracker::StatusTracker;

/// Current row of every component that has reported so far
pub async fn status(
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<ComponentStatus>>, StatusCode> {
    let tracker = StatusTracker::new(
        app_state
            .postgres_service
            .repository_component_status
            .clone(),
    );

    tracker.snapshot().await.map(Json).map_err(|e| {
        error!("Failed to read component status: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Debug, Deserialize)]
pub struct RecentAlertsQuery {
    limit: Option<i64>,
}

const MAX_RECENT_ALERTS: i64 = 200;

pub async fn recent_alerts(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<RecentAlertsQuery>,
) -> Result<Json<Vec<AlertRecord>>, StatusCode> {
    let limit = query.limit.unwrap_or(50).clamp(1, MAX_RECENT_ALERTS);

    app_state
        .postgres_service
        .repository_alert_record
        .get_recent_alerts(limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Failed to read recent alerts: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

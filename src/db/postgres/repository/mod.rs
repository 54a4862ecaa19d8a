pub mod alert_record_repository;
pub mod component_status_repository;
pub mod daily_bar_repository;
pub mod health_check_repository;
pub mod latest_snapshot_repository;
pub mod watchlist_repository;

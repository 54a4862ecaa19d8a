pub mod alert_record;
pub mod component_status;
pub mod daily_bar;
pub mod latest_snapshot;
pub mod window;

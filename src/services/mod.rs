pub mod alerts;
pub mod analytics;
pub mod fetcher;
pub mod status;

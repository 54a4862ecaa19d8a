// src/gateway/mod.rs
pub mod yahoo;

use crate::db::postgres::models::daily_bar::DailyBar;
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

pub use yahoo::YahooFinanceGateway;

/// Latest traded price as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub quote_time: DateTime<Utc>,
}

/// Source of market data. Implementations classify every failure so the
/// caller can decide whether to retry.
#[async_trait]
pub trait MarketDataGateway {
    async fn fetch_latest(&self, ticker: &str) -> Result<Quote, GatewayError>;

    /// Daily bars for `from..=to`, ascending by date
    async fn fetch_history(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, GatewayError>;
}

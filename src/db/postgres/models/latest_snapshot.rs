use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use sqlx::types::chrono::{DateTime, Utc};

/// Represents the single row kept per ticker in the stock_latest table
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LatestSnapshot {
    pub ticker: String,

    /// Last traded price reported by the provider
    pub price: Decimal,

    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,

    /// Provider-side time of the quote
    pub quote_time: DateTime<Utc>,

    /// When this service fetched the quote
    pub fetched_at: DateTime<Utc>,
}

// src/db/postgres/models/daily_bar.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// One trading day's OHLCV record, unique per (ticker, date)
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DailyBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adj_close: Option<Decimal>,
    pub volume: Option<i64>,
}

use super::window::Window;
use crate::error::StorageError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// Append-only log entry for a delivered deviation alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub ticker: String,
    pub window: Window,
    pub current_price: Decimal,
    pub average_price: Decimal,
    pub absolute_diff: Decimal,
    pub percent_diff: Decimal,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct PgAlertRecord {
    pub ticker: String,
    pub window_days: i16,
    pub current_price: Decimal,
    pub average_price: Decimal,
    pub absolute_diff: Decimal,
    pub percent_diff: Decimal,
    pub sent_at: DateTime<Utc>,
}

impl TryFrom<PgAlertRecord> for AlertRecord {
    type Error = StorageError;

    fn try_from(row: PgAlertRecord) -> Result<Self, Self::Error> {
        let window = Window::from_days(row.window_days as i32).ok_or_else(|| {
            StorageError::InvalidData(format!("unknown alert window: {} days", row.window_days))
        })?;

        Ok(Self {
            ticker: row.ticker,
            window,
            current_price: row.current_price,
            average_price: row.average_price,
            absolute_diff: row.absolute_diff,
            percent_diff: row.percent_diff,
            sent_at: row.sent_at,
        })
    }
}

/// Index of the cooldown-sized time slot `sent_at` falls into. Two alerts in
/// the same slot are necessarily closer than one cooldown apart.
pub fn cooldown_bucket(sent_at: DateTime<Utc>, cooldown: Duration) -> i64 {
    let slot = cooldown.num_seconds().max(1);
    sent_at.timestamp().div_euclid(slot)
}

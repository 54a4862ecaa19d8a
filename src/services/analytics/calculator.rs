// src/services/analytics/calculator.rs
use crate::db::postgres::models::component_status::{ComponentName, ComponentState};
use crate::db::postgres::models::daily_bar::DailyBar;
use crate::db::postgres::models::window::Window;
use crate::db::postgres::repository::daily_bar_repository::TraitDailyBarRepository;
use crate::db::postgres::repository::latest_snapshot_repository::TraitLatestSnapshotRepository;
use crate::env_config::models::app_config::{AlertDirection, AnalyticsConfig};
use crate::error::{AnalyticsError, StorageError};
use crate::services::status::tracker::StatusTracker;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const PRICE_SCALE: u32 = 4;

/// Current price deviating from a rolling average by more than the window's threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationSignal {
    pub ticker: String,
    pub window: Window,
    pub current_price: Decimal,
    pub average_price: Decimal,
    pub absolute_difference: Decimal,
    pub percent_difference: Decimal,
}

/// Number of weekdays in `start..=end`
pub fn expected_trading_days(start: NaiveDate, end: NaiveDate) -> usize {
    if start > end {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count()
}

fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `(current - average) / average * 100`, rounded to 4 places
pub fn percent_difference(current: Decimal, average: Decimal) -> Option<Decimal> {
    if average.is_zero() {
        return None;
    }
    let ratio = (current - average).checked_div(average)?;
    Some(round_price(ratio * Decimal::ONE_HUNDRED))
}

/// Rounded mean close of the bars inside the window ending at `anchor`.
///
/// `bars` may span more than the window; only rows dated within the last
/// `window.days()` calendar days up to and including `anchor` are used.
pub fn compute_window(
    window: Window,
    bars: &[DailyBar],
    anchor: NaiveDate,
    min_coverage: Decimal,
) -> Result<Decimal, AnalyticsError> {
    let start = anchor
        .checked_sub_days(Days::new(u64::from(window.days() - 1)))
        .unwrap_or(NaiveDate::MIN);

    let closes: Vec<Decimal> = bars
        .iter()
        .filter(|b| b.date >= start && b.date <= anchor)
        .map(|b| b.close)
        .collect();

    let present = closes.len();
    let expected = expected_trading_days(start, anchor);

    if present == 0 || Decimal::from(present) < min_coverage * Decimal::from(expected) {
        return Err(AnalyticsError::InsufficientData {
            window,
            present,
            expected,
        });
    }

    let sum: Decimal = closes.iter().sum();
    let average = round_price(sum / Decimal::from(present));

    if average.is_zero() {
        return Err(AnalyticsError::ZeroAverage(window));
    }

    Ok(average)
}

/// Compares the latest price of a ticker against its rolling averages
pub struct AnalyticsEngine {
    daily_bars: Arc<dyn TraitDailyBarRepository + Send + Sync>,
    snapshots: Arc<dyn TraitLatestSnapshotRepository + Send + Sync>,
    status: StatusTracker,
    config: AnalyticsConfig,
    direction: AlertDirection,
}

impl AnalyticsEngine {
    pub fn new(
        daily_bars: Arc<dyn TraitDailyBarRepository + Send + Sync>,
        snapshots: Arc<dyn TraitLatestSnapshotRepository + Send + Sync>,
        status: StatusTracker,
        config: AnalyticsConfig,
        direction: AlertDirection,
    ) -> Self {
        Self {
            daily_bars,
            snapshots,
            status,
            config,
            direction,
        }
    }

    pub async fn begin_cycle(&self, now: DateTime<Utc>) -> Result<(), StorageError> {
        self.status.mark_started(ComponentName::Analytics, now).await
    }

    /// Records the cycle's analysis counts on the `analytics` status row
    pub async fn finish_cycle(
        &self,
        analyzed: usize,
        signals: usize,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let message = format!("analyzed {} tickers, {} signals", analyzed, signals);
        self.status
            .report(ComponentName::Analytics, ComponentState::Running, &message)
            .await?;
        self.status.heartbeat(ComponentName::Analytics, next_run).await
    }

    pub async fn stop(&self, message: &str) {
        self.status.stop(ComponentName::Analytics, message).await;
    }

    /// Signals for every window whose threshold is exceeded. A missing or
    /// stale snapshot yields no signals.
    #[instrument(skip_all, fields(ticker = %ticker))]
    pub async fn analyze_ticker(
        &self,
        ticker: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviationSignal>, StorageError> {
        let Some(snapshot) = self.snapshots.get_latest_snapshot(ticker).await? else {
            debug!("No latest snapshot for {}, skipping analysis", ticker);
            return Ok(Vec::new());
        };

        let age = now - snapshot.fetched_at;
        if age.num_seconds() > self.config.snapshot_max_age_seconds as i64 {
            info!(
                "Snapshot for {} is {}s old (max {}s), skipping analysis",
                ticker,
                age.num_seconds(),
                self.config.snapshot_max_age_seconds
            );
            return Ok(Vec::new());
        }

        let bars = self
            .daily_bars
            .get_daily_bars(ticker, Window::longest().days())
            .await?;

        let Some(anchor) = bars.iter().map(|b| b.date).max() else {
            debug!("No daily bars for {}, skipping analysis", ticker);
            return Ok(Vec::new());
        };

        let mut signals = Vec::new();
        for window in Window::ALL {
            let average = match compute_window(window, &bars, anchor, self.config.min_coverage) {
                Ok(average) => average,
                Err(e) => {
                    debug!("Skipping {} window for {}: {}", window, ticker, e);
                    continue;
                }
            };

            let Some(percent) = percent_difference(snapshot.price, average) else {
                continue;
            };
            let threshold = self.config.thresholds.for_window(window);

            debug!(
                "{} {}: price {}, average {}, deviation {}% (threshold {}%)",
                ticker, window, snapshot.price, average, percent, threshold
            );

            if percent.abs() > threshold && self.direction.accepts(percent) {
                signals.push(DeviationSignal {
                    ticker: ticker.to_string(),
                    window,
                    current_price: snapshot.price,
                    average_price: average,
                    absolute_difference: snapshot.price - average,
                    percent_difference: percent,
                });
            }
        }

        if !signals.is_empty() {
            info!("{} deviation signal(s) for {}", signals.len(), ticker);
        }

        Ok(signals)
    }
}

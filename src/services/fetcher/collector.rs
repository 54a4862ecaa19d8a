// src/services/fetcher/collector.rs
use super::retry::RetryPolicy;
use crate::db::postgres::models::latest_snapshot::LatestSnapshot;
use crate::db::postgres::repository::daily_bar_repository::TraitDailyBarRepository;
use crate::db::postgres::repository::latest_snapshot_repository::TraitLatestSnapshotRepository;
use crate::error::TickerError;
use crate::gateway::MarketDataGateway;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of one ticker's successful fetch step
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub ticker: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub bars_received: usize,
    pub bars_written: u64,
    pub price: Decimal,
    /// Close of the last stored session before the quote's day
    pub previous_close: Option<Decimal>,
}

// Calendar days searched back for the previous session
const PREVIOUS_CLOSE_LOOKBACK_DAYS: u32 = 10;

/// History range to request given the last stored bar date.
///
/// A missing or stale history gets the whole lookback window. Otherwise the
/// range starts at the last stored day, which is fetched again because it
/// may have been stored while the session was still open.
pub fn plan_history_range(
    last_stored: Option<NaiveDate>,
    today: NaiveDate,
    lookback_days: u32,
) -> (NaiveDate, NaiveDate) {
    let full_start = today
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(NaiveDate::MIN);

    match last_stored {
        Some(last) if last >= full_start => (last.min(today), today),
        _ => (full_start, today),
    }
}

/// Pulls the quote and daily history for one ticker and persists them
pub struct TickerCollector {
    gateway: Arc<dyn MarketDataGateway + Send + Sync>,
    daily_bars: Arc<dyn TraitDailyBarRepository + Send + Sync>,
    snapshots: Arc<dyn TraitLatestSnapshotRepository + Send + Sync>,
    retry: RetryPolicy,
    lookback_days: u32,
}

impl TickerCollector {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway + Send + Sync>,
        daily_bars: Arc<dyn TraitDailyBarRepository + Send + Sync>,
        snapshots: Arc<dyn TraitLatestSnapshotRepository + Send + Sync>,
        retry: RetryPolicy,
        lookback_days: u32,
    ) -> Self {
        Self {
            gateway,
            daily_bars,
            snapshots,
            retry,
            lookback_days,
        }
    }

    /// Nothing is written unless both the quote and the history were fetched
    #[instrument(skip_all, fields(ticker = %ticker))]
    pub async fn collect(&self, ticker: &str, now: DateTime<Utc>) -> Result<FetchOutcome, TickerError> {
        let gateway = &self.gateway;

        let quote = self
            .retry
            .run(&format!("fetch_latest {}", ticker), || gateway.fetch_latest(ticker))
            .await?;

        let today = now.date_naive();
        let last_stored = self.daily_bars.get_last_bar_date(ticker).await?;
        let (from, to) = plan_history_range(last_stored, today, self.lookback_days);
        debug!("History range for {}: {}..={} (last stored {:?})", ticker, from, to, last_stored);

        let bars = self
            .retry
            .run(&format!("fetch_history {}", ticker), || {
                gateway.fetch_history(ticker, from, to)
            })
            .await?;

        let bars_written = self.daily_bars.upsert_daily_bars(ticker, &bars).await?;

        let snapshot = LatestSnapshot {
            ticker: ticker.to_string(),
            price: quote.price,
            bid: quote.bid,
            ask: quote.ask,
            quote_time: quote.quote_time,
            fetched_at: now,
        };
        self.snapshots.upsert_latest_snapshot(&snapshot).await?;

        let quote_day = quote.quote_time.date_naive();
        let previous_close = self
            .daily_bars
            .get_daily_bars(ticker, PREVIOUS_CLOSE_LOOKBACK_DAYS)
            .await?
            .into_iter()
            .filter(|bar| bar.date < quote_day)
            .max_by_key(|bar| bar.date)
            .map(|bar| bar.close);

        info!(
            "Collected {}: price {}, {} bars received, {} written",
            ticker,
            quote.price,
            bars.len(),
            bars_written
        );

        Ok(FetchOutcome {
            ticker: ticker.to_string(),
            from,
            to,
            bars_received: bars.len(),
            bars_written,
            price: quote.price,
            previous_close,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::test_support::{FakeGateway, MemoryStore, bar, test_retry_policy};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_plan_full_range_when_empty_or_stale() {
        let today = date(2026, 10, 16);
        assert_eq!(plan_history_range(None, today, 90), (date(2026, 7, 18), today));
        assert_eq!(
            plan_history_range(Some(date(2026, 1, 2)), today, 90),
            (date(2026, 7, 18), today)
        );
    }

    #[test]
    fn test_plan_trailing_range_refetches_last_day() {
        let today = date(2026, 10, 16);
        assert_eq!(
            plan_history_range(Some(date(2026, 10, 14)), today, 90),
            (date(2026, 10, 14), today)
        );
        assert_eq!(plan_history_range(Some(today), today, 90), (today, today));
    }

    fn collector(gateway: Arc<FakeGateway>, store: Arc<MemoryStore>) -> TickerCollector {
        TickerCollector::new(gateway, store.clone(), store, test_retry_policy(), 90)
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_writes_bars_and_snapshot() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_quote("TSLA", dec!(230), now);
        gateway.set_history(
            "TSLA",
            vec![bar("TSLA", date(2026, 10, 15), dec!(200)), bar("TSLA", date(2026, 10, 16), dec!(210))],
        );
        let store = Arc::new(MemoryStore::default());

        let outcome = collector(gateway.clone(), store.clone())
            .collect("TSLA", now)
            .await
            .unwrap();

        assert_eq!(outcome.bars_received, 2);
        assert_eq!(outcome.bars_written, 2);
        assert_eq!(outcome.from, date(2026, 7, 18));
        assert_eq!(outcome.price, dec!(230));
        // the 2026-10-16 bar is the quote's own session
        assert_eq!(outcome.previous_close, Some(dec!(200)));
        assert_eq!(store.bar_count("TSLA"), 2);
        let snapshot = store.snapshot("TSLA").unwrap();
        assert_eq!(snapshot.price, dec!(230));
        assert_eq!(snapshot.fetched_at, now);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_history_writes_nothing() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_quote("F", dec!(12), now);
        gateway.fail_history("F", GatewayError::Permanent("404".into()), 1);
        let store = Arc::new(MemoryStore::default());

        let result = collector(gateway, store.clone()).collect("F", now).await;

        assert!(matches!(result, Err(TickerError::Gateway(GatewayError::Permanent(_)))));
        assert_eq!(store.bar_count("F"), 0);
        assert!(store.snapshot("F").is_none());
    }
}

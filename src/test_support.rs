// src/test_support.rs
//! In-memory stand-ins for the storage, market data and messaging seams.

use crate::db::postgres::models::alert_record::{AlertRecord, cooldown_bucket};
use crate::db::postgres::models::component_status::{ComponentName, ComponentState, ComponentStatus};
use crate::db::postgres::models::daily_bar::DailyBar;
use crate::db::postgres::models::latest_snapshot::LatestSnapshot;
use crate::db::postgres::models::window::Window;
use crate::db::postgres::repository::alert_record_repository::TraitAlertRecordRepository;
use crate::db::postgres::repository::component_status_repository::TraitComponentStatusRepository;
use crate::db::postgres::repository::daily_bar_repository::TraitDailyBarRepository;
use crate::db::postgres::repository::latest_snapshot_repository::TraitLatestSnapshotRepository;
use crate::db::postgres::repository::watchlist_repository::{TraitWatchlistRepository, normalize_tickers};
use crate::error::{DeliveryError, GatewayError, StorageError};
use crate::gateway::{MarketDataGateway, Quote};
use crate::notifier::{MessageSink, NotificationPayload};
use crate::services::fetcher::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn bar(ticker: &str, date: NaiveDate, close: Decimal) -> DailyBar {
    DailyBar {
        ticker: ticker.to_string(),
        date,
        open: Some(close),
        high: Some(close),
        low: Some(close),
        close,
        adj_close: Some(close),
        volume: Some(1_000),
    }
}

/// `count` calendar-day bars ending at `end`, ascending
pub fn consecutive_bars(ticker: &str, end: NaiveDate, count: u64, close: Decimal) -> Vec<DailyBar> {
    (0..count)
        .rev()
        .filter_map(|back| end.checked_sub_days(Days::new(back)))
        .map(|date| bar(ticker, date, close))
        .collect()
}

pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: std::time::Duration::from_millis(10),
        max_delay: std::time::Duration::from_millis(100),
        attempt_timeout: std::time::Duration::from_secs(5),
    }
}

/// Every repository trait backed by maps behind mutexes
#[derive(Default)]
pub struct MemoryStore {
    watchlist: Mutex<BTreeSet<String>>,
    bars: Mutex<BTreeMap<(String, NaiveDate), DailyBar>>,
    snapshots: Mutex<HashMap<String, LatestSnapshot>>,
    statuses: Mutex<BTreeMap<ComponentName, ComponentStatus>>,
    alerts: Mutex<Vec<StoredAlert>>,
    fail_bar_writes: AtomicBool,
}

struct StoredAlert {
    id: i64,
    record: AlertRecord,
    bucket: i64,
    delivered: bool,
}

impl MemoryStore {
    pub fn with_watchlist(tickers: &[&str]) -> Self {
        let store = Self::default();
        *store.watchlist.lock().unwrap() = normalize_tickers(tickers.iter().map(|t| t.to_string()));
        store
    }

    pub fn fail_bar_writes(&self, fail: bool) {
        self.fail_bar_writes.store(fail, Ordering::SeqCst);
    }

    pub fn put_bars(&self, bars: Vec<DailyBar>) {
        let mut stored = self.bars.lock().unwrap();
        for bar in bars {
            stored.insert((bar.ticker.clone(), bar.date), bar);
        }
    }

    pub fn put_snapshot(&self, snapshot: LatestSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.ticker.clone(), snapshot);
    }

    pub fn all_bars(&self, ticker: &str) -> Vec<DailyBar> {
        self.bars
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.ticker == ticker)
            .cloned()
            .collect()
    }

    pub fn bar_count(&self, ticker: &str) -> usize {
        self.all_bars(ticker).len()
    }

    pub fn snapshot(&self, ticker: &str) -> Option<LatestSnapshot> {
        self.snapshots.lock().unwrap().get(ticker).cloned()
    }

    /// Delivered records only
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.delivered)
            .map(|a| a.record.clone())
            .collect()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts().len()
    }

    pub fn pending_alert_count(&self) -> usize {
        self.alerts.lock().unwrap().iter().filter(|a| !a.delivered).count()
    }

    pub fn status(&self, component: ComponentName) -> Option<ComponentStatus> {
        self.statuses.lock().unwrap().get(&component).cloned()
    }

    pub fn statuses(&self) -> Vec<ComponentStatus> {
        self.statuses.lock().unwrap().values().cloned().collect()
    }

    fn with_status<F>(&self, component: ComponentName, update: F)
    where
        F: FnOnce(&mut ComponentStatus),
    {
        let mut statuses = self.statuses.lock().unwrap();
        let row = statuses.entry(component).or_insert_with(|| ComponentStatus {
            component,
            state: ComponentState::Running,
            last_run: None,
            next_run: None,
            message: String::new(),
            updated_at: Utc::now(),
        });
        update(row);
        row.updated_at = Utc::now();
    }
}

#[async_trait]
impl TraitWatchlistRepository for MemoryStore {
    async fn get_active_tickers(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.watchlist.lock().unwrap().clone())
    }
}

#[async_trait]
impl TraitDailyBarRepository for MemoryStore {
    async fn upsert_daily_bars(&self, ticker: &str, bars: &[DailyBar]) -> Result<u64, StorageError> {
        if self.fail_bar_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout(std::time::Duration::from_secs(10)));
        }

        let mut stored = self.bars.lock().unwrap();
        let mut written = 0;
        for bar in bars {
            let row = DailyBar {
                ticker: ticker.to_string(),
                ..bar.clone()
            };
            let key = (ticker.to_string(), bar.date);
            if stored.get(&key) != Some(&row) {
                stored.insert(key, row);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn get_daily_bars(&self, ticker: &str, window_days: u32) -> Result<Vec<DailyBar>, StorageError> {
        let bars = self.all_bars(ticker);
        let Some(latest) = bars.iter().map(|b| b.date).max() else {
            return Ok(Vec::new());
        };
        let cutoff = latest
            .checked_sub_days(Days::new(u64::from(window_days)))
            .unwrap_or(NaiveDate::MIN);

        Ok(bars.into_iter().filter(|b| b.date > cutoff).collect())
    }

    async fn get_last_bar_date(&self, ticker: &str) -> Result<Option<NaiveDate>, StorageError> {
        Ok(self.all_bars(ticker).iter().map(|b| b.date).max())
    }
}

#[async_trait]
impl TraitLatestSnapshotRepository for MemoryStore {
    async fn upsert_latest_snapshot(&self, snapshot: &LatestSnapshot) -> Result<(), StorageError> {
        self.put_snapshot(snapshot.clone());
        Ok(())
    }

    async fn get_latest_snapshot(&self, ticker: &str) -> Result<Option<LatestSnapshot>, StorageError> {
        Ok(self.snapshot(ticker))
    }
}

#[async_trait]
impl TraitComponentStatusRepository for MemoryStore {
    async fn upsert_state(
        &self,
        component: ComponentName,
        state: ComponentState,
        message: &str,
    ) -> Result<(), StorageError> {
        self.with_status(component, |row| {
            row.state = state;
            row.message = message.to_string();
        });
        Ok(())
    }

    async fn upsert_run_start(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_status(component, |row| {
            row.state = ComponentState::Running;
            row.last_run = Some(at);
        });
        Ok(())
    }

    async fn upsert_next_run(&self, component: ComponentName, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_status(component, |row| row.next_run = Some(at));
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ComponentStatus>, StorageError> {
        Ok(self.statuses())
    }
}

#[async_trait]
impl TraitAlertRecordRepository for MemoryStore {
    async fn has_recent_alert(
        &self,
        ticker: &str,
        window: Window,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let since = now - cooldown;
        Ok(self.alerts.lock().unwrap().iter().any(|a| {
            a.delivered && a.record.ticker == ticker && a.record.window == window && a.record.sent_at > since
        }))
    }

    async fn reserve_alert(
        &self,
        record: &AlertRecord,
        cooldown: Duration,
        reservation_ttl: Duration,
    ) -> Result<Option<i64>, StorageError> {
        let bucket = cooldown_bucket(record.sent_at, cooldown);
        let since = record.sent_at - cooldown;
        let abandoned_before = record.sent_at - reservation_ttl;
        let same_slot = |a: &StoredAlert| a.record.ticker == record.ticker && a.record.window == record.window;

        let mut alerts = self.alerts.lock().unwrap();
        alerts.retain(|a| !(same_slot(a) && !a.delivered && a.record.sent_at <= abandoned_before));

        let blocked = alerts
            .iter()
            .any(|a| same_slot(a) && (a.record.sent_at > since || a.bucket == bucket));
        if blocked {
            return Ok(None);
        }

        let id = alerts.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        alerts.push(StoredAlert {
            id,
            record: record.clone(),
            bucket,
            delivered: false,
        });
        Ok(Some(id))
    }

    async fn confirm_alert(&self, reservation: i64) -> Result<(), StorageError> {
        if let Some(alert) = self.alerts.lock().unwrap().iter_mut().find(|a| a.id == reservation) {
            alert.delivered = true;
        }
        Ok(())
    }

    async fn release_alert(&self, reservation: i64) -> Result<(), StorageError> {
        self.alerts
            .lock()
            .unwrap()
            .retain(|a| a.id != reservation || a.delivered);
        Ok(())
    }

    async fn get_recent_alerts(&self, limit: i64) -> Result<Vec<AlertRecord>, StorageError> {
        let mut records = self.alerts();
        records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

/// Scripted market data with per-ticker failure queues and call counters
#[derive(Default)]
pub struct FakeGateway {
    quotes: Mutex<HashMap<String, Quote>>,
    history: Mutex<HashMap<String, Vec<DailyBar>>>,
    latest_failures: Mutex<HashMap<String, (GatewayError, u32)>>,
    history_failures: Mutex<HashMap<String, (GatewayError, u32)>>,
    latest_calls: Mutex<HashMap<String, u32>>,
}

impl FakeGateway {
    pub fn set_quote(&self, ticker: &str, price: Decimal, at: DateTime<Utc>) {
        self.quotes.lock().unwrap().insert(
            ticker.to_string(),
            Quote {
                price,
                bid: None,
                ask: None,
                quote_time: at,
            },
        );
    }

    pub fn set_history(&self, ticker: &str, bars: Vec<DailyBar>) {
        self.history.lock().unwrap().insert(ticker.to_string(), bars);
    }

    /// The next `times` quote calls for `ticker` fail with `error`
    pub fn fail_latest(&self, ticker: &str, error: GatewayError, times: u32) {
        self.latest_failures
            .lock()
            .unwrap()
            .insert(ticker.to_string(), (error, times));
    }

    pub fn fail_history(&self, ticker: &str, error: GatewayError, times: u32) {
        self.history_failures
            .lock()
            .unwrap()
            .insert(ticker.to_string(), (error, times));
    }

    pub fn latest_calls(&self, ticker: &str) -> u32 {
        self.latest_calls
            .lock()
            .unwrap()
            .get(ticker)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(queue: &Mutex<HashMap<String, (GatewayError, u32)>>, ticker: &str) -> Option<GatewayError> {
        let mut queue = queue.lock().unwrap();
        let (error, remaining) = queue.get_mut(ticker)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }
}

#[async_trait]
impl MarketDataGateway for FakeGateway {
    async fn fetch_latest(&self, ticker: &str) -> Result<Quote, GatewayError> {
        *self
            .latest_calls
            .lock()
            .unwrap()
            .entry(ticker.to_string())
            .or_default() += 1;

        if let Some(error) = Self::take_failure(&self.latest_failures, ticker) {
            return Err(error);
        }

        self.quotes
            .lock()
            .unwrap()
            .get(ticker)
            .cloned()
            .ok_or_else(|| GatewayError::Permanent(format!("unknown ticker {}", ticker)))
    }

    async fn fetch_history(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, GatewayError> {
        if let Some(error) = Self::take_failure(&self.history_failures, ticker) {
            return Err(error);
        }

        Ok(self
            .history
            .lock()
            .unwrap()
            .get(ticker)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= from && b.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Keeps every delivered payload; optionally rejects everything or
/// holds each send for a while
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<NotificationPayload>>,
    fail: bool,
    delay: Option<std::time::Duration>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<NotificationPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(DeliveryError::Rejected {
                status: 400,
                body: "chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// src/services/alerts/dispatcher.rs
use crate::db::postgres::models::alert_record::AlertRecord;
use crate::db::postgres::models::component_status::{ComponentName, ComponentState};
use crate::db::postgres::repository::alert_record_repository::TraitAlertRecordRepository;
use crate::error::{DeliveryError, StorageError};
use crate::notifier::{MessageSink, NotificationPayload};
use crate::services::analytics::calculator::DeviationSignal;
use crate::services::status::tracker::StatusTracker;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

/// Per-call counts of what happened to the dispatched signals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl DispatchSummary {
    pub fn merge(&mut self, other: DispatchSummary) {
        self.sent += other.sent;
        self.suppressed += other.suppressed;
        self.failed += other.failed;
    }
}

/// Renders the alert text for one signal
pub fn build_payload(signal: &DeviationSignal, at: DateTime<Utc>) -> NotificationPayload {
    let direction = if signal.absolute_difference.is_sign_negative() {
        "Below"
    } else {
        "Above"
    };

    let text = format!(
        "ALERT: {ticker}\n\n\
         Price: ${price:.2}\n\
         Time: {time}\n\n\
         {window}: ${average:.2}\n\
         {direction}: ${gap:.2} ({percent:.2}%)\n\n\
         #{ticker}",
        ticker = signal.ticker,
        price = signal.current_price,
        time = at.format("%Y-%m-%d %H:%M:%S UTC"),
        window = signal.window.display_name(),
        average = signal.average_price,
        direction = direction,
        gap = signal.absolute_difference.abs(),
        percent = signal.percent_difference.abs(),
    );

    NotificationPayload {
        title: format!("{} {} deviation", signal.ticker, signal.window),
        text,
    }
}

/// One ticker's line in the per-cycle digest
#[derive(Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub ticker: String,
    pub price: Decimal,
    pub previous_close: Option<Decimal>,
}

impl DigestEntry {
    fn change(&self) -> Option<Decimal> {
        self.previous_close.map(|prev| self.price - prev)
    }

    fn movement(&self) -> Movement {
        match self.change() {
            Some(change) if change >= FLAT_BAND => Movement::Up,
            Some(change) if change <= -FLAT_BAND => Movement::Down,
            _ => Movement::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    Up,
    Down,
    Flat,
}

// Moves smaller than a cent count as flat
const FLAT_BAND: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

fn digest_line(entry: &DigestEntry) -> String {
    let (Some(prev), Some(change)) = (entry.previous_close, entry.change()) else {
        return format!("{} ${:.2} (no previous close)", entry.ticker, entry.price);
    };

    let percent = change
        .checked_div(prev)
        .map(|ratio| {
            (ratio * Decimal::ONE_HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        })
        .unwrap_or_default();

    match entry.movement() {
        Movement::Flat => format!("{} ${:.2} minimal change", entry.ticker, entry.price),
        Movement::Up => format!(
            "{} ${:.2} +${:.2} (+{:.2}%)",
            entry.ticker, entry.price, change, percent
        ),
        Movement::Down => format!(
            "{} ${:.2} -${:.2} (-{:.2}%)",
            entry.ticker,
            entry.price,
            change.abs(),
            percent.abs()
        ),
    }
}

/// Renders the live update sent after every cycle: each ticker's price
/// against its previous close, then up/down/flat counts and the top mover.
pub fn build_digest(entries: &[DigestEntry], at: DateTime<Utc>) -> NotificationPayload {
    let lines: Vec<String> = entries.iter().map(digest_line).collect();

    let count = |m: Movement| entries.iter().filter(|e| e.movement() == m).count();
    let (up, down, flat) = (count(Movement::Up), count(Movement::Down), count(Movement::Flat));

    let mut text = format!(
        "LIVE UPDATE {}\n\n{}\n\nUp: {}  Down: {}  Flat: {}",
        at.format("%H:%M:%S UTC"),
        lines.join("\n"),
        up,
        down,
        flat
    );

    let top_mover = entries
        .iter()
        .filter_map(|e| e.change().map(|c| (e, c.abs())))
        .filter(|(_, c)| *c >= FLAT_BAND)
        .max_by(|a, b| a.1.cmp(&b.1));
    if let Some((entry, change)) = top_mover {
        text.push_str(&format!("\nTop mover: {} (${:.2})", entry.ticker, change));
    }

    NotificationPayload {
        title: "Live update".to_string(),
        text,
    }
}

/// Delivers deviation alerts, enforcing one alert per (ticker, window) per cooldown
pub struct AlertDispatcher {
    alerts: Arc<dyn TraitAlertRecordRepository + Send + Sync>,
    sink: Arc<dyn MessageSink + Send + Sync>,
    status: StatusTracker,
    cooldown: chrono::Duration,
    reservation_ttl: chrono::Duration,
    send_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        alerts: Arc<dyn TraitAlertRecordRepository + Send + Sync>,
        sink: Arc<dyn MessageSink + Send + Sync>,
        status: StatusTracker,
        cooldown: chrono::Duration,
        send_timeout: Duration,
    ) -> Self {
        // A reservation outliving two send timeouts belongs to a dead sender
        let reservation_ttl = chrono::Duration::from_std(send_timeout * 2)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        Self {
            alerts,
            sink,
            status,
            cooldown,
            reservation_ttl,
            send_timeout,
        }
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        match time::timeout(self.send_timeout, self.sink.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
        }
    }

    /// Each signal's (ticker, window) slot is reserved in the store before
    /// the send, so concurrent dispatchers cannot both notify. The
    /// reservation is confirmed on delivery and released on failure, which
    /// leaves the slot open for the next cycle.
    pub async fn dispatch(
        &self,
        signals: &[DeviationSignal],
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, StorageError> {
        let mut summary = DispatchSummary::default();

        for signal in signals {
            if self
                .alerts
                .has_recent_alert(&signal.ticker, signal.window, self.cooldown, now)
                .await?
            {
                info!(
                    "Suppressing {} alert for {}: already sent within cooldown",
                    signal.window, signal.ticker
                );
                summary.suppressed += 1;
                continue;
            }

            let record = AlertRecord {
                ticker: signal.ticker.clone(),
                window: signal.window,
                current_price: signal.current_price,
                average_price: signal.average_price,
                absolute_diff: signal.absolute_difference,
                percent_diff: signal.percent_difference,
                sent_at: now,
            };

            let Some(reservation) = self
                .alerts
                .reserve_alert(&record, self.cooldown, self.reservation_ttl)
                .await?
            else {
                info!(
                    "Suppressing {} alert for {}: another dispatch holds the slot",
                    signal.window, signal.ticker
                );
                summary.suppressed += 1;
                continue;
            };

            let payload = build_payload(signal, now);
            match self.deliver(&payload).await {
                Ok(()) => {
                    self.alerts.confirm_alert(reservation).await?;
                    summary.sent += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to deliver {} alert for {} via {}: {}",
                        signal.window,
                        signal.ticker,
                        self.sink.name(),
                        e
                    );
                    self.alerts.release_alert(reservation).await?;
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    pub async fn begin_cycle(&self, now: DateTime<Utc>) -> Result<(), StorageError> {
        self.status.mark_started(ComponentName::AlertDispatcher, now).await
    }

    /// Records the cycle's delivery counts on the `alert_dispatcher` row.
    /// Any failed delivery puts the component in error.
    pub async fn finish_cycle(
        &self,
        summary: DispatchSummary,
        next_run: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let message = format!(
            "sent {}, suppressed {}, failed {}",
            summary.sent, summary.suppressed, summary.failed
        );
        let state = if summary.failed > 0 {
            ComponentState::Error
        } else {
            ComponentState::Running
        };

        self.status
            .report(ComponentName::AlertDispatcher, state, &message)
            .await?;
        self.status
            .heartbeat(ComponentName::AlertDispatcher, next_run)
            .await
    }

    pub async fn stop(&self, message: &str) {
        self.status.stop(ComponentName::AlertDispatcher, message).await;
    }

    /// Best effort; nothing is sent for an empty cycle
    pub async fn send_cycle_digest(&self, entries: &[DigestEntry], now: DateTime<Utc>) -> bool {
        if entries.is_empty() {
            warn!("No ticker updates for the live digest");
            return false;
        }

        match self.deliver(&build_digest(entries, now)).await {
            Ok(()) => {
                info!("Live update sent for {} tickers", entries.len());
                true
            }
            Err(e) => {
                warn!("Failed to send live update: {}", e);
                false
            }
        }
    }

    /// Best effort: failures are logged only
    pub async fn notify_startup(&self, tickers: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
        let list = if tickers.is_empty() {
            "(watchlist is empty)".to_string()
        } else {
            tickers.iter().cloned().collect::<Vec<_>>().join(", ")
        };

        let payload = NotificationPayload {
            title: "Stock monitor started".to_string(),
            text: format!(
                "Stock monitor started\n\nTime: {}\nMonitoring {} ticker(s): {}",
                now.format("%Y-%m-%d %H:%M:%S UTC"),
                tickers.len(),
                list
            ),
        };

        match self.deliver(&payload).await {
            Ok(()) => {
                info!("Startup notification sent");
                true
            }
            Err(e) => {
                warn!("Failed to send startup notification: {}", e);
                false
            }
        }
    }

    /// Best effort operator message about a failed component
    pub async fn notify_error(&self, component: ComponentName, message: &str) -> bool {
        let payload = NotificationPayload {
            title: format!("{} error", component),
            text: format!("ERROR in {}\n\n{}", component, message),
        };

        match self.deliver(&payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send error notification for {}: {}", component, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::postgres::models::window::Window;
    use crate::test_support::{MemoryStore, RecordingSink};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn signal() -> DeviationSignal {
        DeviationSignal {
            ticker: "TSLA".to_string(),
            window: Window::D30,
            current_price: dec!(230),
            average_price: dec!(200),
            absolute_difference: dec!(30),
            percent_difference: dec!(15.0000),
        }
    }

    fn dispatcher(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> AlertDispatcher {
        AlertDispatcher::new(
            store.clone(),
            sink,
            StatusTracker::new(store),
            chrono::Duration::hours(24),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_payload_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let payload = build_payload(&signal(), at);

        assert_eq!(
            payload.text,
            "ALERT: TSLA\n\nPrice: $230.00\nTime: 2026-10-16 20:00:00 UTC\n\n\
             30-Day Average: $200.00\nAbove: $30.00 (15.00%)\n\n#TSLA"
        );
    }

    #[test]
    fn test_payload_below_average() {
        let mut below = signal();
        below.current_price = dec!(170);
        below.absolute_difference = dec!(-30);
        below.percent_difference = dec!(-15);

        let payload = build_payload(&below, Utc::now());
        assert!(payload.text.contains("Below: $30.00 (15.00%)"));
    }

    #[tokio::test]
    async fn test_second_dispatch_within_cooldown_is_suppressed() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(store.clone(), sink.clone());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();

        let first = dispatcher.dispatch(&[signal()], now).await.unwrap();
        let second = dispatcher
            .dispatch(&[signal()], now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(first, DispatchSummary { sent: 1, suppressed: 0, failed: 0 });
        assert_eq!(second, DispatchSummary { sent: 0, suppressed: 1, failed: 0 });
        assert_eq!(store.alert_count(), 1);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_writes_no_record() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::failing());
        let now = Utc::now();

        let summary = dispatcher(store.clone(), sink)
            .dispatch(&[signal()], now)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(store.alert_count(), 0);
        assert_eq!(store.pending_alert_count(), 0);

        // the released slot is free for the next attempt
        let retry = dispatcher(store.clone(), Arc::new(RecordingSink::default()))
            .dispatch(&[signal()], now)
            .await
            .unwrap();
        assert_eq!(retry.sent, 1);
        assert_eq!(store.alert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_dispatch_sends_once() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::slow(Duration::from_millis(50)));
        let dispatcher = dispatcher(store.clone(), sink.clone());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let signals = [signal()];

        let (a, b) = tokio::join!(
            dispatcher.dispatch(&signals, now),
            dispatcher.dispatch(&signals, now)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.sent + b.sent, 1);
        assert_eq!(a.suppressed + b.suppressed, 1);
        assert_eq!(store.alert_count(), 1);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_reservation_expires() {
        let store = Arc::new(MemoryStore::default());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let stale = AlertRecord {
            ticker: "TSLA".to_string(),
            window: Window::D30,
            current_price: dec!(230),
            average_price: dec!(200),
            absolute_diff: dec!(30),
            percent_diff: dec!(15),
            sent_at: now - chrono::Duration::minutes(10),
        };
        store
            .reserve_alert(&stale, chrono::Duration::hours(24), chrono::Duration::seconds(10))
            .await
            .unwrap()
            .unwrap();

        let summary = dispatcher(store.clone(), Arc::new(RecordingSink::default()))
            .dispatch(&[signal()], now)
            .await
            .unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(store.pending_alert_count(), 0);
        assert_eq!(store.alerts()[0].sent_at, now);
    }

    #[tokio::test]
    async fn test_alert_allowed_again_after_cooldown() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(store.clone(), sink);
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();

        dispatcher.dispatch(&[signal()], now).await.unwrap();
        let later = dispatcher
            .dispatch(&[signal()], now + chrono::Duration::hours(25))
            .await
            .unwrap();

        assert_eq!(later.sent, 1);
        assert_eq!(store.alert_count(), 2);
    }

    #[tokio::test]
    async fn test_finish_cycle_reports_failures_as_error() {
        let store = Arc::new(MemoryStore::default());
        let dispatcher = dispatcher(store.clone(), Arc::new(RecordingSink::default()));
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();

        dispatcher.begin_cycle(now).await.unwrap();
        dispatcher
            .finish_cycle(
                DispatchSummary { sent: 1, suppressed: 0, failed: 1 },
                now + chrono::Duration::seconds(240),
            )
            .await
            .unwrap();

        let rows = store.statuses();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].component, ComponentName::AlertDispatcher);
        assert_eq!(rows[0].state, ComponentState::Error);
        assert_eq!(rows[0].message, "sent 1, suppressed 0, failed 1");
    }

    fn entry(ticker: &str, price: Decimal, previous_close: Option<Decimal>) -> DigestEntry {
        DigestEntry {
            ticker: ticker.to_string(),
            price,
            previous_close,
        }
    }

    #[test]
    fn test_digest_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 20, 0, 0).unwrap();
        let entries = [
            entry("F", dec!(12.004), Some(dec!(12))),
            entry("NIO", dec!(5), None),
            entry("TSLA", dec!(230), Some(dec!(220))),
            entry("VWAGY", dec!(9.5), Some(dec!(10))),
        ];

        let payload = build_digest(&entries, at);

        assert_eq!(
            payload.text,
            "LIVE UPDATE 20:00:00 UTC\n\n\
             F $12.00 minimal change\n\
             NIO $5.00 (no previous close)\n\
             TSLA $230.00 +$10.00 (+4.55%)\n\
             VWAGY $9.50 -$0.50 (-5.00%)\n\n\
             Up: 1  Down: 1  Flat: 2\n\
             Top mover: TSLA ($10.00)"
        );
    }

    #[tokio::test]
    async fn test_empty_digest_is_not_sent() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());

        assert!(!dispatcher(store, sink.clone()).send_cycle_digest(&[], Utc::now()).await);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_startup_notification_lists_tickers() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let tickers: BTreeSet<String> = ["TSLA", "F"].iter().map(|t| t.to_string()).collect();

        assert!(dispatcher(store, sink.clone()).notify_startup(&tickers, Utc::now()).await);

        let sent = sink.sent();
        assert!(sent[0].text.contains("Monitoring 2 ticker(s): F, TSLA"));
    }
}

// File: src/services/fetcher/scheduler.rs
use super::collector::TickerCollector;
use super::retry::RetryPolicy;
use crate::app_state::models::AppState;
use crate::db::postgres::models::component_status::{ComponentName, ComponentState};
use crate::db::postgres::repository::watchlist_repository::TraitWatchlistRepository;
use crate::env_config::models::app_config::FetcherConfig;
use crate::error::{CycleError, StorageError, TickerError};
use crate::services::alerts::dispatcher::{AlertDispatcher, DigestEntry, DispatchSummary};
use crate::services::analytics::calculator::AnalyticsEngine;
use crate::services::status::tracker::StatusTracker;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counts collected over one fetch cycle
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleSummary {
    pub tickers_total: usize,
    pub tickers_ok: usize,
    pub failed_tickers: Vec<String>,
    pub bars_written: u64,
    pub signals: usize,
    pub alerts: DispatchSummary,
    /// Fetched tickers, sorted by symbol
    pub digest: Vec<DigestEntry>,
}

/// What one worker produced for its ticker
struct TickerReport {
    ticker: String,
    digest: Option<DigestEntry>,
    bars_written: u64,
    signals: usize,
    alerts: DispatchSummary,
}

pub struct FetchScheduler {
    watchlist: Arc<dyn TraitWatchlistRepository + Send + Sync>,
    collector: TickerCollector,
    analytics: AnalyticsEngine,
    dispatcher: Arc<AlertDispatcher>,
    status: StatusTracker,
    config: FetcherConfig,
    cycle_digest: bool,
}

impl FetchScheduler {
    pub fn new(
        watchlist: Arc<dyn TraitWatchlistRepository + Send + Sync>,
        collector: TickerCollector,
        analytics: AnalyticsEngine,
        dispatcher: Arc<AlertDispatcher>,
        status: StatusTracker,
        config: FetcherConfig,
    ) -> Self {
        Self {
            watchlist,
            collector,
            analytics,
            dispatcher,
            status,
            config,
            cycle_digest: false,
        }
    }

    /// Sends the live price digest after every completed cycle
    pub fn with_cycle_digest(mut self, enabled: bool) -> Self {
        self.cycle_digest = enabled;
        self
    }

    /// Собирает планировщик из глобального состояния приложения
    pub fn from_app_state(app_state: &Arc<AppState>, dispatcher: Arc<AlertDispatcher>) -> Self {
        let config = &app_state.settings.app_config;
        let postgres = &app_state.postgres_service;

        let retry = RetryPolicy::from_config(
            &config.fetcher,
            Duration::from_secs(config.gateway.timeout_seconds),
        );

        let collector = TickerCollector::new(
            app_state.gateway.clone(),
            postgres.repository_daily_bar.clone(),
            postgres.repository_latest_snapshot.clone(),
            retry,
            config.fetcher.lookback_days,
        );

        let analytics = AnalyticsEngine::new(
            postgres.repository_daily_bar.clone(),
            postgres.repository_latest_snapshot.clone(),
            StatusTracker::new(postgres.repository_component_status.clone()),
            config.analytics.clone(),
            config.alerts.direction,
        );

        Self::new(
            postgres.repository_watchlist.clone(),
            collector,
            analytics,
            dispatcher,
            StatusTracker::new(postgres.repository_component_status.clone()),
            config.fetcher.clone(),
        )
        .with_cycle_digest(config.alerts.cycle_digest)
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_seconds)
    }

    fn next_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.config.interval_seconds as i64)
    }

    /// Fetch, analysis and dispatch for one ticker. Only storage failures
    /// are returned as errors; gateway failures are part of the report.
    async fn process_ticker(&self, ticker: String, now: DateTime<Utc>) -> Result<TickerReport, StorageError> {
        let mut report = TickerReport {
            ticker,
            digest: None,
            bars_written: 0,
            signals: 0,
            alerts: DispatchSummary::default(),
        };

        match self.collector.collect(&report.ticker, now).await {
            Ok(outcome) => {
                report.bars_written = outcome.bars_written;
                report.digest = Some(DigestEntry {
                    ticker: outcome.ticker,
                    price: outcome.price,
                    previous_close: outcome.previous_close,
                });
            }
            Err(TickerError::Gateway(e)) => {
                warn!("Skipping {} this cycle: {}", report.ticker, e);
                return Ok(report);
            }
            Err(TickerError::Storage(e)) => return Err(e),
        }

        let signals = self.analytics.analyze_ticker(&report.ticker, now).await?;
        report.signals = signals.len();

        if !signals.is_empty() {
            report.alerts = self.dispatcher.dispatch(&signals, now).await?;
        }

        Ok(report)
    }

    /// Runs one complete fetch–analyze–alert pass over the watchlist
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, CycleError> {
        match self.execute_cycle(now).await {
            Ok(summary) => {
                if self.cycle_digest {
                    self.dispatcher.send_cycle_digest(&summary.digest, now).await;
                }
                Ok(summary)
            }
            Err(e) => {
                let message = format!("cycle aborted: {}", e);
                error!("Fetch {}", message);

                // Storage may be the thing that failed; status writes are best effort here
                if let Err(status_err) = self
                    .status
                    .report(ComponentName::DataFetcher, ComponentState::Error, &message)
                    .await
                {
                    error!("Could not record fetcher error status: {}", status_err);
                }
                if let Err(status_err) = self
                    .status
                    .heartbeat(ComponentName::DataFetcher, self.next_run(now))
                    .await
                {
                    debug!("Could not record next run: {}", status_err);
                }

                self.dispatcher
                    .notify_error(ComponentName::DataFetcher, &message)
                    .await;

                Err(CycleError::Storage(e))
            }
        }
    }

    async fn execute_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, StorageError> {
        self.status.mark_started(ComponentName::DataFetcher, now).await?;
        self.analytics.begin_cycle(now).await?;
        self.dispatcher.begin_cycle(now).await?;

        // Список тикеров читается заново в каждом цикле
        let tickers = self.watchlist.get_active_tickers().await?;
        info!("Starting fetch cycle for {} tickers", tickers.len());

        let mut summary = CycleSummary {
            tickers_total: tickers.len(),
            ..CycleSummary::default()
        };

        let pool_size = self.config.worker_pool_size.max(1);
        let mut reports = stream::iter(tickers)
            .map(move |ticker| {
                let span = info_span!("ticker", ticker = %ticker);
                self.process_ticker(ticker, now).instrument(span)
            })
            .buffer_unordered(pool_size);

        // Dropping the stream on the first storage error cancels in-flight workers
        while let Some(result) = reports.next().await {
            let report = result?;
            match report.digest {
                Some(entry) => {
                    summary.tickers_ok += 1;
                    summary.digest.push(entry);
                }
                None => summary.failed_tickers.push(report.ticker),
            }
            summary.bars_written += report.bars_written;
            summary.signals += report.signals;
            summary.alerts.merge(report.alerts);
        }
        drop(reports);

        summary.failed_tickers.sort();
        summary.digest.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        self.record_cycle_status(&summary, now).await?;

        info!(
            "Fetch cycle finished: {}/{} tickers ok, {} bars written, {} signals, alerts sent {} / suppressed {} / failed {}",
            summary.tickers_ok,
            summary.tickers_total,
            summary.bars_written,
            summary.signals,
            summary.alerts.sent,
            summary.alerts.suppressed,
            summary.alerts.failed
        );

        Ok(summary)
    }

    async fn record_cycle_status(&self, summary: &CycleSummary, now: DateTime<Utc>) -> Result<(), StorageError> {
        let next_run = self.next_run(now);

        if summary.failed_tickers.is_empty() {
            let message = format!(
                "fetched {} tickers, {} bars written",
                summary.tickers_ok, summary.bars_written
            );
            self.status
                .report(ComponentName::DataFetcher, ComponentState::Running, &message)
                .await?;
        } else {
            let message = format!(
                "{} of {} tickers failed: {}",
                summary.failed_tickers.len(),
                summary.tickers_total,
                summary.failed_tickers.join(", ")
            );
            self.status
                .report(ComponentName::DataFetcher, ComponentState::Error, &message)
                .await?;
        }

        self.status
            .heartbeat(ComponentName::DataFetcher, next_run)
            .await?;

        self.analytics
            .finish_cycle(summary.tickers_ok, summary.signals, next_run)
            .await?;
        self.dispatcher.finish_cycle(summary.alerts, next_run).await
    }

    /// Tick outside the operation window: nothing is fetched
    async fn record_idle_tick(&self, now: DateTime<Utc>) {
        debug!(
            "Scheduler: skipping cycle - outside operation window (current time: {})",
            now.format("%H:%M:%S")
        );
        let result = async {
            self.status
                .report(
                    ComponentName::DataFetcher,
                    ComponentState::Running,
                    "idle: outside operation window",
                )
                .await?;
            self.status
                .heartbeat(ComponentName::DataFetcher, self.next_run(now))
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("Could not record idle tick: {}", e);
        }
    }

    fn log_cycle_result(result: &Result<CycleSummary, CycleError>) {
        match result {
            Ok(summary) if summary.failed_tickers.is_empty() => {
                debug!("Scheduler: cycle completed for {} tickers", summary.tickers_ok)
            }
            Ok(summary) => warn!(
                "Scheduler: cycle completed with failures: {}",
                summary.failed_tickers.join(", ")
            ),
            Err(e) => error!("Scheduler: {}", e),
        }
    }

    /// Main loop. The first cycle runs immediately; later ones follow the
    /// configured interval and never overlap. On shutdown an in-flight
    /// cycle gets the grace period, then each component marks itself stopped.
    pub async fn run_until_shutdown(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        let mut interval = time::interval(self.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Основной цикл планировщика
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let now = Utc::now();
            if !self.config.is_operation_allowed(now.time()) {
                self.record_idle_tick(now).await;
                continue;
            }

            info!("Scheduler: triggering fetch cycle");
            let cycle = self
                .run_cycle(now)
                .instrument(info_span!("fetch_cycle", started = %now.format("%H:%M:%S")));
            tokio::pin!(cycle);

            tokio::select! {
                result = &mut cycle => Self::log_cycle_result(&result),
                _ = shutdown.changed() => {
                    info!("Shutdown requested, giving in-flight cycle {:?} to finish", grace);
                    match time::timeout(grace, &mut cycle).await {
                        Ok(result) => Self::log_cycle_result(&result),
                        Err(_) => warn!("In-flight cycle abandoned after {:?}", grace),
                    }
                    break;
                }
            }
        }

        let message = "service shutting down";
        self.status.stop(ComponentName::DataFetcher, message).await;
        self.analytics.stop(message).await;
        self.dispatcher.stop(message).await;
        info!("Fetch scheduler stopped");
    }

    /// Запускает планировщик в фоновой задаче
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Fetch scheduler is disabled in configuration");
            return None;
        }

        // Вывод информации об окне работы, если оно настроено
        if let (Some(start), Some(end)) = (&self.config.start_time, &self.config.end_time) {
            info!("Scheduler operation window configured: {} to {} UTC", start, end);
        }

        info!(
            "Starting fetch scheduler with {} second interval, {} workers",
            self.config.interval_seconds, self.config.worker_pool_size
        );

        Some(tokio::spawn(self.run_until_shutdown(shutdown)))
    }
}

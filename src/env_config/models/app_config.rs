use crate::db::postgres::models::window::Window;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub timeout: u64,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: u64,
    pub idle_timeout: u64,
    /// Upper bound for a single query, in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    #[serde(default)]
    pub start_time: Option<String>, // UTC, "HH:MM:SS"
    #[serde(default)]
    pub end_time: Option<String>, // UTC, "HH:MM:SS"
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub thresholds: WindowThresholds,
    /// Fraction of expected trading days that must be present for a window to count
    #[serde(default = "default_min_coverage")]
    pub min_coverage: Decimal,
    #[serde(default = "default_snapshot_max_age")]
    pub snapshot_max_age_seconds: u64,
}

/// Percent deviation thresholds per rolling window
#[derive(Debug, Clone, Deserialize)]
pub struct WindowThresholds {
    #[serde(rename = "7d", default = "default_threshold_7d")]
    pub d7: Decimal,
    #[serde(rename = "30d", default = "default_threshold_30d")]
    pub d30: Decimal,
    #[serde(rename = "90d", default = "default_threshold_90d")]
    pub d90: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    #[default]
    Both,
    Below,
    Above,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub direction: AlertDirection,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub startup_notification: bool,
    /// Live price digest after every completed cycle
    #[serde(default = "default_true")]
    pub cycle_digest: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
}

fn default_true() -> bool {
    true
}
fn default_query_timeout() -> u64 {
    10
}
fn default_interval_seconds() -> u64 {
    240
}
fn default_lookback_days() -> u32 {
    90
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    5_000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_shutdown_grace_seconds() -> u64 {
    30
}
fn default_gateway_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}
fn default_gateway_timeout() -> u64 {
    15
}
fn default_min_coverage() -> Decimal {
    Decimal::new(5, 1)
}
fn default_snapshot_max_age() -> u64 {
    900
}
fn default_threshold_7d() -> Decimal {
    Decimal::from(5)
}
fn default_threshold_30d() -> Decimal {
    Decimal::from(10)
}
fn default_threshold_90d() -> Decimal {
    Decimal::from(15)
}
fn default_cooldown_seconds() -> u64 {
    86_400
}
fn default_send_timeout() -> u64 {
    30
}
fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_interval_seconds(),
            lookback_days: default_lookback_days(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            worker_pool_size: default_worker_pool_size(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            start_time: None,
            end_time: None,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_seconds: default_gateway_timeout(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            thresholds: WindowThresholds::default(),
            min_coverage: default_min_coverage(),
            snapshot_max_age_seconds: default_snapshot_max_age(),
        }
    }
}

impl Default for WindowThresholds {
    fn default() -> Self {
        Self {
            d7: default_threshold_7d(),
            d30: default_threshold_30d(),
            d90: default_threshold_90d(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            direction: AlertDirection::default(),
            send_timeout_seconds: default_send_timeout(),
            startup_notification: true,
            cycle_digest: true,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: default_telegram_url(),
        }
    }
}

impl WindowThresholds {
    pub fn for_window(&self, window: Window) -> Decimal {
        match window {
            Window::D7 => self.d7,
            Window::D30 => self.d30,
            Window::D90 => self.d90,
        }
    }
}

impl AlertDirection {
    /// Whether a deviation with this sign is reported
    pub fn accepts(self, percent_difference: Decimal) -> bool {
        match self {
            AlertDirection::Both => true,
            AlertDirection::Below => percent_difference.is_sign_negative(),
            AlertDirection::Above => percent_difference.is_sign_positive(),
        }
    }
}

impl FetcherConfig {
    /// Checks if `now` (UTC) is within the allowed operation window
    pub fn is_operation_allowed(&self, now: NaiveTime) -> bool {
        // If no time window is configured, always allow operation
        let (Some(start_str), Some(end_str)) = (&self.start_time, &self.end_time) else {
            return true;
        };

        if let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(start_str, "%H:%M:%S"),
            NaiveTime::parse_from_str(end_str, "%H:%M:%S"),
        ) {
            if start <= end {
                return start <= now && now <= end;
            } else {
                // Window crosses midnight, e.g. start=21:00:00, end=04:00:00
                return start <= now || now <= end;
            }
        }

        // If parsing fails, default to allowing operation
        true
    }
}

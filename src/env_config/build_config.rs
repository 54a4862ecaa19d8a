use super::models::app_config::AppConfig;
use super::models::app_env::Env;
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppConfig {
    /// Loads `config/{env}.toml` (directory overridable through `CONFIG_DIR`)
    pub fn load(env: &Env) -> Result<AppConfig, ConfigError> {
        let dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        let path: PathBuf = [dir, format!("{}.toml", env)].iter().collect();

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_toml_str(&raw)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetcher = &self.fetcher;
        if fetcher.interval_seconds == 0 {
            return Err(ConfigError::Validation("fetcher.interval_seconds must be > 0".into()));
        }
        if fetcher.worker_pool_size == 0 {
            return Err(ConfigError::Validation("fetcher.worker_pool_size must be > 0".into()));
        }
        if fetcher.max_attempts == 0 {
            return Err(ConfigError::Validation("fetcher.max_attempts must be > 0".into()));
        }
        if fetcher.lookback_days == 0 {
            return Err(ConfigError::Validation("fetcher.lookback_days must be > 0".into()));
        }

        let thresholds = &self.analytics.thresholds;
        for (name, value) in [("7d", thresholds.d7), ("30d", thresholds.d30), ("90d", thresholds.d90)] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::Validation(format!(
                    "analytics.thresholds.{} must be positive",
                    name
                )));
            }
        }

        let coverage = self.analytics.min_coverage;
        if coverage <= Decimal::ZERO || coverage > Decimal::ONE {
            return Err(ConfigError::Validation(
                "analytics.min_coverage must be in (0, 1]".into(),
            ));
        }

        if self.alerts.cooldown_seconds == 0 {
            return Err(ConfigError::Validation("alerts.cooldown_seconds must be > 0".into()));
        }

        Ok(())
    }
}

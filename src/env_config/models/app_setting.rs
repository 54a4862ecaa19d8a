use super::{app_config::AppConfig, app_env::AppEnv};
use crate::env_config::build_config::ConfigError;

#[derive(Debug)]
pub struct AppSettings {
    pub app_config: AppConfig,
    pub app_env: AppEnv,
}

impl AppSettings {
    /// Reads environment variables, then the `config/{env}.toml` matching `ENV`
    pub fn load() -> Result<Self, ConfigError> {
        let app_env = AppEnv::new();
        let app_config = AppConfig::load(&app_env.env)?;

        Ok(Self {
            app_config,
            app_env,
        })
    }
}

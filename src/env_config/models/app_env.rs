use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Env {
    Local,
    Prod,
}

impl FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "dev" => Ok(Env::Local),
            "prod" | "production" => Ok(Env::Prod),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Env::Local => write!(f, "local"),
            Env::Prod => write!(f, "prod"),
        }
    }
}

#[derive(Debug)]
pub struct AppEnv {
    pub env: Env,
    pub server_port: u16,
    pub server_address: String,
    pub postgres_host: String,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_database: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

impl AppEnv {
    pub fn is_local(&self) -> bool {
        self.env == Env::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_from_str() {
        assert_eq!(Env::from_str("local"), Ok(Env::Local));
        assert_eq!(Env::from_str("PROD"), Ok(Env::Prod));
        assert_eq!(Env::from_str("production"), Ok(Env::Prod));
        assert!(Env::from_str("staging").is_err());
    }
}

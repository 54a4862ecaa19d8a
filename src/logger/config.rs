use std::fmt;
use std::io::{Error, ErrorKind};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Supported log format types
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        }
    }
}

/// Installs the global subscriber. Production output drops timestamps (the
/// log collector stamps lines) and keeps targets; local output is the reverse.
pub fn init_logger(log_level: &str, log_format: &str, is_production: bool) -> Result<(), Error> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "Invalid log level"))?;

    let format = LogFormat::from(log_format);

    let result = if is_production {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_span_events(FmtSpan::CLOSE)
            .without_time();

        match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Plain => builder.try_init(),
        }
    } else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_span_events(FmtSpan::CLOSE);

        match format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Plain => builder.try_init(),
        }
    };

    result.map_err(|e| Error::new(ErrorKind::AlreadyExists, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::from("json"), LogFormat::Json);
        assert_eq!(LogFormat::from("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from("plain"), LogFormat::Plain);
        assert_eq!(LogFormat::from("invalid"), LogFormat::Plain);
    }

    #[test]
    fn test_init_logger_only_once() {
        let _ = init_logger("debug", "plain", false);
        // A global subscriber is installed by now, a second install must fail cleanly
        assert!(init_logger("info", "json", true).is_err());
    }
}

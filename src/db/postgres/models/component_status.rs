// src/db/postgres/models/component_status.rs
use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Fixed set of components that report their own status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentName {
    DataFetcher,
    Analytics,
    AlertDispatcher,
}

impl ComponentName {
    pub const ALL: [ComponentName; 3] = [
        ComponentName::DataFetcher,
        ComponentName::Analytics,
        ComponentName::AlertDispatcher,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentName::DataFetcher => "data_fetcher",
            ComponentName::Analytics => "analytics",
            ComponentName::AlertDispatcher => "alert_dispatcher",
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentName::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown component: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Running,
    Stopped,
    Error,
}

impl ComponentState {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentState::Running => "running",
            ComponentState::Stopped => "stopped",
            ComponentState::Error => "error",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ComponentState::Running),
            "stopped" => Ok(ComponentState::Stopped),
            "error" => Ok(ComponentState::Error),
            other => Err(format!("unknown component state: {}", other)),
        }
    }
}

/// Raw row of the component_status table
#[derive(Debug, FromRow)]
pub struct PgComponentStatus {
    pub component: String,
    pub state: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub component: ComponentName,
    pub state: ComponentState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgComponentStatus> for ComponentStatus {
    type Error = StorageError;

    fn try_from(row: PgComponentStatus) -> Result<Self, Self::Error> {
        Ok(Self {
            component: row.component.parse().map_err(StorageError::InvalidData)?,
            state: row.state.parse().map_err(StorageError::InvalidData)?,
            last_run: row.last_run,
            next_run: row.next_run,
            message: row.message,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_names_parse_back() {
        for component in ComponentName::ALL {
            assert_eq!(component.as_str().parse::<ComponentName>(), Ok(component));
        }
        assert_eq!(ComponentName::DataFetcher.to_string(), "data_fetcher");
    }

    #[test]
    fn test_row_with_unknown_state_is_rejected() {
        let row = PgComponentStatus {
            component: "data_fetcher".to_string(),
            state: "paused".to_string(),
            last_run: None,
            next_run: None,
            message: String::new(),
            updated_at: Utc::now(),
        };

        assert!(matches!(
            ComponentStatus::try_from(row),
            Err(StorageError::InvalidData(_))
        ));
    }
}

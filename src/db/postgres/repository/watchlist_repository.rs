// src/db/postgres/repository/watchlist_repository.rs
use crate::db::postgres::connection::PostgresConnection;
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait TraitWatchlistRepository {
    /// Active tickers, upper-cased and de-duplicated
    async fn get_active_tickers(&self) -> Result<BTreeSet<String>, StorageError>;
}

pub struct StructWatchlistRepository {
    connection: Arc<PostgresConnection>,
}

impl StructWatchlistRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

/// Trims and upper-cases raw symbols, dropping blanks
pub fn normalize_tickers<I>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    raw.into_iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[async_trait]
impl TraitWatchlistRepository for StructWatchlistRepository {
    async fn get_active_tickers(&self) -> Result<BTreeSet<String>, StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "get_active_tickers",
            sqlx::query_scalar::<_, String>(
                "SELECT ticker FROM watchlist WHERE is_active = TRUE ORDER BY ticker",
            )
            .fetch_all(pool),
        )
        .await;

        match result {
            Ok(rows) => {
                let tickers = normalize_tickers(rows);
                debug!("Loaded {} active tickers from watchlist", tickers.len());
                Ok(tickers)
            }
            Err(e) => {
                error!("Error loading watchlist: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tickers_dedups_case_and_whitespace() {
        let raw = vec![
            "tsla".to_string(),
            " TSLA ".to_string(),
            "F".to_string(),
            "  ".to_string(),
        ];

        let tickers = normalize_tickers(raw);
        assert_eq!(
            tickers.into_iter().collect::<Vec<_>>(),
            vec!["F".to_string(), "TSLA".to_string()]
        );
    }
}

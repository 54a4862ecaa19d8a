// src/db/postgres/repository/daily_bar_repository.rs
use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::daily_bar::DailyBar;
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{debug, error, info};

#[async_trait]
pub trait TraitDailyBarRepository {
    /// Upserts all bars of one ticker in a single transaction. Returns the
    /// number of rows actually inserted or changed.
    async fn upsert_daily_bars(&self, ticker: &str, bars: &[DailyBar]) -> Result<u64, StorageError>;

    /// Bars inside the trailing `window_days` calendar days ending at the
    /// ticker's latest stored date (inclusive), ascending by date
    async fn get_daily_bars(&self, ticker: &str, window_days: u32) -> Result<Vec<DailyBar>, StorageError>;

    async fn get_last_bar_date(&self, ticker: &str) -> Result<Option<NaiveDate>, StorageError>;
}

pub struct StructDailyBarRepository {
    connection: Arc<PostgresConnection>,
}

impl StructDailyBarRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

// Keeps each statement well under the Postgres bind limit
const UPSERT_CHUNK: usize = 500;

#[async_trait]
impl TraitDailyBarRepository for StructDailyBarRepository {
    async fn upsert_daily_bars(&self, ticker: &str, bars: &[DailyBar]) -> Result<u64, StorageError> {
        if bars.is_empty() {
            debug!("No bars to upsert for {}", ticker);
            return Ok(0);
        }

        let pool = self.connection.get_pool();
        let limit = self.connection.query_timeout();

        let write = async {
            let mut tx = pool.begin().await?;
            let mut affected = 0;

            for chunk in bars.chunks(UPSERT_CHUNK) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                    "INSERT INTO stock_daily (ticker, date, open, high, low, close, adj_close, volume) ",
                );

                builder.push_values(chunk, |mut b, bar| {
                    b.push_bind(ticker)
                        .push_bind(bar.date)
                        .push_bind(bar.open)
                        .push_bind(bar.high)
                        .push_bind(bar.low)
                        .push_bind(bar.close)
                        .push_bind(bar.adj_close)
                        .push_bind(bar.volume);
                });

                builder.push(
                    " ON CONFLICT (ticker, date) DO UPDATE SET
                        open = EXCLUDED.open,
                        high = EXCLUDED.high,
                        low = EXCLUDED.low,
                        close = EXCLUDED.close,
                        adj_close = EXCLUDED.adj_close,
                        volume = EXCLUDED.volume,
                        fetched_at = NOW()
                      WHERE (stock_daily.open, stock_daily.high, stock_daily.low, stock_daily.close,
                             stock_daily.adj_close, stock_daily.volume)
                      IS DISTINCT FROM
                            (EXCLUDED.open, EXCLUDED.high, EXCLUDED.low, EXCLUDED.close,
                             EXCLUDED.adj_close, EXCLUDED.volume)",
                );

                affected += builder.build().execute(&mut *tx).await?.rows_affected();
            }

            tx.commit().await?;
            Ok::<u64, sqlx::Error>(affected)
        };

        match storage_call(limit, "upsert_daily_bars", write).await {
            Ok(affected) => {
                info!(
                    "Upserted daily bars for {}: {} received, {} written",
                    ticker,
                    bars.len(),
                    affected
                );
                Ok(affected)
            }
            Err(e) => {
                error!("Error upserting daily bars for {}: {}", ticker, e);
                Err(e)
            }
        }
    }

    async fn get_daily_bars(&self, ticker: &str, window_days: u32) -> Result<Vec<DailyBar>, StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "get_daily_bars",
            sqlx::query_as::<_, DailyBar>(
                "SELECT ticker, date, open, high, low, close, adj_close, volume
                 FROM stock_daily
                 WHERE ticker = $1
                   AND date > (SELECT MAX(date) FROM stock_daily WHERE ticker = $1) - $2::int
                 ORDER BY date",
            )
            .bind(ticker)
            .bind(window_days as i32)
            .fetch_all(pool),
        )
        .await;

        match &result {
            Ok(bars) => debug!("Fetched {} bars for {} ({} days)", bars.len(), ticker, window_days),
            Err(e) => error!("Error fetching daily bars for {}: {}", ticker, e),
        }

        result
    }

    async fn get_last_bar_date(&self, ticker: &str) -> Result<Option<NaiveDate>, StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "get_last_bar_date",
            sqlx::query_scalar::<_, Option<NaiveDate>>(
                "SELECT MAX(date) FROM stock_daily WHERE ticker = $1",
            )
            .bind(ticker)
            .fetch_one(pool),
        )
        .await;

        match &result {
            Ok(date) => debug!("Last stored bar date for {}: {:?}", ticker, date),
            Err(e) => error!("Error fetching last bar date for {}: {}", ticker, e),
        }

        result
    }
}

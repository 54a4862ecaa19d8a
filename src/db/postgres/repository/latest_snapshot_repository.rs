// src/db/postgres/repository/latest_snapshot_repository.rs
use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::latest_snapshot::LatestSnapshot;
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait TraitLatestSnapshotRepository {
    async fn upsert_latest_snapshot(&self, snapshot: &LatestSnapshot) -> Result<(), StorageError>;

    async fn get_latest_snapshot(&self, ticker: &str) -> Result<Option<LatestSnapshot>, StorageError>;
}

pub struct StructLatestSnapshotRepository {
    connection: Arc<PostgresConnection>,
}

impl StructLatestSnapshotRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitLatestSnapshotRepository for StructLatestSnapshotRepository {
    async fn upsert_latest_snapshot(&self, snapshot: &LatestSnapshot) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "upsert_latest_snapshot",
            sqlx::query(
                "INSERT INTO stock_latest (ticker, price, bid, ask, quote_time, fetched_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (ticker)
                 DO UPDATE SET price = $2, bid = $3, ask = $4, quote_time = $5, fetched_at = $6",
            )
            .bind(&snapshot.ticker)
            .bind(snapshot.price)
            .bind(snapshot.bid)
            .bind(snapshot.ask)
            .bind(snapshot.quote_time)
            .bind(snapshot.fetched_at)
            .execute(pool),
        )
        .await;

        match result {
            Ok(_) => {
                debug!("Stored latest snapshot for {}: {}", snapshot.ticker, snapshot.price);
                Ok(())
            }
            Err(e) => {
                error!("Error storing latest snapshot for {}: {}", snapshot.ticker, e);
                Err(e)
            }
        }
    }

    async fn get_latest_snapshot(&self, ticker: &str) -> Result<Option<LatestSnapshot>, StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "get_latest_snapshot",
            sqlx::query_as::<_, LatestSnapshot>(
                "SELECT ticker, price, bid, ask, quote_time, fetched_at
                 FROM stock_latest
                 WHERE ticker = $1",
            )
            .bind(ticker)
            .fetch_optional(pool),
        )
        .await;

        match &result {
            Ok(Some(_)) => debug!("Found latest snapshot for {}", ticker),
            Ok(None) => debug!("No latest snapshot for {}", ticker),
            Err(e) => error!("Error fetching latest snapshot for {}: {}", ticker, e),
        }

        result
    }
}

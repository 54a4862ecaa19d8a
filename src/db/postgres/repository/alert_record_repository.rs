// src/db/postgres/repository/alert_record_repository.rs
use crate::db::postgres::connection::PostgresConnection;
use crate::db::postgres::models::alert_record::{AlertRecord, PgAlertRecord, cooldown_bucket};
use crate::db::postgres::models::window::Window;
use crate::error::StorageError;
use crate::utils::timeout::storage_call;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

#[async_trait]
pub trait TraitAlertRecordRepository {
    /// True when a delivered alert for (ticker, window) was sent after `now - cooldown`
    async fn has_recent_alert(
        &self,
        ticker: &str,
        window: Window,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Claims the (ticker, window) slot for `record` before delivery.
    ///
    /// Inserts an undelivered row unless any row for the same (ticker,
    /// window) exists within the cooldown. Undelivered rows older than
    /// `reservation_ttl` are treated as abandoned and removed first. Returns
    /// the reservation id, or `None` when the slot is taken.
    async fn reserve_alert(
        &self,
        record: &AlertRecord,
        cooldown: Duration,
        reservation_ttl: Duration,
    ) -> Result<Option<i64>, StorageError>;

    /// Marks a reservation as delivered
    async fn confirm_alert(&self, reservation: i64) -> Result<(), StorageError>;

    /// Drops an undelivered reservation so the next cycle may try again
    async fn release_alert(&self, reservation: i64) -> Result<(), StorageError>;

    /// Delivered records, newest first
    async fn get_recent_alerts(&self, limit: i64) -> Result<Vec<AlertRecord>, StorageError>;
}

pub struct StructAlertRecordRepository {
    connection: Arc<PostgresConnection>,
}

impl StructAlertRecordRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TraitAlertRecordRepository for StructAlertRecordRepository {
    async fn has_recent_alert(
        &self,
        ticker: &str,
        window: Window,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let pool = self.connection.get_pool();

        let result = storage_call(
            self.connection.query_timeout(),
            "has_recent_alert",
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (
                    SELECT 1 FROM alert_records
                    WHERE ticker = $1 AND window_days = $2 AND sent_at > $3 AND delivered
                 )",
            )
            .bind(ticker)
            .bind(window.days() as i16)
            .bind(now - cooldown)
            .fetch_one(pool),
        )
        .await;

        match &result {
            Ok(found) => debug!("Recent {} alert for {}: {}", window, ticker, found),
            Err(e) => error!("Error checking recent alerts for {} {}: {}", ticker, window, e),
        }

        result
    }

    async fn reserve_alert(
        &self,
        record: &AlertRecord,
        cooldown: Duration,
        reservation_ttl: Duration,
    ) -> Result<Option<i64>, StorageError> {
        let pool = self.connection.get_pool();
        let window_days = record.window.days() as i16;

        let reserve = async {
            let mut tx = pool.begin().await?;

            // Serializes reservations for one (ticker, window) across processes
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2::int)")
                .bind(&record.ticker)
                .bind(window_days)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "DELETE FROM alert_records
                 WHERE ticker = $1 AND window_days = $2 AND NOT delivered AND sent_at <= $3",
            )
            .bind(&record.ticker)
            .bind(window_days)
            .bind(record.sent_at - reservation_ttl)
            .execute(&mut *tx)
            .await?;

            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO alert_records
                    (ticker, window_days, current_price, average_price, absolute_diff,
                     percent_diff, sent_at, cooldown_bucket, delivered)
                 SELECT $1, $2, $3, $4, $5, $6, $7, $8, FALSE
                 WHERE NOT EXISTS (
                    SELECT 1 FROM alert_records
                    WHERE ticker = $1 AND window_days = $2 AND sent_at > $9
                 )
                 ON CONFLICT (ticker, window_days, cooldown_bucket) DO NOTHING
                 RETURNING id",
            )
            .bind(&record.ticker)
            .bind(window_days)
            .bind(record.current_price)
            .bind(record.average_price)
            .bind(record.absolute_diff)
            .bind(record.percent_diff)
            .bind(record.sent_at)
            .bind(cooldown_bucket(record.sent_at, cooldown))
            .bind(record.sent_at - cooldown)
            .fetch_optional(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<Option<i64>, sqlx::Error>(id)
        };

        match storage_call(self.connection.query_timeout(), "reserve_alert", reserve).await {
            Ok(Some(id)) => {
                debug!("Reserved {} alert slot for {} (id {})", record.window, record.ticker, id);
                Ok(Some(id))
            }
            Ok(None) => {
                info!(
                    "{} alert slot for {} is taken within the cooldown",
                    record.window, record.ticker
                );
                Ok(None)
            }
            Err(e) => {
                error!("Error reserving alert for {} {}: {}", record.ticker, record.window, e);
                Err(e)
            }
        }
    }

    async fn confirm_alert(&self, reservation: i64) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        storage_call(
            self.connection.query_timeout(),
            "confirm_alert",
            sqlx::query("UPDATE alert_records SET delivered = TRUE WHERE id = $1")
                .bind(reservation)
                .execute(pool),
        )
        .await
        .inspect_err(|e| error!("Error confirming alert {}: {}", reservation, e))?;

        debug!("Alert {} confirmed as delivered", reservation);
        Ok(())
    }

    async fn release_alert(&self, reservation: i64) -> Result<(), StorageError> {
        let pool = self.connection.get_pool();

        storage_call(
            self.connection.query_timeout(),
            "release_alert",
            sqlx::query("DELETE FROM alert_records WHERE id = $1 AND NOT delivered")
                .bind(reservation)
                .execute(pool),
        )
        .await
        .inspect_err(|e| error!("Error releasing alert {}: {}", reservation, e))?;

        debug!("Alert reservation {} released", reservation);
        Ok(())
    }

    async fn get_recent_alerts(&self, limit: i64) -> Result<Vec<AlertRecord>, StorageError> {
        let pool = self.connection.get_pool();

        let rows = storage_call(
            self.connection.query_timeout(),
            "get_recent_alerts",
            sqlx::query_as::<_, PgAlertRecord>(
                "SELECT ticker, window_days, current_price, average_price, absolute_diff,
                        percent_diff, sent_at
                 FROM alert_records
                 WHERE delivered
                 ORDER BY sent_at DESC
                 LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool),
        )
        .await
        .inspect_err(|e| error!("Error fetching recent alerts: {}", e))?;

        rows.into_iter().map(AlertRecord::try_from).collect()
    }
}

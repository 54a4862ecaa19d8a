//! Table bootstrap, run once at startup. Every statement is idempotent.

use sqlx::{Pool, Postgres};
use tracing::{debug, info};

const CREATE_WATCHLIST: &str = "
    CREATE TABLE IF NOT EXISTS watchlist (
        ticker       VARCHAR(16) PRIMARY KEY,
        company_name TEXT,
        sector       TEXT,
        notes        TEXT,
        is_active    BOOLEAN NOT NULL DEFAULT TRUE,
        added_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )";

const CREATE_STOCK_DAILY: &str = "
    CREATE TABLE IF NOT EXISTS stock_daily (
        ticker     VARCHAR(16) NOT NULL,
        date       DATE NOT NULL,
        open       NUMERIC(18, 6),
        high       NUMERIC(18, 6),
        low        NUMERIC(18, 6),
        close      NUMERIC(18, 6) NOT NULL,
        adj_close  NUMERIC(18, 6),
        volume     BIGINT,
        fetched_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT unique_ticker_date UNIQUE (ticker, date)
    )";

const CREATE_STOCK_LATEST: &str = "
    CREATE TABLE IF NOT EXISTS stock_latest (
        ticker     VARCHAR(16) PRIMARY KEY,
        price      NUMERIC(18, 6) NOT NULL,
        bid        NUMERIC(18, 6),
        ask        NUMERIC(18, 6),
        quote_time TIMESTAMPTZ NOT NULL,
        fetched_at TIMESTAMPTZ NOT NULL
    )";

const CREATE_COMPONENT_STATUS: &str = "
    CREATE TABLE IF NOT EXISTS component_status (
        component  VARCHAR(32) PRIMARY KEY,
        state      VARCHAR(16) NOT NULL,
        last_run   TIMESTAMPTZ,
        next_run   TIMESTAMPTZ,
        message    TEXT NOT NULL DEFAULT '',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )";

const CREATE_ALERT_RECORDS: &str = "
    CREATE TABLE IF NOT EXISTS alert_records (
        id              BIGSERIAL PRIMARY KEY,
        ticker          VARCHAR(16) NOT NULL,
        window_days     SMALLINT NOT NULL,
        current_price   NUMERIC(18, 6) NOT NULL,
        average_price   NUMERIC(18, 6) NOT NULL,
        absolute_diff   NUMERIC(18, 6) NOT NULL,
        percent_diff    NUMERIC(12, 4) NOT NULL,
        sent_at         TIMESTAMPTZ NOT NULL,
        cooldown_bucket BIGINT NOT NULL,
        delivered       BOOLEAN NOT NULL DEFAULT FALSE,
        CONSTRAINT unique_alert_bucket UNIQUE (ticker, window_days, cooldown_bucket)
    )";

// Rows written before reservations existed were all delivered
const ADD_COLUMNS: [&str; 1] = [
    "ALTER TABLE alert_records ADD COLUMN IF NOT EXISTS delivered BOOLEAN NOT NULL DEFAULT TRUE",
];

const CREATE_INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_stock_daily_date ON stock_daily (date)",
    "CREATE INDEX IF NOT EXISTS idx_watchlist_active ON watchlist (is_active)",
    "CREATE INDEX IF NOT EXISTS idx_alert_records_recent ON alert_records (ticker, window_days, sent_at DESC)",
];

pub async fn ensure_schema(pool: &Pool<Postgres>) -> Result<(), sqlx::Error> {
    info!("Ensuring database schema");

    for (name, ddl) in [
        ("watchlist", CREATE_WATCHLIST),
        ("stock_daily", CREATE_STOCK_DAILY),
        ("stock_latest", CREATE_STOCK_LATEST),
        ("component_status", CREATE_COMPONENT_STATUS),
        ("alert_records", CREATE_ALERT_RECORDS),
    ] {
        debug!("Creating table {} if missing", name);
        sqlx::query(ddl).execute(pool).await?;
    }

    for ddl in ADD_COLUMNS {
        sqlx::query(ddl).execute(pool).await?;
    }

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    info!("Database schema is up to date");
    Ok(())
}

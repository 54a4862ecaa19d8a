// src/error.rs
use crate::db::postgres::models::window::Window;
use std::time::Duration;
use thiserror::Error;

/// Failure classes reported by the market data gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),

    #[error("permanent gateway failure: {0}")]
    Permanent(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),
}

impl GatewayError {
    /// Transient and rate-limit failures may succeed on a later attempt within the same cycle
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Permanent(_))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("insufficient data for {window} window: {present} of {expected} expected trading days")]
    InsufficientData {
        window: Window,
        present: usize,
        expected: usize,
    },

    #[error("average price for {0} window is zero")]
    ZeroAverage(Window),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("message transport failed: {0}")]
    Transport(String),

    #[error("message rejected by sink (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("message delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a single ticker's unit of work inside a fetch cycle
#[derive(Error, Debug)]
pub enum TickerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure that aborts a whole fetch cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("cycle aborted: {0}")]
    Storage(#[from] StorageError),
}

// src/notifier/mod.rs
pub mod telegram;

use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::Serialize;

pub use telegram::TelegramSink;

/// Rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub text: String,
}

/// Outbound channel for alert and operator messages
#[async_trait]
pub trait MessageSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), DeliveryError>;

    fn name(&self) -> &str;
}

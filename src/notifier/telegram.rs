// src/notifier/telegram.rs
use super::{MessageSink, NotificationPayload};
use crate::error::DeliveryError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Delivers messages through the Telegram Bot API `sendMessage` method
pub struct TelegramSink {
    client: Client,
    endpoint: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramSink {
    pub fn new(api_url: &str, bot_token: &str, chat_id: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: send_message_url(api_url, bot_token),
            chat_id: chat_id.to_string(),
        })
    }
}

fn send_message_url(api_url: &str, bot_token: &str) -> String {
    format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token)
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": payload.text,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Telegram request for '{}' failed: {}", payload.title, e);
                DeliveryError::Transport(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!("Telegram rejected '{}' with HTTP {}", payload.title, status);
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        match serde_json::from_str::<TelegramResponse>(&text) {
            Ok(TelegramResponse { ok: true, .. }) => {
                debug!("Telegram message '{}' delivered", payload.title);
                Ok(())
            }
            Ok(TelegramResponse { description, .. }) => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: description.unwrap_or(text),
            }),
            Err(e) => Err(DeliveryError::Transport(format!("unreadable Telegram response: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

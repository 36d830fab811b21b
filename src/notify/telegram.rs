use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::ChannelSender;
use crate::config::Config;
use crate::error::{AppError, Result};

/// Bot API `sendMessage` client bound to one chat (and optional forum thread).
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    chat_id: String,
    thread_id: Option<i64>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, cfg: &Config) -> Self {
        Self {
            client,
            api_url: cfg.telegram_api_url.trim_end_matches('/').to_string(),
            token: cfg.telegram_token.clone(),
            chat_id: cfg.telegram_chat.clone(),
            thread_id: cfg.telegram_thread_id,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

#[async_trait]
impl ChannelSender for TelegramClient {
    async fn send(&self, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            message_thread_id: self.thread_id,
        };

        let resp = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        // Error bodies are best-effort; a garbled one still maps by status.
        let parsed: ApiResponse = resp
            .text()
            .await
            .ok()
            .and_then(|b| serde_json::from_str(&b).ok())
            .unwrap_or_default();

        let retry_after = parsed
            .parameters
            .and_then(|p| p.retry_after)
            .unwrap_or(0);
        if status == StatusCode::TOO_MANY_REQUESTS && retry_after > 0 {
            return Err(AppError::RateLimited(Duration::from_secs(retry_after)));
        }

        Err(AppError::Telegram(format!(
            "{} {}",
            status.as_u16(),
            parsed.description.unwrap_or_default()
        )))
    }
}

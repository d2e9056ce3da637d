//! Telegram notifier: posts alerts to one chat through the Bot API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{DeliveryReceipt, Notifier, deliver_chunks, split_message};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram bot credentials and destination chat.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<SecretString>,
    pub chat_id: Option<String>,
    pub api_base: String,
}

impl TelegramConfig {
    /// Build from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
    pub fn from_env() -> Self {
        Self {
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            chat_id: std::env::var("TELEGRAM_CHAT_ID")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Telegram notifier bound to one chat.
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn api_url(&self, token: &SecretString, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_base.trim_end_matches('/'),
            token.expose_secret()
        )
    }

    fn credentials(&self) -> Result<(&SecretString, &str), ChannelError> {
        let token = self
            .config
            .bot_token
            .as_ref()
            .ok_or_else(|| not_configured("TELEGRAM_BOT_TOKEN"))?;
        let chat_id = self
            .config
            .chat_id
            .as_deref()
            .ok_or_else(|| not_configured("TELEGRAM_CHAT_ID"))?;
        Ok((token, chat_id))
    }

    /// Send a single chunk (≤4096 chars), Markdown first with plain fallback.
    async fn send_chunk(
        &self,
        token: &SecretString,
        chat_id: &str,
        text: &str,
    ) -> Result<Option<i64>, ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url(token, "sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if markdown_resp.status().is_success() {
            return Ok(message_id(markdown_resp).await);
        }

        // Subjects from arbitrary senders often contain unbalanced `*` or `_`
        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url(token, "sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(send_failed(format!(
                "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
            )));
        }

        Ok(message_id(plain_resp).await)
    }
}

async fn message_id(resp: reqwest::Response) -> Option<i64> {
    resp.json::<SendMessageResponse>()
        .await
        .ok()
        .and_then(|r| r.result)
        .map(|m| m.message_id)
}

fn not_configured(missing: &str) -> ChannelError {
    ChannelError::NotConfigured {
        name: "telegram".into(),
        missing: missing.into(),
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
        let (token, chat_id) = self.credentials()?;

        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let receipt = deliver_chunks(self.name(), chunks, |chunk| async move {
            let id = self.send_chunk(token, chat_id, &chunk).await?;
            Ok(id.map(|id| id.to_string()))
        })
        .await?;

        tracing::info!(chat_id = %chat_id, chunks = receipt.message_ids.len(), "Telegram alert sent");
        Ok(receipt)
    }
}

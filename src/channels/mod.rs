//! Notification channels: deliver alert text to one fixed recipient.

pub mod telegram;
pub mod whatsapp;

pub use telegram::{TelegramConfig, TelegramNotifier};
pub use whatsapp::{TwilioConfig, WhatsAppNotifier};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, ConfigError};

/// Acknowledgement for a delivered notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider message ids, one per chunk sent.
    pub message_ids: Vec<String>,
}

/// A channel that delivers text to its configured recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs ("whatsapp", "telegram").
    fn name(&self) -> &str;

    /// Send `text` once. Not retried on failure.
    ///
    /// Long text goes out as several chunks. Once the first chunk is
    /// delivered the alert counts as sent, even if a later chunk fails.
    async fn send(&self, text: &str) -> Result<DeliveryReceipt, ChannelError>;
}

/// Which notification channel to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierBackend {
    WhatsApp,
    Telegram,
}

impl NotifierBackend {
    /// Read `JOB_ALERT_NOTIFIER` (default `whatsapp`).
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("JOB_ALERT_NOTIFIER") {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::WhatsApp),
        }
    }
}

impl std::str::FromStr for NotifierBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" | "twilio" => Ok(Self::WhatsApp),
            "telegram" => Ok(Self::Telegram),
            other => Err(ConfigError::InvalidValue {
                key: "JOB_ALERT_NOTIFIER".into(),
                message: format!("expected 'whatsapp' or 'telegram', got '{other}'"),
            }),
        }
    }
}

/// Build the configured notifier from environment variables.
///
/// Missing credentials don't fail here; each `send` reports them instead.
pub fn create_notifier(backend: NotifierBackend, http: reqwest::Client) -> Arc<dyn Notifier> {
    match backend {
        NotifierBackend::WhatsApp => {
            tracing::info!("Using WhatsApp (Twilio) notifications");
            Arc::new(WhatsAppNotifier::new(TwilioConfig::from_env(), http))
        }
        NotifierBackend::Telegram => {
            tracing::info!("Using Telegram notifications");
            Arc::new(TelegramNotifier::new(TelegramConfig::from_env(), http))
        }
    }
}

/// Send `chunks` in order through `send_chunk`.
///
/// A failure on the first chunk is an error. A failure after that stops
/// the send and returns the ids delivered so far: the recipient already has
/// the head of the alert, and failing would re-send it on the next poll.
pub(crate) async fn deliver_chunks<F, Fut>(
    channel: &str,
    chunks: Vec<String>,
    mut send_chunk: F,
) -> Result<DeliveryReceipt, ChannelError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Option<String>, ChannelError>>,
{
    let total = chunks.len();
    let mut receipt = DeliveryReceipt::default();
    for (index, chunk) in chunks.into_iter().enumerate() {
        match send_chunk(chunk).await {
            Ok(Some(id)) => receipt.message_ids.push(id),
            Ok(None) => {}
            Err(e) if index == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(
                    channel,
                    delivered = index,
                    total,
                    error = %e,
                    "Alert partially delivered; dropping remaining chunks"
                );
                break;
            }
        }
    }
    Ok(receipt)
}

/// Split text into chunks of at most `max_len` bytes, preferring newline
/// then space boundaries, never splitting inside a UTF-8 sequence.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

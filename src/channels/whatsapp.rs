//! WhatsApp notifier via the Twilio Messages API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{DeliveryReceipt, Notifier, deliver_chunks, split_message};
use crate::error::ChannelError;

/// Twilio rejects WhatsApp bodies longer than this.
const WHATSAPP_MAX_MESSAGE_LENGTH: usize = 1600;

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Twilio account credentials plus sender and recipient numbers.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    /// Sender number (the Twilio WhatsApp sandbox or business number).
    pub from: Option<String>,
    /// Recipient number.
    pub to: Option<String>,
    pub api_base: String,
}

impl TwilioConfig {
    /// Build from `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`,
    /// `TWILIO_WHATSAPP_NUMBER` and `YOUR_WHATSAPP_NUMBER`.
    pub fn from_env() -> Self {
        Self {
            account_sid: non_empty_env("TWILIO_ACCOUNT_SID"),
            auth_token: non_empty_env("TWILIO_AUTH_TOKEN").map(SecretString::from),
            from: non_empty_env("TWILIO_WHATSAPP_NUMBER"),
            to: non_empty_env("YOUR_WHATSAPP_NUMBER"),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Add the `whatsapp:` channel prefix unless the number already has it.
pub fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{number}")
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
}

struct Credentials<'a> {
    account_sid: &'a str,
    auth_token: &'a SecretString,
    from: String,
    to: String,
}

/// Sends alerts to one WhatsApp number.
pub struct WhatsAppNotifier {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl WhatsAppNotifier {
    pub fn new(config: TwilioConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn messages_url(&self, account_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{account_sid}/Messages.json",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// All four settings, or `NotConfigured` naming the first one missing.
    fn credentials(&self) -> Result<Credentials<'_>, ChannelError> {
        let account_sid = self
            .config
            .account_sid
            .as_deref()
            .ok_or_else(|| not_configured("TWILIO_ACCOUNT_SID"))?;
        let auth_token = self
            .config
            .auth_token
            .as_ref()
            .ok_or_else(|| not_configured("TWILIO_AUTH_TOKEN"))?;
        let from = self
            .config
            .from
            .as_deref()
            .ok_or_else(|| not_configured("TWILIO_WHATSAPP_NUMBER"))?;
        let to = self
            .config
            .to
            .as_deref()
            .ok_or_else(|| not_configured("YOUR_WHATSAPP_NUMBER"))?;

        Ok(Credentials {
            account_sid,
            auth_token,
            from: whatsapp_address(from),
            to: whatsapp_address(to),
        })
    }

    async fn send_chunk(
        &self,
        creds: &Credentials<'_>,
        body: &str,
    ) -> Result<Option<String>, ChannelError> {
        let form = [
            ("From", creds.from.as_str()),
            ("To", creds.to.as_str()),
            ("Body", body),
        ];

        let resp = self
            .client
            .post(self.messages_url(creds.account_sid))
            .basic_auth(creds.account_sid, Some(creds.auth_token.expose_secret()))
            .form(&form)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(send_failed(format!("Twilio returned {status}: {text}")));
        }

        let resource: MessageResource = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(resource.sid)
    }
}

fn not_configured(missing: &str) -> ChannelError {
    ChannelError::NotConfigured {
        name: "whatsapp".into(),
        missing: missing.into(),
    }
}

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "whatsapp".into(),
        reason,
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
        let creds = self.credentials()?;

        let chunks = split_message(text, WHATSAPP_MAX_MESSAGE_LENGTH);
        let creds_ref = &creds;
        let receipt = deliver_chunks(self.name(), chunks, |chunk| async move {
            self.send_chunk(creds_ref, &chunk).await
        })
        .await?;

        tracing::info!(to = %creds.to, sids = ?receipt.message_ids, "WhatsApp alert sent");
        Ok(receipt)
    }
}

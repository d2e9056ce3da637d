//! Gmail REST mailbox: `users.messages.list/get/modify` over reqwest.
//!
//! Authentication is token-only: either a ready access token, or a stored
//! refresh token exchanged at the OAuth token endpoint. The interactive
//! consent flow that produces those tokens is out of scope.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mail::{FetchedMessage, Header, MessagePart, PartBody};
use crate::mailbox::{Mailbox, MessageRef, SearchQuery};

const BACKEND: &str = "gmail";
const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

// ── Configuration ───────────────────────────────────────────────────

/// Gmail credentials, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// Ready-to-use OAuth access token (used as-is, never refreshed).
    pub access_token: Option<SecretString>,
    /// Refresh token plus client credentials, for self-renewing access.
    pub refresh_token: Option<SecretString>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    /// Mailbox owner; `me` means the token's account.
    pub user_id: String,
    pub api_base: String,
    pub token_url: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            user_id: "me".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl GmailConfig {
    /// Build config from environment variables. Missing credentials are
    /// tolerated here and reported on the first mailbox call.
    pub fn from_env() -> Self {
        let secret = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };

        Self {
            access_token: secret("GMAIL_ACCESS_TOKEN"),
            refresh_token: secret("GMAIL_REFRESH_TOKEN"),
            client_id: std::env::var("GMAIL_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: secret("GMAIL_CLIENT_SECRET"),
            user_id: std::env::var("GMAIL_USER_ID").unwrap_or_else(|_| "me".to_string()),
            ..Default::default()
        }
    }

    /// Refresh token, client id and client secret, when all three are set.
    fn refresh_credentials(&self) -> Option<(&SecretString, &str, &SecretString)> {
        Some((
            self.refresh_token.as_ref()?,
            self.client_id.as_deref()?,
            self.client_secret.as_ref()?,
        ))
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// Gmail API response shapes (only the fields we read).
pub mod api {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        #[serde(default)]
        pub messages: Vec<MessageRef>,
        pub next_page_token: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub label_ids: Vec<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub attachment_id: Option<String>,
        pub size: Option<u64>,
        pub data: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        #[serde(default)]
        pub headers: Vec<Header>,
        pub body: Option<MessageBody>,
        #[serde(default)]
        pub parts: Vec<MessagePart>,
    }

    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub expires_in: Option<u64>,
    }
}

/// Convert a Gmail payload node into the extractor's part tree.
///
/// Parts with an empty `body.data` (attachments, containers) get no payload.
pub fn convert_part(part: api::MessagePart) -> MessagePart {
    let body = part.body.unwrap_or_default();
    MessagePart {
        mime_type: part.mime_type.unwrap_or_default(),
        body: body
            .data
            .filter(|d| !d.is_empty())
            .map(PartBody::Base64Url),
        attachment_id: body.attachment_id,
        parts: part.parts.into_iter().map(convert_part).collect(),
    }
}

/// Convert a `format=full` message into a [`FetchedMessage`].
pub fn convert_message(message: api::GmailMessage) -> FetchedMessage {
    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(chrono::DateTime::from_timestamp_millis);

    let (headers, root) = match message.payload {
        Some(mut payload) => {
            let headers = std::mem::take(&mut payload.headers)
                .into_iter()
                .map(|h| Header::new(h.name, h.value))
                .collect();
            (headers, Some(convert_part(payload)))
        }
        None => (Vec::new(), None),
    };

    FetchedMessage {
        id: message.id,
        headers,
        root,
        received_at,
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

struct CachedToken {
    token: SecretString,
    /// `None` for a static access token that never expires locally.
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_none_or(|at| Instant::now() + TOKEN_EXPIRY_SLACK < at)
    }
}

/// Gmail mailbox over the REST API.
pub struct GmailMailbox {
    config: GmailConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            token: Mutex::new(None),
        }
    }

    fn messages_url(&self, suffix: &str) -> String {
        format!(
            "{}/users/{}/messages{suffix}",
            self.config.api_base.trim_end_matches('/'),
            self.config.user_id
        )
    }

    /// Current access token, refreshing it when a refresh token is configured.
    async fn access_token(&self) -> Result<SecretString, MailboxError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref().filter(|c| c.is_fresh()) {
            return Ok(cached.token.clone());
        }

        let fresh = if let Some((refresh, client_id, client_secret)) =
            self.config.refresh_credentials()
        {
            self.refresh_access_token(refresh, client_id, client_secret)
                .await?
        } else if let Some(token) = &self.config.access_token {
            CachedToken {
                token: token.clone(),
                expires_at: None,
            }
        } else {
            return Err(MailboxError::NotConfigured {
                backend: BACKEND.into(),
                reason: "set GMAIL_ACCESS_TOKEN, or GMAIL_REFRESH_TOKEN with \
                         GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET"
                    .into(),
            });
        };

        let token = fresh.token.clone();
        *guard = Some(fresh);
        Ok(token)
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &SecretString,
        client_id: &str,
        client_secret: &SecretString,
    ) -> Result<CachedToken, MailboxError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| MailboxError::AuthFailed {
                backend: BACKEND.into(),
                reason: format!("token refresh request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MailboxError::AuthFailed {
                backend: BACKEND.into(),
                reason: format!("token refresh returned {status}: {body}"),
            });
        }

        let token: api::TokenResponse =
            resp.json().await.map_err(|e| MailboxError::InvalidResponse {
                backend: BACKEND.into(),
                reason: format!("token response: {e}"),
            })?;

        info!(expires_in = ?token.expires_in, "Refreshed Gmail access token");
        Ok(CachedToken {
            token: SecretString::from(token.access_token),
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    /// Drop the cached token so the next call re-authenticates.
    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authorized request and check the status.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MailboxError> {
        let token = self.access_token().await?;
        let resp = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::RequestFailed {
                backend: BACKEND.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Gmail rejected the access token; will re-authenticate next call");
            self.invalidate_token().await;
        }
        let body = resp.text().await.unwrap_or_default();
        Err(MailboxError::Status {
            backend: BACKEND.into(),
            status: status.as_u16(),
            body,
        })
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, MailboxError> {
    resp.json().await.map_err(|e| MailboxError::InvalidResponse {
        backend: BACKEND.into(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn list_unread_matching(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<MessageRef>, MailboxError> {
        let q = query.to_gmail();
        let max = max_results.to_string();
        debug!(query = %q, max_results, "Listing Gmail messages");

        let request = self
            .client
            .get(self.messages_url(""))
            .query(&[("q", q.as_str()), ("maxResults", max.as_str())]);
        let list: api::ListMessagesResponse = parse_json(self.send(request).await?).await?;

        if list.next_page_token.is_some() {
            debug!("More matching messages remain; they will be picked up next poll");
        }

        Ok(list
            .messages
            .into_iter()
            .take(max_results)
            .map(|m| MessageRef::new(m.id))
            .collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<FetchedMessage, MailboxError> {
        let request = self
            .client
            .get(self.messages_url(&format!("/{id}")))
            .query(&[("format", "full")]);
        let message: api::GmailMessage = parse_json(self.send(request).await?).await?;
        Ok(convert_message(message))
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        // Removing a label that is already gone is a no-op on Gmail's side
        let request = self
            .client
            .post(self.messages_url(&format!("/{id}/modify")))
            .json(&serde_json::json!({ "removeLabelIds": ["UNREAD"] }));
        self.send(request).await?;
        info!(id = %id, "Marked Gmail message as read");
        Ok(())
    }
}

//! Mailbox gateways: list unread candidates, fetch full messages, mark read.
//!
//! Two backends:
//! - **Gmail**: REST API via reqwest, OAuth access/refresh token from env
//! - **IMAP**: raw IMAP4rev1 over rustls, parsed with mail-parser

pub mod gmail;
pub mod imap;

pub use gmail::{GmailConfig, GmailMailbox};
pub use imap::{ImapConfig, ImapMailbox};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MailboxError};
use crate::mail::FetchedMessage;

/// Default server-side search keywords.
pub const DEFAULT_QUERY_KEYWORDS: &[&str] = &["job", "opportunity", "interview", "career"];

/// Server-side search: an unread filter plus a keyword disjunction over
/// subject and full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub unread_only: bool,
    pub keywords: Vec<String>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            unread_only: true,
            keywords: DEFAULT_QUERY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl SearchQuery {
    /// Render as a Gmail search expression, e.g.
    /// `is:unread (subject:(job OR career) OR (job OR career))`.
    pub fn to_gmail(&self) -> String {
        let mut parts = Vec::new();
        if self.unread_only {
            parts.push("is:unread".to_string());
        }
        if !self.keywords.is_empty() {
            let terms = self
                .keywords
                .iter()
                .map(|k| gmail_term(k))
                .collect::<Vec<_>>()
                .join(" OR ");
            parts.push(format!("(subject:({terms}) OR ({terms}))"));
        }
        parts.join(" ")
    }

    /// Render as IMAP `SEARCH` keys, e.g. `UNSEEN OR TEXT "job" TEXT "career"`.
    ///
    /// IMAP `OR` is binary, so N keywords nest as `OR k1 OR k2 k3`.
    /// `TEXT` covers headers and body, which includes the subject.
    pub fn to_imap(&self) -> String {
        let mut keys = Vec::new();
        if self.unread_only {
            keys.push("UNSEEN".to_string());
        }
        if let Some(disjunction) = imap_disjunction(&self.keywords) {
            keys.push(disjunction);
        }
        if keys.is_empty() {
            "ALL".to_string()
        } else {
            keys.join(" ")
        }
    }
}

/// Quote multi-word Gmail terms.
fn gmail_term(keyword: &str) -> String {
    if keyword.contains(char::is_whitespace) {
        format!("\"{}\"", keyword.replace('"', ""))
    } else {
        keyword.to_string()
    }
}

fn imap_disjunction(keywords: &[String]) -> Option<String> {
    let (first, rest) = keywords.split_first()?;
    let key = format!("TEXT {}", imap_quote(first));
    Some(match imap_disjunction(rest) {
        Some(tail) => format!("OR {key} {tail}"),
        None => key,
    })
}

/// IMAP quoted string.
pub(crate) fn imap_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Reference to a candidate message from a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A mailbox the alert loop reads from.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Backend name for logs ("gmail", "imap").
    fn name(&self) -> &str;

    /// Unread messages matching `query`, at most `max_results`.
    async fn list_unread_matching(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<MessageRef>, MailboxError>;

    /// Full message: headers plus MIME part tree.
    async fn fetch_full(&self, id: &str) -> Result<FetchedMessage, MailboxError>;

    /// Clear the unread flag. Marking an already-read message succeeds.
    async fn mark_read(&self, id: &str) -> Result<(), MailboxError>;
}

/// Which mailbox backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxBackend {
    Gmail,
    Imap,
}

impl MailboxBackend {
    /// Read `JOB_ALERT_MAILBOX` (default `gmail`).
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("JOB_ALERT_MAILBOX") {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::Gmail),
        }
    }
}

impl std::str::FromStr for MailboxBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "imap" => Ok(Self::Imap),
            other => Err(ConfigError::InvalidValue {
                key: "JOB_ALERT_MAILBOX".into(),
                message: format!("expected 'gmail' or 'imap', got '{other}'"),
            }),
        }
    }
}

/// Build the configured mailbox backend from environment variables.
pub fn create_mailbox(
    backend: MailboxBackend,
    http: reqwest::Client,
) -> Result<Arc<dyn Mailbox>, ConfigError> {
    match backend {
        MailboxBackend::Gmail => {
            let config = GmailConfig::from_env();
            tracing::info!(user = %config.user_id, "Using Gmail mailbox");
            Ok(Arc::new(GmailMailbox::new(config, http)))
        }
        MailboxBackend::Imap => {
            let config = ImapConfig::from_env()
                .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;
            tracing::info!(host = %config.imap_host, "Using IMAP mailbox");
            Ok(Arc::new(ImapMailbox::new(config)))
        }
    }
}

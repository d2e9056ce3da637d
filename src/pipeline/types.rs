//! Shared types for the alert pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::mail::{FetchedMessage, extract_body};

// ── Candidate message ───────────────────────────────────────────────

/// A mailbox message reduced to what the pipeline needs.
///
/// Built fresh on each poll from a [`FetchedMessage`]; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Mailbox-native identifier, used to mark the message read.
    pub id: String,
    /// Subject line, `"(no subject)"` when missing.
    pub subject: String,
    /// Extracted plain-text body (trimmed, length-capped).
    pub body: String,
    /// `From` header, if present.
    pub sender: Option<String>,
    /// When the mailbox received it, if known.
    pub received_at: Option<DateTime<Utc>>,
}

impl JobMessage {
    /// Extract subject and body from a fetched message.
    pub fn from_fetched(fetched: &FetchedMessage) -> Self {
        Self {
            id: fetched.id.clone(),
            subject: fetched.subject(),
            body: extract_body(fetched.root.as_ref()),
            sender: fetched.sender(),
            received_at: fetched.received_at,
        }
    }
}

// ── Notification payload ────────────────────────────────────────────

/// Chat-ready alert text for one message.
///
/// Uses `*bold*` markers, which both WhatsApp and Telegram Markdown render.
pub fn format_notification(subject: &str, summary: &str) -> String {
    format!("🔔 *New Job Alert!* 🔔\n\n*Subject:* {subject}\n\n*Summary:* \n{summary}")
}

// ── Iteration results ───────────────────────────────────────────────

/// Per-iteration counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Candidates returned by the mailbox search.
    pub candidates: usize,
    /// Notifications delivered successfully.
    pub notified: usize,
    /// Notifications attempted but not delivered.
    pub delivery_failures: usize,
    /// Candidates rejected by the local keyword filter.
    pub skipped: usize,
    /// Candidates whose full body could not be fetched.
    pub fetch_failures: usize,
    /// Messages marked read.
    pub marked_read: usize,
}

/// Result of one poll iteration. The caller picks the sleep from it.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The iteration ran to the end (individual messages may still have failed).
    Completed(IterationReport),
    /// Something escaped the per-message handling; retry soon.
    Failed(Error),
}

impl IterationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

//! Message part tree: the shape both mailbox backends hand to the extractor.

use serde::{Deserialize, Serialize};

/// Subject used when a message has no (or an empty) `Subject` header.
pub const NO_SUBJECT: &str = "(no subject)";

/// Inline payload of a leaf part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartBody {
    /// URL-safe base64 as the Gmail REST API delivers it (padding optional).
    Base64Url(String),
    /// Bytes already transfer-decoded by a MIME parser.
    Raw(Vec<u8>),
}

/// A node in a message's MIME tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    /// `text/plain`, `text/html`, `multipart/alternative`, ... (may carry parameters).
    pub mime_type: String,
    /// Inline payload. `None` for containers and attachment references.
    pub body: Option<PartBody>,
    /// Set on attachment references that carry no inline payload.
    pub attachment_id: Option<String>,
    /// Child parts of a multipart container.
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// A leaf with an inline payload.
    pub fn leaf(mime_type: impl Into<String>, body: PartBody) -> Self {
        Self {
            mime_type: mime_type.into(),
            body: Some(body),
            ..Default::default()
        }
    }

    /// A plain-text or HTML leaf from a UTF-8 string.
    pub fn text(mime_type: impl Into<String>, content: &str) -> Self {
        Self::leaf(mime_type, PartBody::Raw(content.as_bytes().to_vec()))
    }

    /// An attachment reference without inline data.
    pub fn attachment(mime_type: impl Into<String>, attachment_id: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            attachment_id: Some(attachment_id.into()),
            ..Default::default()
        }
    }

    /// A multipart container.
    pub fn multipart(mime_type: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self {
            mime_type: mime_type.into(),
            parts,
            ..Default::default()
        }
    }

    /// Case-insensitive prefix match on the MIME type, so
    /// `text/plain; charset=utf-8` matches `text/plain`.
    pub fn is_type(&self, prefix: &str) -> bool {
        self.mime_type
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

/// A single message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Look up a header value by name (case-insensitive). First match wins.
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// A fully fetched message as returned by a mailbox backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Mailbox-native identifier (Gmail message id or IMAP UID).
    pub id: String,
    /// Top-level headers.
    pub headers: Vec<Header>,
    /// Root of the MIME tree. `None` when the backend returned no payload.
    pub root: Option<MessagePart>,
    /// Receive time, when the backend knows it.
    pub received_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FetchedMessage {
    /// Trimmed subject, or [`NO_SUBJECT`] when missing or blank.
    pub fn subject(&self) -> String {
        match find_header(&self.headers, "Subject").map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => NO_SUBJECT.to_string(),
        }
    }

    /// The `From` header, if any.
    pub fn sender(&self) -> Option<String> {
        find_header(&self.headers, "From")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

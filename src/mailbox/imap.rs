//! IMAP mailbox: raw IMAP4rev1 over rustls, messages parsed with mail-parser.
//!
//! One authenticated session is kept open between calls and rebuilt after
//! any I/O or protocol error. All socket work is blocking and runs on
//! `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{MessageParser, MimeHeaders, PartType};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mail::{FetchedMessage, Header, MessagePart, PartBody};
use crate::mailbox::{Mailbox, MessageRef, SearchQuery, imap_quote};

const BACKEND: &str = "imap";

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Nesting limit when walking a parsed MIME tree.
const MAX_PART_DEPTH: usize = 32;

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let mailbox = std::env::var("EMAIL_IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Some(Self {
            imap_host,
            imap_port,
            username,
            password,
            mailbox,
        })
    }
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literals collected up to the tagged completion.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// An authenticated IMAP session with a mailbox selected.
struct ImapSession {
    stream: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        if config.username.is_empty() {
            return Err(MailboxError::NotConfigured {
                backend: BACKEND.into(),
                reason: "EMAIL_USERNAME is not set".into(),
            });
        }

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| MailboxError::NotConfigured {
                backend: BACKEND.into(),
                reason: format!("invalid IMAP host name: {e}"),
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Protocol(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        session
            .command(&format!(
                "LOGIN {} {}",
                imap_quote(&config.username),
                imap_quote(config.password.expose_secret())
            ))
            .map_err(|e| MailboxError::AuthFailed {
                backend: BACKEND.into(),
                reason: e.to_string(),
            })?;

        session.command(&format!("SELECT {}", imap_quote(&config.mailbox)))?;
        info!(host = %config.imap_host, mailbox = %config.mailbox, "IMAP session opened");
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte)? {
                0 => return Err(MailboxError::Protocol("connection closed".into())),
                _ => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
            }
        }
    }

    /// Send one tagged command and collect everything up to its completion.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            if line.starts_with(&format!("{tag} ")) {
                check_tagged_status(&line)?;
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    fn uid_search(&mut self, keys: &str) -> Result<Vec<u32>, MailboxError> {
        let response = self.command(&format!("UID SEARCH {keys}"))?;
        Ok(parse_search_response(&response.lines))
    }

    fn uid_fetch_raw(&mut self, uid: &str) -> Result<Vec<u8>, MailboxError> {
        let response = self.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| MailboxError::Protocol(format!("message UID {uid} not found")))
    }

    fn uid_mark_seen(&mut self, uid: &str) -> Result<(), MailboxError> {
        self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))?;
        Ok(())
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        let tag = format!("A{}", self.next_tag);
        let _ = self.stream.write_all(format!("{tag} LOGOUT\r\n").as_bytes());
        let _ = self.stream.flush();
    }
}

// ── Protocol helpers (public for testing) ───────────────────────────

/// Size of a `{N}` literal announced at the end of a response line.
pub fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches("\r\n");
    let open = trimmed.strip_suffix('}')?.rfind('{')?;
    trimmed[open + 1..trimmed.len() - 1].parse().ok()
}

/// Turn a tagged `NO`/`BAD` completion into an error.
pub fn check_tagged_status(line: &str) -> Result<(), MailboxError> {
    let mut words = line.split_whitespace();
    let _tag = words.next();
    match words.next() {
        Some(status) if status.eq_ignore_ascii_case("OK") => Ok(()),
        _ => Err(MailboxError::Protocol(line.trim_end().to_string())),
    }
}

/// Collect UIDs from `* SEARCH` lines.
pub fn parse_search_response(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Newest `max` UIDs, newest first.
pub fn newest_uids(mut uids: Vec<u32>, max: usize) -> Vec<u32> {
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids.truncate(max);
    uids
}

// ── Parsing into the part tree ──────────────────────────────────────

/// Parse a raw RFC 5322 message into a [`FetchedMessage`].
pub fn parse_raw_message(id: &str, raw: &[u8]) -> Option<FetchedMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let mut headers = Vec::new();
    if let Some(subject) = parsed.subject() {
        headers.push(Header::new("Subject", subject));
    }
    if let Some(from) = parsed.from().and_then(|addr| addr.first()) {
        let value = match (from.name(), from.address()) {
            (Some(name), Some(addr)) => format!("{name} <{addr}>"),
            (None, Some(addr)) => addr.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        };
        headers.push(Header::new("From", value));
    }

    let received_at = parsed
        .date()
        .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0));

    let root = (!parsed.parts.is_empty()).then(|| convert_part(&parsed, 0, 0));

    Some(FetchedMessage {
        id: id.to_string(),
        headers,
        root,
        received_at,
    })
}

fn convert_part(message: &mail_parser::Message<'_>, index: usize, depth: usize) -> MessagePart {
    let Some(part) = message.parts.get(index) else {
        return MessagePart::default();
    };

    let mime_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| default_mime(&part.body).to_string());

    let is_attachment = part
        .content_disposition()
        .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));

    match &part.body {
        // Blank text gets no payload, the same as an empty Gmail `body.data`
        PartType::Text(text) | PartType::Html(text) if !is_attachment => {
            if text.trim().is_empty() {
                MessagePart {
                    mime_type,
                    ..Default::default()
                }
            } else {
                MessagePart::leaf(mime_type, PartBody::Raw(text.as_bytes().to_vec()))
            }
        }
        PartType::Multipart(children) if depth < MAX_PART_DEPTH => MessagePart::multipart(
            mime_type,
            children
                .iter()
                .map(|&child| convert_part(message, child as usize, depth + 1))
                .collect(),
        ),
        _ => MessagePart::attachment(mime_type, index.to_string()),
    }
}

fn default_mime(body: &PartType<'_>) -> &'static str {
    match body {
        PartType::Text(_) => "text/plain",
        PartType::Html(_) => "text/html",
        PartType::Multipart(_) => "multipart/mixed",
        PartType::Message(_) => "message/rfc822",
        _ => "application/octet-stream",
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP mailbox with a lazily opened, reused session.
pub struct ImapMailbox {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the session on a blocking thread.
    ///
    /// Opens the session on first use; drops it after any error so the
    /// next call reconnects.
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, MailboxError> + Send + 'static,
    {
        let config = self.config.clone();
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| MailboxError::Protocol("IMAP session lock poisoned".into()))?;

            if guard.is_none() {
                *guard = Some(ImapSession::connect(&config)?);
            }
            let Some(active) = guard.as_mut() else {
                return Err(MailboxError::Protocol("IMAP session unavailable".into()));
            };

            let result = op(active);
            if let Err(e) = &result {
                warn!(error = %e, "IMAP operation failed; dropping session");
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| MailboxError::Protocol(format!("IMAP task panicked: {e}")))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn list_unread_matching(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<MessageRef>, MailboxError> {
        let keys = query.to_imap();
        debug!(keys = %keys, max_results, "Searching IMAP mailbox");

        let uids = self.with_session(move |s| s.uid_search(&keys)).await?;
        Ok(newest_uids(uids, max_results)
            .into_iter()
            .map(|uid| MessageRef::new(uid.to_string()))
            .collect())
    }

    async fn fetch_full(&self, id: &str) -> Result<FetchedMessage, MailboxError> {
        let uid = id.to_string();
        let raw = self.with_session(move |s| s.uid_fetch_raw(&uid)).await?;
        parse_raw_message(id, &raw).ok_or_else(|| MailboxError::InvalidResponse {
            backend: BACKEND.into(),
            reason: format!("could not parse message UID {id}"),
        })
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        let uid = id.to_string();
        self.with_session(move |s| s.uid_mark_seen(&uid)).await?;
        info!(id = %id, "Marked IMAP message as seen");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::extract_body;

    const MULTIPART: &str = "From: Acme Recruiting <jobs@acme.test>\r\n\
        To: me@example.com\r\n\
        Subject: =?UTF-8?Q?Interview_Invitation_=E2=80=94_Acme?=\r\n\
        Date: Thu, 1 Jan 2026 10:00:00 +0000\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
        \r\n\
        --outer\r\n\
        Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
        \r\n\
        --inner\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Please pick a slot for Tuesday.\r\n\
        --inner\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <p>Please pick a <b>slot</b></p>\r\n\
        --inner--\r\n\
        --outer\r\n\
        Content-Type: application/pdf\r\n\
        Content-Disposition: attachment; filename=\"jd.pdf\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        JVBERi0xLjQK\r\n\
        --outer--\r\n";

    // ── Protocol helpers ────────────────────────────────────────────

    #[test]
    fn literal_len_parses_trailing_size() {
        assert_eq!(literal_len("* 1 FETCH (UID 7 BODY[] {2048}\r\n"), Some(2048));
        assert_eq!(literal_len("* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len("* OK {nope}\r\n"), None);
    }

    #[test]
    fn tagged_status_ok_and_failures() {
        assert!(check_tagged_status("A3 OK SEARCH completed\r\n").is_ok());
        assert!(check_tagged_status("A3 NO [AUTHENTICATIONFAILED] bad creds\r\n").is_err());
        assert!(check_tagged_status("A3 BAD parse error\r\n").is_err());
    }

    #[test]
    fn search_response_collects_uids() {
        let lines = vec![
            "* SEARCH 4 9 12\r\n".to_string(),
            "* OK still here\r\n".to_string(),
        ];
        assert_eq!(parse_search_response(&lines), vec![4, 9, 12]);
        assert!(parse_search_response(&["* SEARCH\r\n".to_string()]).is_empty());
    }

    #[test]
    fn newest_uids_sorted_descending_and_capped() {
        assert_eq!(newest_uids(vec![3, 10, 7, 10, 1], 3), vec![10, 7, 3]);
        assert!(newest_uids(vec![], 20).is_empty());
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn raw_multipart_converts_to_tree() {
        let fetched = parse_raw_message("42", MULTIPART.as_bytes()).unwrap();
        assert_eq!(fetched.id, "42");
        assert_eq!(fetched.subject(), "Interview Invitation — Acme");
        assert_eq!(
            fetched.sender().as_deref(),
            Some("Acme Recruiting <jobs@acme.test>")
        );
        assert!(fetched.received_at.is_some());
        assert_eq!(
            extract_body(fetched.root.as_ref()),
            "Please pick a slot for Tuesday."
        );
    }

    #[test]
    fn attachment_becomes_reference() {
        let fetched = parse_raw_message("42", MULTIPART.as_bytes()).unwrap();
        let root = fetched.root.unwrap();
        assert!(root.is_type("multipart/mixed"));
        let pdf = root
            .parts
            .iter()
            .find(|p| p.is_type("application/pdf"))
            .unwrap();
        assert!(pdf.body.is_none());
        assert!(pdf.attachment_id.is_some());
    }

    #[test]
    fn empty_plain_alternative_has_no_payload() {
        let raw = "Subject: Opening\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/alternative; boundary=\"alt\"\r\n\
            \r\n\
            --alt\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            \r\n\
            --alt\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>Senior Rust role at Acme</p>\r\n\
            --alt--\r\n";
        let fetched = parse_raw_message("5", raw.as_bytes()).unwrap();

        let root = fetched.root.as_ref().unwrap();
        assert!(
            root.parts
                .iter()
                .filter(|p| p.is_type("text/plain"))
                .all(|p| p.body.is_none())
        );
        assert_eq!(
            extract_body(fetched.root.as_ref()),
            "Senior Rust role at Acme"
        );
    }

    #[test]
    fn single_part_message() {
        let raw = "Subject: Hi\r\nContent-Type: text/plain\r\n\r\nWork update\r\n";
        let fetched = parse_raw_message("1", raw.as_bytes()).unwrap();
        assert_eq!(fetched.subject(), "Hi");
        assert_eq!(extract_body(fetched.root.as_ref()), "Work update");
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        // SAFETY: no other test reads or writes EMAIL_IMAP_HOST.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(ImapConfig::from_env().is_none());
    }
}

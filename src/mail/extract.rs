//! Best-effort plain-text body extraction from a message part tree.
//!
//! Walks every node, keeps the first `text/plain` and the first `text/html`
//! leaf it sees, and prefers plain text. HTML is flattened to text with
//! `html2text`. Pure and synchronous; no I/O.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use tracing::debug;

use crate::mail::part::{MessagePart, PartBody};

/// Upper bound on the extracted body, in characters.
pub const MAX_BODY_CHARS: usize = 20_000;

/// Wrap width handed to html2text. Wide enough that paragraphs stay on one line.
const HTML_WRAP_WIDTH: usize = 1_000;

/// Gmail's URL-safe alphabet; accepts padded and unpadded input.
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Extract the best plain-text body from a message tree.
///
/// Returns `""` for an absent root or a tree with no inline text leaves.
/// The result is trimmed and capped at [`MAX_BODY_CHARS`].
pub fn extract_body(root: Option<&MessagePart>) -> String {
    let mut text_plain: Option<String> = None;
    let mut text_html: Option<String> = None;
    let mut stack: Vec<&MessagePart> = root.into_iter().collect();

    while let Some(part) = stack.pop() {
        // Reversed so siblings pop in document order
        stack.extend(part.parts.iter().rev());

        // Attachment references and containers carry no inline payload
        let Some(body) = &part.body else {
            continue;
        };

        // Blank candidates don't count, so an empty plain alternative
        // can't hide the HTML one
        if part.is_type("text/plain") {
            if text_plain.is_none() {
                text_plain = decode_payload(body).filter(|t| !t.trim().is_empty());
            }
        } else if part.is_type("text/html") && text_html.is_none() {
            text_html = decode_payload(body)
                .map(|html| html_to_text(&html))
                .filter(|t| !t.trim().is_empty());
        }
    }

    let best = text_plain.or(text_html).unwrap_or_default();
    truncate_chars(best.trim(), MAX_BODY_CHARS).trim_end().to_string()
}

/// Decode a part payload to text, dropping invalid UTF-8 sequences.
///
/// Returns `None` only when base64 decoding fails outright.
pub fn decode_payload(body: &PartBody) -> Option<String> {
    match body {
        PartBody::Raw(bytes) => Some(lossy_utf8(bytes)),
        PartBody::Base64Url(data) => {
            let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            match GMAIL_BASE64.decode(compact.as_bytes()) {
                Ok(bytes) => Some(lossy_utf8(&bytes)),
                Err(e) => {
                    debug!(error = %e, "Skipping part with undecodable base64 payload");
                    None
                }
            }
        }
    }
}

/// Convert HTML to readable text, block elements separated by newlines.
///
/// Markup is dropped, not rendered: no `*bold*` markers, no link
/// footnotes, no table borders.
pub fn html_to_text(html: &str) -> String {
    let config = html2text::config::plain_no_decorate().raw_mode(true);
    match config.string_from_read(html.as_bytes(), HTML_WRAP_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "html2text failed, falling back to tag stripping");
            strip_tags(html)
        }
    }
}

/// Fallback HTML stripper: drops tags, turns block-level closers into newlines.
fn strip_tags(html: &str) -> String {
    const BLOCK_TAGS: [&str; 8] = ["p", "div", "br", "li", "tr", "h1", "h2", "h3"];

    let mut result = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name: String = tag
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                if BLOCK_TAGS.contains(&name.as_str()) && !result.ends_with('\n') {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => result.push(ch),
        }
    }
    result
}

/// Decode bytes as UTF-8, silently discarding malformed sequences.
fn lossy_utf8(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> PartBody {
        PartBody::Base64Url(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s))
    }

    // ── Preference and traversal ────────────────────────────────────

    #[test]
    fn absent_root_is_empty() {
        assert_eq!(extract_body(None), "");
    }

    #[test]
    fn attachment_only_tree_is_empty() {
        let root = MessagePart::multipart(
            "multipart/mixed",
            vec![
                MessagePart::attachment("application/pdf", "att-1"),
                MessagePart::attachment("text/plain", "att-2"),
                MessagePart::multipart(
                    "multipart/mixed",
                    vec![MessagePart::attachment("image/png", "att-3")],
                ),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "");
    }

    #[test]
    fn plain_preferred_over_html() {
        let root = MessagePart::multipart(
            "multipart/alternative",
            vec![
                MessagePart::leaf("text/html", b64("<p>HTML version</p>")),
                MessagePart::leaf("text/plain", b64("Plain version\n")),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Plain version");
    }

    #[test]
    fn plain_preferred_regardless_of_order() {
        let root = MessagePart::multipart(
            "multipart/alternative",
            vec![
                MessagePart::text("text/plain", "Plain first"),
                MessagePart::text("text/html", "<b>HTML second</b>"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Plain first");
    }

    #[test]
    fn first_plain_part_in_document_order_wins() {
        let root = MessagePart::multipart(
            "multipart/mixed",
            vec![
                MessagePart::text("text/plain", "Cover note"),
                MessagePart::text("text/plain", "Forwarded footer"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Cover note");
    }

    #[test]
    fn html_only_is_flattened() {
        let root = MessagePart::leaf("text/html", b64("<p>Hello</p><p>World</p>"));
        let text = extract_body(Some(&root));
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains('<'));
        assert!(!text.contains('>'));
        assert!(text.lines().any(|l| l.trim() == "Hello"));
    }

    #[test]
    fn html_markup_is_stripped_not_rendered() {
        let html = "<p>Please pick a <b>slot</b> or <em>reply</em></p>\
                    <p><a href=\"https://jobs.acme.test/apply?id=42\">Apply here</a></p>\
                    <table><tr><th>Field</th><th>Value</th></tr>\
                    <tr><td>Role</td><td>Backend</td></tr></table>";
        let root = MessagePart::text("text/html", html);
        let text = extract_body(Some(&root));

        for word in ["slot", "reply", "Apply here", "Role", "Backend"] {
            assert!(text.contains(word), "missing {word:?} in {text:?}");
        }
        assert!(!text.contains('*'), "emphasis markers in {text:?}");
        assert!(!text.contains("[1]"), "link footnote in {text:?}");
        assert!(!text.contains("https://"), "link target in {text:?}");
        assert!(!text.contains('─') && !text.contains('│'), "table border in {text:?}");
    }

    #[test]
    fn empty_plain_alternative_falls_back_to_html() {
        let root = MessagePart::multipart(
            "multipart/alternative",
            vec![
                MessagePart::text("text/plain", ""),
                MessagePart::text("text/html", "<p>Senior Rust role at Acme</p>"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Senior Rust role at Acme");
    }

    #[test]
    fn whitespace_plain_part_is_skipped_for_later_plain() {
        let root = MessagePart::multipart(
            "multipart/mixed",
            vec![
                MessagePart::leaf("text/plain", b64(" \r\n\t ")),
                MessagePart::text("text/plain", "Real body"),
                MessagePart::text("text/html", "<p>HTML body</p>"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Real body");
    }

    #[test]
    fn nested_multipart_found() {
        let root = MessagePart::multipart(
            "multipart/mixed",
            vec![
                MessagePart::attachment("application/pdf", "cv"),
                MessagePart::multipart(
                    "multipart/alternative",
                    vec![MessagePart::text("text/plain; charset=utf-8", "Deep body")],
                ),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Deep body");
    }

    #[test]
    fn single_leaf_root() {
        let root = MessagePart::text("text/plain", "  just text  ");
        assert_eq!(extract_body(Some(&root)), "just text");
    }

    #[test]
    fn non_text_leaves_ignored() {
        let root = MessagePart::multipart(
            "multipart/mixed",
            vec![
                MessagePart::text("text/calendar", "BEGIN:VCALENDAR"),
                MessagePart::text("application/json", "{}"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "");
    }

    // ── Decoding ────────────────────────────────────────────────────

    #[test]
    fn padded_and_unpadded_base64_both_decode() {
        let padded = PartBody::Base64Url(
            base64::engine::general_purpose::URL_SAFE.encode("Hi there"),
        );
        assert_eq!(decode_payload(&padded).as_deref(), Some("Hi there"));
        assert_eq!(decode_payload(&b64("Hi there")).as_deref(), Some("Hi there"));
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let body = PartBody::Raw(vec![b'O', b'K', 0xFF, 0xFE, b'!']);
        assert_eq!(decode_payload(&body).as_deref(), Some("OK!"));
    }

    #[test]
    fn garbage_base64_is_skipped() {
        assert!(decode_payload(&PartBody::Base64Url("***not base64***".into())).is_none());

        let root = MessagePart::multipart(
            "multipart/alternative",
            vec![
                MessagePart::leaf("text/plain", PartBody::Base64Url("%%%".into())),
                MessagePart::text("text/html", "<p>Fallback</p>"),
            ],
        );
        assert_eq!(extract_body(Some(&root)), "Fallback");
    }

    // ── Length cap ──────────────────────────────────────────────────

    #[test]
    fn output_capped_at_max_chars() {
        let root = MessagePart::text("text/plain", &"x".repeat(MAX_BODY_CHARS * 2));
        assert_eq!(extract_body(Some(&root)).chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn cap_counts_chars_not_bytes() {
        let root = MessagePart::text("text/plain", &"é".repeat(MAX_BODY_CHARS + 10));
        let body = extract_body(Some(&root));
        assert_eq!(body.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn truncate_chars_short_input_unchanged() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
    }

    // ── Fallback stripper ───────────────────────────────────────────

    #[test]
    fn strip_tags_breaks_blocks() {
        let text = strip_tags("<div>One</div><div>Two<br>Three</div>");
        assert_eq!(text.trim(), "One\nTwo\nThree");
    }
}

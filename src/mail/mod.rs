//! Message structure and body extraction.

pub mod extract;
pub mod part;

pub use extract::{MAX_BODY_CHARS, extract_body};
pub use part::{FetchedMessage, Header, MessagePart, NO_SUBJECT, PartBody};

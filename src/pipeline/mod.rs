//! Job alert pipeline.
//!
//! Every candidate from the mailbox flows through:
//! 1. `JobMessage::from_fetched()`: subject + extracted body
//! 2. `JobClassifier::is_job_related()`: fast keyword match (no LLM)
//! 3. `Summarizer::summarize()`: short summary, placeholder on failure
//! 4. `Notifier::send()`: one alert to the configured recipient
//! 5. `Mailbox::mark_read()`: after the delivery attempt

pub mod processor;
pub mod rules;
pub mod types;

pub use processor::{BackoffPolicy, JobAlertAgent};
pub use rules::{JobClassifier, is_job_related};
pub use types::{IterationOutcome, IterationReport, JobMessage, format_notification};

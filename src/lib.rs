//! Job Alert: forwards LLM summaries of job-related email to a chat app.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod mailbox;
pub mod pipeline;

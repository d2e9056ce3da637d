//! Error types for job-alert.

/// Top-level error type for the alert loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox gateway errors (Gmail REST or IMAP).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox {backend} is not configured: {reason}")]
    NotConfigured { backend: String, reason: String },

    #[error("Authentication failed for mailbox {backend}: {reason}")]
    AuthFailed { backend: String, reason: String },

    #[error("Mailbox {backend} request failed: {reason}")]
    RequestFailed { backend: String, reason: String },

    #[error("Mailbox {backend} returned HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from mailbox {backend}: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Summarizer (LLM provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Empty response from {provider}")]
    EmptyResponse { provider: String },
}

/// Notification channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} is not configured: missing {missing}")]
    NotConfigured { name: String, missing: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for the alert loop.
pub type Result<T> = std::result::Result<T, Error>;

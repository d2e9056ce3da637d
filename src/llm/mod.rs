//! Summarizer gateway: turns a job email into a short chat-sized summary.
//!
//! Supports:
//! - **OpenAI**: via rig-core (default model `gpt-4o-mini`)
//! - **Anthropic**: via rig-core
//!
//! `RigBackend` bridges rig's `CompletionModel` to our `CompletionBackend`
//! trait; `LlmSummarizer` owns the prompts and turns every failure into a
//! placeholder so the alert loop always has something to send.

use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::{Agent, AgentBuilder};
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ConfigError, LlmError};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

/// Keeps the summary short enough for one chat message.
pub const SUMMARY_MAX_TOKENS: u64 = 120;
pub const SUMMARY_TEMPERATURE: f64 = 0.2;

pub const SYSTEM_PROMPT: &str =
    "You are an expert at summarizing job emails for quick notifications.";

/// Returned instead of a summary when no API key is configured.
pub const MISSING_KEY_SUMMARY: &str = "Error: LLM API key not configured.";

/// User prompt for one email.
pub fn summary_prompt(subject: &str, body: &str) -> String {
    format!(
        "Summarize for WhatsApp:\n- Company\n- Role\n- Action (apply/schedule/next steps)\n\n\
         Subject: {subject}\n\nBody:\n{body}"
    )
}

/// Placeholder summary after a failed completion.
pub fn failure_summary(reason: &str) -> String {
    format!("Could not summarize the email ({reason}).")
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    fn label(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::InvalidValue {
                key: "JOB_ALERT_LLM_BACKEND".into(),
                message: format!("expected 'openai' or 'anthropic', got '{other}'"),
            }),
        }
    }
}

/// Configuration for creating a summarizer.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// `None` means summaries degrade to [`MISSING_KEY_SUMMARY`].
    pub api_key: Option<SecretString>,
    pub model: String,
}

impl LlmConfig {
    /// Read `JOB_ALERT_LLM_BACKEND`, the backend's API key variable and
    /// `JOB_ALERT_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("JOB_ALERT_LLM_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => LlmBackend::OpenAi,
        };

        let api_key = std::env::var(backend.key_var())
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from);

        let model = std::env::var("JOB_ALERT_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());

        Ok(Self {
            backend,
            api_key,
            model,
        })
    }
}

/// A chat completion endpoint: one system prompt, one user prompt, text back.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, LlmError>;
}

/// Anything that can summarize a job email. Never fails: errors come back
/// as placeholder text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, subject: &str, body: &str) -> String;
}

/// Adapter from a rig completion model to [`CompletionBackend`].
pub struct RigBackend<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigBackend<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> CompletionBackend for RigBackend<M>
where
    M: CompletionModel + 'static,
    Agent<M>: Prompt,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String, LlmError> {
        let agent = AgentBuilder::new(self.model.clone())
            .preamble(preamble)
            .max_tokens(SUMMARY_MAX_TOKENS)
            .temperature(SUMMARY_TEMPERATURE)
            .build();

        let text = agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.provider.to_string(),
            });
        }
        Ok(text.to_string())
    }
}

/// Prompt construction plus failure-to-placeholder mapping over a backend.
pub struct LlmSummarizer {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A summarizer with no API key; every call returns [`MISSING_KEY_SUMMARY`].
    pub fn unconfigured() -> Self {
        Self { backend: None }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, subject: &str, body: &str) -> String {
        let Some(backend) = &self.backend else {
            tracing::warn!("LLM API key not configured; skipping summarization");
            return MISSING_KEY_SUMMARY.to_string();
        };

        let prompt = summary_prompt(subject, body);
        match backend.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(summary) => {
                tracing::debug!(model = backend.model_name(), "Summary generated");
                summary
            }
            Err(e) => {
                tracing::error!(model = backend.model_name(), error = %e, "Summarization failed");
                failure_summary(&e.to_string())
            }
        }
    }
}

/// Create the summarizer from configuration.
pub fn create_summarizer(config: &LlmConfig) -> Result<Arc<dyn Summarizer>, LlmError> {
    let Some(api_key) = &config.api_key else {
        tracing::warn!(
            "{} not set; alerts will carry a placeholder summary",
            config.backend.key_var()
        );
        return Ok(Arc::new(LlmSummarizer::unconfigured()));
    };

    let backend = match config.backend {
        LlmBackend::Anthropic => create_anthropic_backend(api_key, &config.model)?,
        LlmBackend::OpenAi => create_openai_backend(api_key, &config.model)?,
    };
    Ok(Arc::new(LlmSummarizer::new(backend)))
}

fn create_anthropic_backend(
    api_key: &SecretString,
    model_name: &str,
) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(api_key.expose_secret()).map_err(|e| LlmError::RequestFailed {
            provider: LlmBackend::Anthropic.label().to_string(),
            reason: format!("Failed to create Anthropic client: {}", e),
        })?;

    let model = client.completion_model(model_name);
    tracing::info!("Using Anthropic (model: {})", model_name);
    Ok(Arc::new(RigBackend::new(
        model,
        model_name,
        LlmBackend::Anthropic.label(),
    )))
}

fn create_openai_backend(
    api_key: &SecretString,
    model_name: &str,
) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(api_key.expose_secret()).map_err(|e| LlmError::RequestFailed {
            provider: LlmBackend::OpenAi.label().to_string(),
            reason: format!("Failed to create OpenAI client: {}", e),
        })?;

    let model = client.completion_model(model_name);
    tracing::info!("Using OpenAI (model: {})", model_name);
    Ok(Arc::new(RigBackend::new(
        model,
        model_name,
        LlmBackend::OpenAi.label(),
    )))
}

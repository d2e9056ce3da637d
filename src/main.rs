use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use job_alert::channels::{NotifierBackend, create_notifier};
use job_alert::config::AlertConfig;
use job_alert::llm::{LlmConfig, create_summarizer};
use job_alert::mailbox::{MailboxBackend, create_mailbox};
use job_alert::pipeline::JobAlertAgent;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AlertConfig::from_env()?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let mailbox_backend = MailboxBackend::from_env()?;
    let notifier_backend = NotifierBackend::from_env()?;
    let llm_config = LlmConfig::from_env()?;

    eprintln!("📬 Job Alert v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {:?}", mailbox_backend);
    eprintln!("   Query: {}", config.query.to_gmail());
    eprintln!(
        "   Model: {} ({:?}{})",
        llm_config.model,
        llm_config.backend,
        if llm_config.api_key.is_some() {
            ""
        } else {
            ", no API key"
        }
    );
    eprintln!("   Notifier: {:?}", notifier_backend);
    eprintln!(
        "   Poll: every {}s, {}s after errors, mark read {:?}",
        config.poll_interval.as_secs(),
        config.error_backoff.as_secs(),
        config.mark_read
    );
    eprintln!("   Press Ctrl-C to stop.\n");

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let mailbox = create_mailbox(mailbox_backend, http.clone())?;
    let summarizer = create_summarizer(&llm_config)?;
    let notifier = create_notifier(notifier_backend, http);

    let agent = JobAlertAgent::new(mailbox, summarizer, notifier, config);

    tokio::select! {
        _ = agent.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// stderr logging, plus a daily-rolled file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "job-alert.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

//! Alert loop: polls the mailbox, summarizes job mail, notifies, marks read.
//!
//! Flow per candidate:
//! 1. Fetch the full message and extract subject + body
//! 2. Local keyword classifier (fast, no LLM) → may skip
//! 3. Summarize (failures become placeholder text)
//! 4. Deliver the alert (not retried)
//! 5. Mark read, after the delivery attempt, per [`MarkReadPolicy`]
//!
//! [`MarkReadPolicy`]: crate::config::MarkReadPolicy

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::Notifier;
use crate::config::AlertConfig;
use crate::llm::Summarizer;
use crate::mailbox::Mailbox;
use crate::pipeline::rules::JobClassifier;
use crate::pipeline::types::{IterationOutcome, IterationReport, JobMessage, format_notification};

/// Chooses how long to sleep after an iteration.
///
/// Fixed delays: no exponential growth, no jitter, no retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub success_delay: Duration,
    pub failure_delay: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            success_delay: config.poll_interval,
            failure_delay: config.error_backoff,
        }
    }

    pub fn next_delay(&self, outcome: &IterationOutcome) -> Duration {
        if outcome.is_failure() {
            self.failure_delay
        } else {
            self.success_delay
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&AlertConfig::default())
    }
}

/// The job alert agent: one mailbox, one summarizer, one recipient.
///
/// Strictly sequential: every gateway call is awaited before the next.
pub struct JobAlertAgent {
    mailbox: Arc<dyn Mailbox>,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn Notifier>,
    classifier: JobClassifier,
    config: AlertConfig,
}

impl JobAlertAgent {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        summarizer: Arc<dyn Summarizer>,
        notifier: Arc<dyn Notifier>,
        config: AlertConfig,
    ) -> Self {
        Self {
            mailbox,
            summarizer,
            notifier,
            classifier: JobClassifier::default(),
            config,
        }
    }

    /// Replace the default keyword classifier.
    pub fn with_classifier(mut self, classifier: JobClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Run forever: iterate, then sleep 24 h (or 60 s after a failure).
    pub async fn run(&self) {
        let backoff = BackoffPolicy::from_config(&self.config);
        info!(
            mailbox = self.mailbox.name(),
            notifier = self.notifier.name(),
            "Job alert loop started"
        );

        loop {
            let outcome = self.run_once().await;
            match &outcome {
                IterationOutcome::Completed(report) => info!(
                    candidates = report.candidates,
                    notified = report.notified,
                    delivery_failures = report.delivery_failures,
                    skipped = report.skipped,
                    fetch_failures = report.fetch_failures,
                    marked_read = report.marked_read,
                    "Iteration complete"
                ),
                IterationOutcome::Failed(e) => error!(error = %e, "Iteration failed"),
            }

            let delay = backoff.next_delay(&outcome);
            info!(
                outcome = outcome.label(),
                sleep_secs = delay.as_secs(),
                "Sleeping until next poll"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One poll: list candidates and process each in order.
    pub async fn run_once(&self) -> IterationOutcome {
        let refs = match self
            .mailbox
            .list_unread_matching(&self.config.query, self.config.max_results)
            .await
        {
            Ok(refs) => refs,
            Err(e) => {
                error!(mailbox = self.mailbox.name(), error = %e, "Failed to list unread messages");
                return IterationOutcome::Failed(e.into());
            }
        };

        let mut report = IterationReport {
            candidates: refs.len(),
            ..Default::default()
        };

        if refs.is_empty() {
            info!("No new job emails");
            return IterationOutcome::Completed(report);
        }
        info!(count = refs.len(), "Found candidate job emails");

        for message_ref in refs {
            self.process_candidate(&message_ref.id, &mut report).await;
        }

        IterationOutcome::Completed(report)
    }

    async fn process_candidate(&self, id: &str, report: &mut IterationReport) {
        let fetched = match self.mailbox.fetch_full(id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to fetch message; skipping");
                report.fetch_failures += 1;
                return;
            }
        };

        let message = JobMessage::from_fetched(&fetched);

        if self.config.local_filter
            && !self
                .classifier
                .is_job_related(&message.subject, &message.body)
        {
            // Still unread, so the next poll lists it again
            info!(
                id = %message.id,
                subject = %message.subject,
                "Not job related; left unread and will be re-listed"
            );
            report.skipped += 1;
            return;
        }

        info!(
            id = %message.id,
            subject = %message.subject,
            sender = message.sender.as_deref().unwrap_or("-"),
            "Processing job email"
        );

        let summary = self
            .summarizer
            .summarize(&message.subject, &message.body)
            .await;
        let text = format_notification(&message.subject, &summary);

        let delivered = match self.notifier.send(&text).await {
            Ok(receipt) => {
                info!(
                    id = %message.id,
                    channel = self.notifier.name(),
                    receipts = ?receipt.message_ids,
                    "Alert delivered"
                );
                report.notified += 1;
                true
            }
            Err(e) => {
                report.delivery_failures += 1;
                if self.config.mark_read.should_mark(false) {
                    warn!(
                        id = %message.id,
                        channel = self.notifier.name(),
                        error = %e,
                        "Alert delivery failed; message will be marked read and the alert lost"
                    );
                } else {
                    warn!(
                        id = %message.id,
                        channel = self.notifier.name(),
                        error = %e,
                        "Alert delivery failed; leaving message unread for the next poll"
                    );
                }
                false
            }
        };

        if !self.config.mark_read.should_mark(delivered) {
            return;
        }

        match self.mailbox.mark_read(&message.id).await {
            Ok(()) => {
                debug!(id = %message.id, "Marked read");
                report.marked_read += 1;
            }
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to mark message read");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::DeliveryReceipt;
    use crate::config::MarkReadPolicy;
    use crate::error::{ChannelError, MailboxError};
    use crate::mail::{FetchedMessage, Header, MessagePart};
    use crate::mailbox::{MessageRef, SearchQuery};

    type Events = Arc<Mutex<Vec<String>>>;

    fn message(id: &str, subject: &str, body: &str) -> FetchedMessage {
        FetchedMessage {
            id: id.into(),
            headers: vec![Header::new("Subject", subject)],
            root: Some(MessagePart::text("text/plain", body)),
            received_at: None,
        }
    }

    struct FakeMailbox {
        events: Events,
        list_error: bool,
        order: Vec<String>,
        messages: HashMap<String, FetchedMessage>,
        mark_error: bool,
    }

    impl FakeMailbox {
        fn new(events: &Events, messages: Vec<FetchedMessage>) -> Self {
            Self {
                events: events.clone(),
                list_error: false,
                order: messages.iter().map(|m| m.id.clone()).collect(),
                messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
                mark_error: false,
            }
        }
    }

    #[async_trait]
    impl Mailbox for FakeMailbox {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list_unread_matching(
            &self,
            _query: &SearchQuery,
            max_results: usize,
        ) -> Result<Vec<MessageRef>, MailboxError> {
            if self.list_error {
                return Err(MailboxError::RequestFailed {
                    backend: "fake".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(self
                .order
                .iter()
                .take(max_results)
                .map(MessageRef::new)
                .collect())
        }

        async fn fetch_full(&self, id: &str) -> Result<FetchedMessage, MailboxError> {
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| MailboxError::Status {
                    backend: "fake".into(),
                    status: 404,
                    body: "not found".into(),
                })
        }

        async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
            self.events.lock().unwrap().push(format!("mark_read:{id}"));
            if self.mark_error {
                return Err(MailboxError::Protocol("store failed".into()));
            }
            Ok(())
        }
    }

    struct FakeSummarizer {
        events: Events,
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, subject: &str, _body: &str) -> String {
            self.events
                .lock()
                .unwrap()
                .push(format!("summarize:{subject}"));
            format!("summary of {subject}")
        }
    }

    struct FakeNotifier {
        events: Events,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
            self.events.lock().unwrap().push(format!("send:{text}"));
            if self.fail {
                return Err(ChannelError::SendFailed {
                    name: "fake".into(),
                    reason: "503".into(),
                });
            }
            Ok(DeliveryReceipt {
                message_ids: vec!["m1".into()],
            })
        }
    }

    fn agent(mailbox: FakeMailbox, notify_fails: bool, config: AlertConfig) -> JobAlertAgent {
        let events = mailbox.events.clone();
        JobAlertAgent::new(
            Arc::new(mailbox),
            Arc::new(FakeSummarizer {
                events: events.clone(),
            }),
            Arc::new(FakeNotifier {
                events,
                fail: notify_fails,
            }),
            config,
        )
    }

    fn completed(outcome: IterationOutcome) -> IterationReport {
        match outcome {
            IterationOutcome::Completed(report) => report,
            IterationOutcome::Failed(e) => panic!("Expected completed iteration, got {e}"),
        }
    }

    #[tokio::test]
    async fn summarize_then_notify_then_mark_read() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(&events, vec![message("1", "New Job Opening", "Apply now")]);
        let agent = agent(mailbox, false, AlertConfig::default());

        let report = completed(agent.run_once().await);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], "summarize:New Job Opening");
        assert!(events[1].starts_with("send:🔔 *New Job Alert!* 🔔"));
        assert!(events[1].contains("summary of New Job Opening"));
        assert_eq!(events[2], "mark_read:1");

        assert_eq!(report.candidates, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.marked_read, 1);
    }

    #[tokio::test]
    async fn failed_delivery_still_marks_read_by_default() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(&events, vec![message("7", "Interview", "Tuesday")]);
        let agent = agent(mailbox, true, AlertConfig::default());

        let report = completed(agent.run_once().await);

        assert_eq!(report.delivery_failures, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(report.marked_read, 1);
        assert_eq!(events.lock().unwrap().last().unwrap(), "mark_read:7");
    }

    #[tokio::test]
    async fn failed_delivery_stays_unread_when_policy_requires_delivery() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(&events, vec![message("7", "Interview", "Tuesday")]);
        let config = AlertConfig {
            mark_read: MarkReadPolicy::AfterDelivery,
            ..Default::default()
        };
        let agent = agent(mailbox, true, config);

        let report = completed(agent.run_once().await);

        assert_eq!(report.delivery_failures, 1);
        assert_eq!(report.marked_read, 0);
        assert!(
            !events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.starts_with("mark_read"))
        );
    }

    #[tokio::test]
    async fn non_job_mail_is_skipped_and_left_unread() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(
            &events,
            vec![message("9", "Lunch tomorrow?", "see you at noon")],
        );
        let agent = agent(mailbox, false, AlertConfig::default());

        let report = completed(agent.run_once().await);

        assert_eq!(report.skipped, 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn skipped_mail_is_listed_again_and_holds_its_slot() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(
            &events,
            vec![
                message("9", "Lunch tomorrow?", "see you at noon"),
                message("10", "Rust engineer opening", "apply now"),
            ],
        );
        let config = AlertConfig {
            max_results: 1,
            ..Default::default()
        };
        let agent = agent(mailbox, false, config);

        for _ in 0..2 {
            let report = completed(agent.run_once().await);
            assert_eq!(report.skipped, 1);
            assert_eq!(report.notified, 0);
        }
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_filter_off_processes_everything() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(
            &events,
            vec![message("9", "Lunch tomorrow?", "see you at noon")],
        );
        let config = AlertConfig {
            local_filter: false,
            ..Default::default()
        };
        let agent = agent(mailbox, false, config);

        let report = completed(agent.run_once().await);

        assert_eq!(report.skipped, 0);
        assert_eq!(report.notified, 1);
    }

    #[tokio::test]
    async fn list_failure_fails_iteration() {
        let events = Events::default();
        let mut mailbox = FakeMailbox::new(&events, vec![message("1", "Job", "x")]);
        mailbox.list_error = true;
        let agent = agent(mailbox, false, AlertConfig::default());

        let outcome = agent.run_once().await;

        assert!(outcome.is_failure());
        assert_eq!(
            BackoffPolicy::default().next_delay(&outcome),
            Duration::from_secs(60)
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_skips_only_that_message() {
        let events = Events::default();
        let mut mailbox = FakeMailbox::new(&events, vec![message("2", "Hiring now", "Rust role")]);
        mailbox.order.insert(0, "gone".into());
        let agent = agent(mailbox, false, AlertConfig::default());

        let report = completed(agent.run_once().await);

        assert_eq!(report.candidates, 2);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(events.lock().unwrap().last().unwrap(), "mark_read:2");
    }

    #[tokio::test]
    async fn mark_read_failure_does_not_fail_iteration() {
        let events = Events::default();
        let mut mailbox = FakeMailbox::new(&events, vec![message("3", "Career fair", "Booth 4")]);
        mailbox.mark_error = true;
        let agent = agent(mailbox, false, AlertConfig::default());

        let report = completed(agent.run_once().await);

        assert_eq!(report.notified, 1);
        assert_eq!(report.marked_read, 0);
    }

    #[tokio::test]
    async fn max_results_caps_candidates() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(
            &events,
            vec![
                message("a", "Job 1", ""),
                message("b", "Job 2", ""),
                message("c", "Job 3", ""),
            ],
        );
        let config = AlertConfig {
            max_results: 2,
            ..Default::default()
        };
        let agent = agent(mailbox, false, config);

        let report = completed(agent.run_once().await);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.notified, 2);
    }

    #[tokio::test]
    async fn empty_mailbox_completes() {
        let events = Events::default();
        let mailbox = FakeMailbox::new(&events, vec![]);
        let agent = agent(mailbox, false, AlertConfig::default());

        let outcome = agent.run_once().await;
        assert_eq!(
            BackoffPolicy::default().next_delay(&outcome),
            Duration::from_secs(86_400)
        );
        assert_eq!(completed(outcome), IterationReport::default());
    }

    #[test]
    fn backoff_follows_config() {
        let config = AlertConfig {
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(2),
            ..Default::default()
        };
        let policy = BackoffPolicy::from_config(&config);
        let ok = IterationOutcome::Completed(IterationReport::default());
        let failed = IterationOutcome::Failed(MailboxError::Protocol("x".into()).into());
        assert_eq!(policy.next_delay(&ok), Duration::from_secs(10));
        assert_eq!(policy.next_delay(&failed), Duration::from_secs(2));
    }
}

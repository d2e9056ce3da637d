//! Keyword relevance filter: decides whether a message looks job-related.
//!
//! Runs locally after the mailbox's own server-side search, so a loose
//! server query can't push unrelated mail into the summarizer.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Default job-domain keywords. Matched as case-insensitive substrings.
pub const DEFAULT_JOB_KEYWORDS: &[&str] = &[
    "job",
    "career",
    "position",
    "vacancy",
    "hiring",
    "opportunity",
    "recruitment",
    "opening",
    "employment",
    "role",
    "apply",
    "interview",
    "job posting",
    "job description",
    "work",
];

static DEFAULT_CLASSIFIER: LazyLock<JobClassifier> = LazyLock::new(JobClassifier::default_keywords);

/// Case-insensitive keyword matcher over subject + body.
#[derive(Debug, Clone)]
pub struct JobClassifier {
    keywords: Vec<String>,
    /// `None` when the keyword list is empty (nothing matches).
    regex: Option<Regex>,
}

impl JobClassifier {
    /// Classifier over [`DEFAULT_JOB_KEYWORDS`].
    pub fn default_keywords() -> Self {
        Self::with_keywords(DEFAULT_JOB_KEYWORDS.iter().copied())
    }

    /// Classifier over a custom keyword list. Blank entries are dropped.
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let regex = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            // Escaped literals only, so this cannot fail short of the size limit
            RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
                .ok()
        };

        Self { keywords, regex }
    }

    /// Keywords this classifier matches on.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// True if any keyword occurs anywhere in `subject + " " + body`.
    pub fn is_job_related(&self, subject: &str, body: &str) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };
        let text = format!("{subject} {body}");
        match regex.find(&text) {
            Some(m) => {
                debug!(keyword = %m.as_str(), "Message matched job keyword");
                true
            }
            None => false,
        }
    }
}

impl Default for JobClassifier {
    fn default() -> Self {
        Self::default_keywords()
    }
}

/// [`JobClassifier::is_job_related`] over the default keyword list.
pub fn is_job_related(subject: &str, body: &str) -> bool {
    DEFAULT_CLASSIFIER.is_job_related(subject, body)
}

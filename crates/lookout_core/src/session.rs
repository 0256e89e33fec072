use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ScrapeConfig;

pub type SessionId = String;

/// Lifecycle status of a crawl job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
    Stopped,
    Interrupted,
}

impl SessionStatus {
    /// Terminal statuses can be reached at most once per session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::Stopped
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Progress counters for one crawl job.
///
/// Counters only ever grow; `merge_max` is the single merge policy so that
/// duplicated or out-of-order updates can never move a value backwards.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub pages_scraped: u64,
    pub urls_found: u64,
    pub external_urls_found: u64,
    pub content_downloaded: u64,
    pub percent_complete: f64,
}

impl Progress {
    pub fn merge_max(&mut self, other: &Progress) {
        self.pages_scraped = self.pages_scraped.max(other.pages_scraped);
        self.urls_found = self.urls_found.max(other.urls_found);
        self.external_urls_found = self.external_urls_found.max(other.external_urls_found);
        self.content_downloaded = self.content_downloaded.max(other.content_downloaded);
        self.percent_complete = self.percent_complete.max(other.percent_complete);
    }
}

/// A partial progress report, as delivered by a `status_update` frame.
///
/// Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<SessionStatus>,
    pub pages_scraped: Option<u64>,
    pub urls_found: Option<u64>,
    pub external_urls_found: Option<u64>,
    pub content_downloaded: Option<u64>,
    pub percent_complete: Option<f64>,
    pub current_url: Option<String>,
    pub checkpoint_at: Option<DateTime<Utc>>,
}

/// One crawl job and its locally known state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub domain: String,
    pub target_url: String,
    pub status: SessionStatus,
    pub progress: Progress,
    /// URL the crawler is currently fetching. Non-monotonic by nature.
    pub current_url: Option<String>,
    pub last_error: Option<String>,
    /// Set while a config submission is awaiting backend acknowledgement.
    pub submission_pending: bool,
    pub started_at: DateTime<Utc>,
    pub checkpoint_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            domain: String::new(),
            target_url: String::new(),
            status: SessionStatus::Running,
            progress: Progress::default(),
            current_url: None,
            last_error: None,
            submission_pending: false,
            started_at,
            checkpoint_at: None,
            ended_at: None,
        }
    }
}

/// Immutable record of a session that reached a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSessionSnapshot {
    pub id: SessionId,
    pub domain: String,
    pub target_url: String,
    pub status: SessionStatus,
    pub progress: Progress,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Recovery-time view of a job that was interrupted by a previous
/// page or connection loss. Discarded once resumed or dismissed.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptedSession {
    pub id: SessionId,
    pub domain: String,
    pub target_url: String,
    pub config: ScrapeConfig,
    /// Last progress checkpoint the backend can resume from.
    pub checkpoint: Progress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Extracts the host part of a URL, or an empty string if it has none.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(ToOwned::to_owned))
        .unwrap_or_default()
}

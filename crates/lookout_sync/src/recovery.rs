use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sync_logging::{sync_debug, sync_info, sync_warn};

use lookout_core::{
    domain_of, InterruptedSession, Progress, ScrapeConfig, SessionId, SessionStore,
};

use crate::connection::ConnectionManager;
use crate::settings::SyncSettings;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend rejected the request with status {0}")]
    Rejected(u16),
    #[error("invalid backend payload: {0}")]
    InvalidPayload(String),
}

/// Result of a resume attempt. The partial outcome is distinct so the user
/// can tell a broken job from a broken live link.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The backend resumed the job and the live channel is up.
    Resumed,
    /// The backend resumed the job but the live channel has not come up;
    /// the connection manager keeps retrying in the background.
    ResumedConnectPending,
    /// A resume for this id is already in flight.
    AlreadyResuming,
    /// The job could not be resumed.
    Failed(RecoveryError),
}

/// Discovers interrupted jobs and re-attaches a live connection to them.
pub struct RecoveryService {
    settings: SyncSettings,
    client: reqwest::Client,
    store: Arc<Mutex<SessionStore>>,
    in_flight: Mutex<HashSet<SessionId>>,
}

/// Raw listing record as returned by the backend; every field except the id
/// may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawSessionRecord {
    id: String,
    domain: Option<String>,
    status: Option<String>,
    config: Option<ScrapeConfig>,
    progress: Option<Progress>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl RecoveryService {
    pub fn new(settings: SyncSettings, store: Arc<Mutex<SessionStore>>) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Lists backend sessions that were interrupted without a live
    /// connection, with defaults filled in for missing fields.
    pub async fn list_interrupted(&self) -> Result<Vec<InterruptedSession>, RecoveryError> {
        let response = self
            .client
            .get(self.settings.interrupted_url())
            .send()
            .await
            .map_err(|err| RecoveryError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RecoveryError::Rejected(status.as_u16()));
        }
        let records: Vec<RawSessionRecord> = response
            .json()
            .await
            .map_err(|err| RecoveryError::InvalidPayload(err.to_string()))?;

        let sessions = records
            .into_iter()
            .filter(|record| {
                // The backend filters terminal sessions already; drop any
                // that slip through.
                !matches!(
                    record.status.as_deref(),
                    Some("completed") | Some("stopped") | Some("error")
                )
            })
            .map(map_record)
            .collect();
        Ok(sessions)
    }

    /// Resumes one interrupted job, then re-attaches the live channel.
    ///
    /// Serialized per id: a second call while one is in flight is rejected
    /// with `AlreadyResuming` instead of starting a duplicate.
    pub async fn resume(&self, session_id: &str, manager: &ConnectionManager) -> ResumeOutcome {
        {
            let mut in_flight = self.in_flight.lock().expect("lock in-flight set");
            if !in_flight.insert(session_id.to_string()) {
                sync_debug!("resume already in flight for {}", session_id);
                return ResumeOutcome::AlreadyResuming;
            }
        }
        let outcome = self.resume_inner(session_id, manager).await;
        self.in_flight
            .lock()
            .expect("lock in-flight set")
            .remove(session_id);
        outcome
    }

    async fn resume_inner(&self, session_id: &str, manager: &ConnectionManager) -> ResumeOutcome {
        let response = match self
            .client
            .post(self.settings.resume_url(session_id))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return ResumeOutcome::Failed(RecoveryError::Request(err.to_string())),
        };
        let status = response.status();
        if !status.is_success() {
            sync_warn!("backend refused to resume {}: status {}", session_id, status);
            return ResumeOutcome::Failed(RecoveryError::Rejected(status.as_u16()));
        }
        let mut record: RawSessionRecord = match response.json().await {
            Ok(record) => record,
            Err(err) => {
                return ResumeOutcome::Failed(RecoveryError::InvalidPayload(err.to_string()))
            }
        };
        if record.id.is_empty() {
            record.id = session_id.to_string();
        }

        let interrupted = map_record(record);
        self.store
            .lock()
            .expect("lock session store")
            .hydrate_from_resume(&interrupted);
        sync_info!(
            "resumed session {} from checkpoint at {} pages",
            session_id,
            interrupted.checkpoint.pages_scraped
        );

        manager.connect(session_id);
        if manager
            .wait_until_connected(self.settings.connect_timeout)
            .await
        {
            ResumeOutcome::Resumed
        } else {
            sync_warn!(
                "resume for {} succeeded but the live channel is still down",
                session_id
            );
            ResumeOutcome::ResumedConnectPending
        }
    }
}

fn map_record(record: RawSessionRecord) -> InterruptedSession {
    let config = record.config.unwrap_or_default();
    let domain = record
        .domain
        .filter(|domain| !domain.is_empty())
        .unwrap_or_else(|| domain_of(&config.target_url));
    let now = Utc::now();
    let created_at = record.created_at.or(record.updated_at).unwrap_or(now);
    let updated_at = record.updated_at.unwrap_or(created_at);
    InterruptedSession {
        id: record.id,
        domain,
        target_url: config.target_url.clone(),
        config,
        checkpoint: record.progress.unwrap_or_default(),
        created_at,
        updated_at,
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::view_model::{SessionRowView, StoreViewModel};
use crate::{
    domain_of, CompletedSessionSnapshot, InterruptedSession, Session, SessionStatus, StatusUpdate,
};

/// Canonical per-id snapshot of every known crawl job.
///
/// The store has exactly one logical writer path per id at a time: the
/// message router for live updates, the recovery service for the initial
/// hydrate. Everything else reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStore {
    sessions: BTreeMap<String, Session>,
    history: Vec<CompletedSessionSnapshot>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn history(&self) -> &[CompletedSessionSnapshot] {
        &self.history
    }

    pub fn view(&self) -> StoreViewModel {
        StoreViewModel {
            live: self.sessions.values().map(SessionRowView::from).collect(),
            completed: self.history.len(),
        }
    }

    /// Applies a `status_update` to the session, creating it if this is the
    /// first frame seen for the id.
    ///
    /// Counters merge by taking the maximum of existing vs. incoming value,
    /// so stale or duplicated frames can never regress progress. The
    /// currently-fetched URL is overwritten unconditionally. Updates for an
    /// already-finalized id are ignored.
    pub fn apply_status(&mut self, id: &str, update: StatusUpdate, received_at: DateTime<Utc>) -> bool {
        if self.is_finalized(id) {
            return false;
        }

        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string(), received_at));

        if let Some(pages) = update.pages_scraped {
            session.progress.pages_scraped = session.progress.pages_scraped.max(pages);
        }
        if let Some(urls) = update.urls_found {
            session.progress.urls_found = session.progress.urls_found.max(urls);
        }
        if let Some(external) = update.external_urls_found {
            session.progress.external_urls_found =
                session.progress.external_urls_found.max(external);
        }
        if let Some(items) = update.content_downloaded {
            session.progress.content_downloaded = session.progress.content_downloaded.max(items);
        }
        if let Some(percent) = update.percent_complete {
            session.progress.percent_complete = session.progress.percent_complete.max(percent);
        }
        if update.current_url.is_some() {
            session.current_url = update.current_url;
        }
        if let Some(checkpoint) = update.checkpoint_at {
            session.checkpoint_at = Some(session.checkpoint_at.map_or(checkpoint, |existing| {
                existing.max(checkpoint)
            }));
        }
        // Terminal statuses only enter through `finalize`/`mark_error`.
        if let Some(status) = update.status {
            if !status.is_terminal() {
                session.status = status;
            }
        }
        true
    }

    /// Moves the session to a terminal status and appends it to history.
    ///
    /// Idempotent: returns `true` only for the call that performed the
    /// transition, so a frame delivered twice produces one history entry.
    pub fn finalize(&mut self, id: &str, status: SessionStatus, ended_at: DateTime<Utc>) -> bool {
        debug_assert!(status.is_terminal());
        if self.is_finalized(id) {
            return false;
        }

        let snapshot = match self.sessions.remove(id) {
            Some(session) => CompletedSessionSnapshot {
                id: session.id,
                domain: session.domain,
                target_url: session.target_url,
                status,
                progress: session.progress,
                last_error: session.last_error,
                started_at: session.started_at,
                ended_at,
            },
            // Completion for a session this process never observed live.
            None => CompletedSessionSnapshot {
                id: id.to_string(),
                domain: String::new(),
                target_url: String::new(),
                status,
                progress: Default::default(),
                last_error: None,
                started_at: ended_at,
                ended_at,
            },
        };
        self.history.push(snapshot);
        true
    }

    /// Marks the session errored, clears the pending-submission flag and
    /// retires it. Idempotent like `finalize`.
    pub fn mark_error(&mut self, id: &str, message: &str, ended_at: DateTime<Utc>) -> bool {
        if self.is_finalized(id) {
            return false;
        }
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_error = Some(message.to_string());
            session.submission_pending = false;
        }
        let first = self.finalize(id, SessionStatus::Error, ended_at);
        if first {
            if let Some(snapshot) = self.history.last_mut() {
                if snapshot.last_error.is_none() {
                    snapshot.last_error = Some(message.to_string());
                }
            }
        }
        first
    }

    /// Seeds a session from the backend's last known checkpoint.
    ///
    /// Counters start from the checkpoint rather than zero, and a counter
    /// that is already higher locally is never regressed (a stale listing
    /// racing a fresher live frame must lose).
    pub fn hydrate_from_resume(&mut self, interrupted: &InterruptedSession) -> bool {
        if self.is_finalized(&interrupted.id) {
            return false;
        }

        match self.sessions.get_mut(&interrupted.id) {
            Some(session) => {
                session.progress.merge_max(&interrupted.checkpoint);
                session.status = SessionStatus::Running;
                if session.domain.is_empty() {
                    session.domain = interrupted.domain.clone();
                }
                if session.target_url.is_empty() {
                    session.target_url = interrupted.target_url.clone();
                }
            }
            None => {
                let mut session =
                    Session::new(interrupted.id.clone(), interrupted.created_at);
                session.domain = if interrupted.domain.is_empty() {
                    domain_of(&interrupted.target_url)
                } else {
                    interrupted.domain.clone()
                };
                session.target_url = interrupted.target_url.clone();
                session.progress = interrupted.checkpoint;
                session.checkpoint_at = Some(interrupted.updated_at);
                self.sessions.insert(interrupted.id.clone(), session);
            }
        }
        true
    }

    pub fn set_submission_pending(&mut self, id: &str, pending: bool) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.submission_pending = pending;
        }
    }

    fn is_finalized(&self, id: &str) -> bool {
        self.history.iter().any(|snapshot| snapshot.id == id)
    }
}

use crate::{Session, SessionId, SessionStatus};

/// Read-only summary of the store for display layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreViewModel {
    pub live: Vec<SessionRowView>,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRowView {
    pub id: SessionId,
    pub domain: String,
    pub status: SessionStatus,
    pub pages_scraped: u64,
    pub urls_found: u64,
    pub content_downloaded: u64,
    pub percent_complete: f64,
    pub current_url: Option<String>,
}

impl From<&Session> for SessionRowView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            domain: session.domain.clone(),
            status: session.status,
            pages_scraped: session.progress.pages_scraped,
            urls_found: session.progress.urls_found,
            content_downloaded: session.progress.content_downloaded,
            percent_complete: session.progress.percent_complete,
            current_url: session.current_url.clone(),
        }
    }
}

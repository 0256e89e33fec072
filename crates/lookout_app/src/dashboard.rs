use std::sync::{Arc, Mutex};
use std::time::Duration;

use sync_logging::{sync_error, sync_info, sync_warn};
use tokio::sync::mpsc;

use lookout_core::SessionStore;
use lookout_sync::{ConnectionManager, ConnectionState, SyncNotification};

/// Renders store snapshots once a second and relays notifications until the
/// session finishes, the connection gives up, or the user quits.
pub async fn observe(
    session_id: &str,
    store: &Arc<Mutex<SessionStore>>,
    mut notifications: mpsc::UnboundedReceiver<SyncNotification>,
    manager: &ConnectionManager,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut state_rx = manager.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                sync_info!("stopping at user request");
                return;
            }
            maybe = notifications.recv() => {
                if let Some(notification) = maybe {
                    report(&notification);
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                if state_rx.borrow().state == ConnectionState::Error {
                    sync_error!("connection gave up; rerun to reconnect");
                    return;
                }
            }
            _ = ticker.tick() => {
                if render(session_id, store) {
                    return;
                }
            }
        }
    }
}

/// Prints the current row for the session. Returns true once it is found in
/// history, i.e. the job is done.
fn render(session_id: &str, store: &Arc<Mutex<SessionStore>>) -> bool {
    let store = store.lock().expect("lock session store");
    if let Some(session) = store.get(session_id) {
        println!(
            "[{}] {}  {:>5.1}%  {} pages, {} urls, {} items  {}",
            session.status,
            session.domain,
            session.progress.percent_complete,
            session.progress.pages_scraped,
            session.progress.urls_found,
            session.progress.content_downloaded,
            session.current_url.as_deref().unwrap_or("-")
        );
        return false;
    }
    if let Some(done) = store.history().iter().find(|s| s.id == session_id) {
        println!(
            "session {} finished with status {} after {} pages",
            session_id, done.status, done.progress.pages_scraped
        );
        let view = store.view();
        println!(
            "{} live session(s), {} completed this run",
            view.live.len(),
            view.completed
        );
        return true;
    }
    false
}

fn report(notification: &SyncNotification) {
    match notification {
        SyncNotification::Lifecycle { state, attempt } => match state {
            ConnectionState::Reconnecting => {
                sync_warn!("reconnecting (attempt {})", attempt);
            }
            state => sync_info!("connection {}", state),
        },
        SyncNotification::ChannelEstablished { session_id } => {
            sync_info!("live channel bound to {}", session_id);
        }
        SyncNotification::SessionCompleted { session_id } => {
            sync_info!("session {} completed", session_id);
        }
        SyncNotification::SessionFailed { message, .. } => {
            sync_warn!("job failed: {}", message);
        }
        SyncNotification::ContentDownloaded { url, .. } => {
            sync_info!("downloaded {}", url);
        }
    }
}

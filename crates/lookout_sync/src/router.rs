use std::sync::{Arc, Mutex};

use chrono::Utc;
use sync_logging::{sync_debug, sync_info, sync_warn};

use lookout_core::{SessionStatus, SessionStore};

use crate::notify::{NotificationSink, SyncNotification};
use crate::protocol::{decode_frame, InboundEvent, ProtocolError};

/// Applies inbound frames to the session store.
///
/// The router is the only live-update writer of the store. Decode failures
/// never close the channel: unknown or malformed frames are logged and
/// dropped.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<Mutex<SessionStore>>,
    sink: Arc<dyn NotificationSink>,
}

impl MessageRouter {
    pub fn new(store: Arc<Mutex<SessionStore>>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    pub fn route(&self, raw: &str) {
        match decode_frame(raw) {
            Ok(event) => self.apply(event),
            // Unknown kinds are expected from newer backends; stay quiet.
            Err(err @ ProtocolError::UnknownKind(_)) => {
                sync_debug!("dropping frame: {}", err);
            }
            Err(err) => {
                sync_warn!("dropping frame: {}", err);
            }
        }
    }

    pub fn apply(&self, event: InboundEvent) {
        let now = Utc::now();
        match event {
            InboundEvent::ConnectionEstablished { session_id } => {
                sync_info!("channel bound to session {}", session_id);
                self.sink
                    .notify(SyncNotification::ChannelEstablished { session_id });
            }
            InboundEvent::StatusUpdate { session_id, data } => {
                self.lock_store()
                    .apply_status(&session_id, data.into(), now);
            }
            InboundEvent::ScrapeComplete { session_id, data } => {
                let first = {
                    let mut store = self.lock_store();
                    if let Some(data) = data {
                        store.apply_status(&session_id, data.into(), now);
                    }
                    store.finalize(&session_id, SessionStatus::Completed, now)
                };
                if first {
                    sync_info!("session {} completed", session_id);
                    self.sink
                        .notify(SyncNotification::SessionCompleted { session_id });
                } else {
                    sync_debug!("duplicate completion for session {}", session_id);
                }
            }
            InboundEvent::Error {
                session_id,
                message,
            } => {
                let first = match &session_id {
                    Some(id) => self.lock_store().mark_error(id, &message, now),
                    None => true,
                };
                if first {
                    sync_warn!("backend reported failure: {}", message);
                    self.sink.notify(SyncNotification::SessionFailed {
                        session_id,
                        message,
                    });
                }
            }
            InboundEvent::ContentDownloaded { session_id, data } => {
                // The confirmed session snapshot is the authority on the
                // content list; only relay the event.
                self.sink.notify(SyncNotification::ContentDownloaded {
                    session_id,
                    url: data.url,
                    content_type: data.content_type,
                    size_bytes: data.size_bytes,
                });
            }
        }
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, SessionStore> {
        self.store.lock().expect("lock session store")
    }
}

use lookout_core::SessionId;
use tokio::sync::mpsc;

use crate::types::ConnectionState;

/// Human-facing status emitted by the sync subsystem. Errors are absorbed
/// into these notifications rather than returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    Lifecycle {
        state: ConnectionState,
        attempt: u32,
    },
    ChannelEstablished {
        session_id: SessionId,
    },
    SessionCompleted {
        session_id: SessionId,
    },
    SessionFailed {
        session_id: Option<SessionId>,
        message: String,
    },
    ContentDownloaded {
        session_id: SessionId,
        url: String,
        content_type: Option<String>,
        size_bytes: Option<u64>,
    },
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: SyncNotification);
}

/// Sink that forwards notifications into a tokio channel for the
/// application's display loop.
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<SyncNotification>,
}

impl ChannelNotificationSink {
    pub fn new(tx: mpsc::UnboundedSender<SyncNotification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn notify(&self, notification: SyncNotification) {
        let _ = self.tx.send(notification);
    }
}

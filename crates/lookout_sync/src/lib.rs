//! Lookout sync: connection state machine, frame routing and job recovery.
mod backoff;
mod connection;
mod notify;
mod protocol;
mod recovery;
mod router;
mod settings;
mod transport;
mod types;

pub use backoff::delay_for_attempt;
pub use connection::ConnectionManager;
pub use notify::{ChannelNotificationSink, NotificationSink, SyncNotification};
pub use protocol::{
    decode_frame, encode_frame, ContentData, InboundEvent, OutboundFrame, ProtocolError,
    StatusData,
};
pub use recovery::{RecoveryError, RecoveryService, ResumeOutcome};
pub use router::MessageRouter;
pub use settings::SyncSettings;
pub use transport::{Transport, TransportChannel, TransportError, WsTransport};
pub use types::{ConnectionSnapshot, ConnectionState};

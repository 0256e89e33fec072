use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lookout_core::{ScrapeConfig, SessionId, SessionStatus, StatusUpdate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(String),
    #[error("frame has no `type` discriminator")]
    MissingKind,
    #[error("unknown frame type `{0}`")]
    UnknownKind(String),
    #[error("invalid `{kind}` payload: {message}")]
    InvalidPayload { kind: String, message: String },
    #[error("failed to encode outbound frame: {0}")]
    Encode(String),
}

/// Backend push frame, decoded by its `type` discriminator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    ConnectionEstablished {
        session_id: SessionId,
    },
    StatusUpdate {
        session_id: SessionId,
        data: StatusData,
    },
    ContentDownloaded {
        session_id: SessionId,
        data: ContentData,
    },
    ScrapeComplete {
        session_id: SessionId,
        /// Final counter snapshot; optional on the wire.
        #[serde(default)]
        data: Option<StatusData>,
    },
    Error {
        #[serde(default)]
        session_id: Option<SessionId>,
        message: String,
    },
}

/// Payload of a `status_update` (or final `scrape_complete`) frame.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct StatusData {
    pub status: Option<SessionStatus>,
    pub pages_scraped: Option<u64>,
    pub urls_found: Option<u64>,
    pub external_urls_found: Option<u64>,
    pub content_downloaded: Option<u64>,
    pub percent_complete: Option<f64>,
    pub current_url: Option<String>,
    pub checkpoint_at: Option<DateTime<Utc>>,
}

impl From<StatusData> for StatusUpdate {
    fn from(data: StatusData) -> Self {
        StatusUpdate {
            status: data.status,
            pages_scraped: data.pages_scraped,
            urls_found: data.urls_found,
            external_urls_found: data.external_urls_found,
            content_downloaded: data.content_downloaded,
            percent_complete: data.percent_complete,
            current_url: data.current_url,
            checkpoint_at: data.checkpoint_at,
        }
    }
}

/// Payload of a `content_downloaded` frame. Relayed as a notification only;
/// the authoritative content list comes from a confirmed session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ContentData {
    pub url: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<u64>,
}

const KNOWN_KINDS: [&str; 5] = [
    "connection_established",
    "status_update",
    "content_downloaded",
    "scrape_complete",
    "error",
];

/// Decodes one inbound frame.
///
/// An unrecognized `type` is reported as `UnknownKind` so the router can
/// drop it without treating the frame as corrupt.
pub fn decode_frame(raw: &str) -> Result<InboundEvent, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingKind)?;
    if !KNOWN_KINDS.contains(&kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }
    let kind = kind.to_string();
    serde_json::from_value(value).map_err(|err| ProtocolError::InvalidPayload {
        kind,
        message: err.to_string(),
    })
}

/// Client-to-backend frame sent over the persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    StartScrape {
        session_id: SessionId,
        config: ScrapeConfig,
    },
    StopScrape {
        session_id: SessionId,
    },
}

pub fn encode_frame(frame: &OutboundFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|err| ProtocolError::Encode(err.to_string()))
}

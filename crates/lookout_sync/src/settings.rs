use std::time::Duration;

/// Configuration for the sync subsystem, injected at construction so tests
/// can run isolated instances against local fakes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Base URL for request/response endpoints, e.g. `http://host/api`.
    pub rest_base: String,
    /// Base URL for the persistent channel, e.g. `ws://host`.
    pub channel_base: String,
    pub max_reconnect_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub connect_timeout: Duration,
    /// Outbound frames queued while disconnected; oldest dropped when full.
    pub outbound_queue_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rest_base: "http://127.0.0.1:8080/api".to_string(),
            channel_base: "ws://127.0.0.1:8080".to_string(),
            max_reconnect_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            connect_timeout: Duration::from_secs(10),
            outbound_queue_limit: 64,
        }
    }
}

impl SyncSettings {
    pub fn channel_url(&self, session_id: &str) -> String {
        format!(
            "{}/ws/sessions/{}",
            self.channel_base.trim_end_matches('/'),
            session_id
        )
    }

    pub fn interrupted_url(&self) -> String {
        format!("{}/sessions/interrupted", self.rest_base.trim_end_matches('/'))
    }

    pub fn resume_url(&self, session_id: &str) -> String {
        format!(
            "{}/sessions/{}/resume",
            self.rest_base.trim_end_matches('/'),
            session_id
        )
    }
}

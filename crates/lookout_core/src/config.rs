use serde::{Deserialize, Serialize};

/// Scrape configuration submitted to the backend when a job starts or
/// resumes. Mirrors the outbound channel payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub target_url: String,
    pub max_pages: u32,
    pub request_delay_ms: u64,
    pub user_agent: String,
    pub include_external: bool,
    pub whole_site: bool,
    pub download_content: bool,
    pub content_types: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            max_pages: 100,
            request_delay_ms: 500,
            user_agent: "lookout/0.1".to_string(),
            include_external: false,
            whole_site: false,
            download_content: true,
            content_types: vec!["image".to_string(), "document".to_string()],
        }
    }
}

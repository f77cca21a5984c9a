use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address of the REST API, including the `/api` prefix.
    pub api_base_url: String,
    /// Address of the chat hub WebSocket endpoint.
    pub hub_url: String,
    /// Settle window after a fresh hub connect before room operations.
    /// Empirical stabilization delay, kept configurable on purpose.
    pub settle_delay_ms: u64,
    /// Page size for message history fetches.
    pub history_page_size: i64,
    pub log_level: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "https://localhost:43960/api".to_string()),
            hub_url: env::var("CHAT_HUB_URL")
                .unwrap_or_else(|_| "wss://localhost:43960/chatHub".to_string()),
            settle_delay_ms: env::var("HUB_SETTLE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            history_page_size: env::var("HISTORY_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

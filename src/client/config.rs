use std::env;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub heartbeat_interval_secs: u64,
    pub notification_poll_secs: u64,
    pub search_debounce_ms: u64,
    pub impersonation_window_secs: u64,
    pub log_level: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_base_url: env::var("LABLINK_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string()),
            heartbeat_interval_secs: env::var("LABLINK_HEARTBEAT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            notification_poll_secs: env::var("LABLINK_NOTIFICATION_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            search_debounce_ms: env::var("LABLINK_SEARCH_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            impersonation_window_secs: env::var("LABLINK_IMPERSONATION_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

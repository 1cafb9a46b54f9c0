use serde::{Deserialize, Serialize};

/// One registered remote bot. Persisted in bots.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Sent verbatim as the `key` query parameter.
    #[serde(rename = "secretKey")]
    pub secret_key: String,
}

/// Top-level settings file (no secrets). Stored as config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_secs: u64,
    /// 0 disables the explicit request timeout.
    pub request_timeout_secs: u64,
    pub usage_window_days: usize,
    pub payments_window_days: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            request_timeout_secs: 10,
            usage_window_days: 7,
            payments_window_days: 30,
        }
    }
}

use std::fmt;

use thiserror::Error;

use crate::metrics::Snapshot;

const METRICS_PATH: &str = "/api/admin/metrics";

/// Why a single fetch failed. All variants are retried on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("bot responded with HTTP {0}")]
    HttpStatus(u16),
    #[error("response was not valid JSON: {0}")]
    Parse(String),
}

impl FetchError {
    /// Short classification: `network`, `http_status:<code>` or `parse`.
    pub fn kind(&self) -> String {
        match self {
            FetchError::Network(_) => "network".to_string(),
            FetchError::HttpStatus(code) => format!("http_status:{}", code),
            FetchError::Parse(_) => "parse".to_string(),
        }
    }
}

/// The `(url, key)` pair a poll session runs against.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    base_url: String,
    key: String,
}

impl Endpoint {
    pub fn new(base_url: &str, key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            key: key.to_string(),
        }
    }

    /// No bot selected.
    pub fn is_empty(&self) -> bool {
        self.base_url.is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/api/admin/metrics?key={key}` with one trailing slash dropped
    /// from the base. The key travels in the query string, in the clear over
    /// plain http.
    pub fn metrics_url(&self) -> String {
        let base = self.base_url.strip_suffix('/').unwrap_or(&self.base_url);
        format!(
            "{}{}?key={}",
            base,
            METRICS_PATH,
            urlencoding::encode(&self.key)
        )
    }
}

// Keeps the secret out of logs and panics.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Issues one GET against the metrics endpoint.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    endpoint: &Endpoint,
) -> Result<Snapshot, FetchError> {
    let response = client
        .get(endpoint.metrics_url())
        .send()
        .await
        .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

    Ok(Snapshot::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_url_strips_one_trailing_slash() {
        let endpoint = Endpoint::new("https://bot.example.com/", "abc");
        assert_eq!(
            endpoint.metrics_url(),
            "https://bot.example.com/api/admin/metrics?key=abc"
        );

        let endpoint = Endpoint::new("http://10.0.0.5:8080/prefix", "abc");
        assert_eq!(
            endpoint.metrics_url(),
            "http://10.0.0.5:8080/prefix/api/admin/metrics?key=abc"
        );
    }

    #[test]
    fn metrics_url_escapes_query_metacharacters_in_key() {
        let endpoint = Endpoint::new("http://x", "a&b=c#d");
        assert_eq!(
            endpoint.metrics_url(),
            "http://x/api/admin/metrics?key=a%26b%3Dc%23d"
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(FetchError::Network("refused".into()).kind(), "network");
        assert_eq!(FetchError::HttpStatus(403).kind(), "http_status:403");
        assert_eq!(FetchError::Parse("eof".into()).kind(), "parse");
    }

    #[test]
    fn debug_output_redacts_key() {
        let endpoint = Endpoint::new("http://x", "hunter2");
        let rendered = format!("{:?}", endpoint);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("http://x"));
    }

    #[test]
    fn empty_url_means_no_bot() {
        assert!(Endpoint::new("", "k").is_empty());
        assert!(!Endpoint::new("http://x", "").is_empty());
    }
}

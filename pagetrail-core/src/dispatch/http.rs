//! HTTP sink for an analytics server
//!
//! Posts each batch as JSON to `{server_url}{events_path}`
//! (`/api/analytics/events` unless configured otherwise).

use async_trait::async_trait;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use crate::types::Batch;

use super::sink::Sink;

/// HTTP client for the analytics server
pub struct HttpSink {
    config: SinkConfig,
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    /// Create a sink from configuration
    ///
    /// Returns an error if `server_url` is missing or a header value is invalid.
    pub fn new(config: SinkConfig) -> Result<Self> {
        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("sink.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let endpoint = format!("{}/{}", base_url, config.events_path.trim_start_matches('/'));

        Ok(Self {
            config,
            http_client,
            endpoint,
        })
    }

    /// Full URL batches are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one batch, without retries
    pub async fn send(&self, batch: &Batch) -> Result<()> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::Sink(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(Error::Sink(format!("API error ({}): {}", status, error_text)))
    }

    /// Send with retries for transient failures (5xx, timeouts)
    ///
    /// Retries are off by default: a batch that reached a non-idempotent
    /// server before a timeout would be counted twice.
    pub async fn send_with_retry(&self, batch: &Batch) -> Result<()> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying batch delivery (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.send(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if is_retryable_error(&e) => {
                    tracing::warn!("Transient error delivering batch: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Sink("max retries exceeded".to_string())))
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, batch: &Batch) -> Result<()> {
        self.send_with_retry(batch).await
    }
}

/// Check if an error is retryable (transient)
fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Sink(msg) => {
            msg.contains("API error (5")
                || msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("request failed")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkKind;

    fn http_config(server_url: &str) -> SinkConfig {
        SinkConfig {
            kind: SinkKind::Http,
            server_url: Some(server_url.to_string()),
            timeout_secs: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_sink_requires_server_url() {
        let config = SinkConfig {
            kind: SinkKind::Http,
            ..Default::default()
        };
        assert!(HttpSink::new(config).is_err());
    }

    #[test]
    fn test_endpoint_joins_trailing_slash() {
        let sink = HttpSink::new(http_config("https://analytics.example.com/")).unwrap();
        assert_eq!(
            sink.endpoint(),
            "https://analytics.example.com/api/analytics/events"
        );
    }

    #[test]
    fn test_endpoint_uses_configured_path() {
        let mut config = http_config("https://analytics.example.com");
        config.events_path = "/api/analytics/visit".to_string();
        let sink = HttpSink::new(config).unwrap();
        assert_eq!(
            sink.endpoint(),
            "https://analytics.example.com/api/analytics/visit"
        );
    }

    #[test]
    fn test_invalid_api_key_rejected() {
        let mut config = http_config("https://analytics.example.com");
        config.api_key = Some("bad\nkey".to_string());
        assert!(matches!(HttpSink::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Sink(
            "API error (503 Service Unavailable): down".to_string()
        )));
        assert!(is_retryable_error(&Error::Sink(
            "HTTP request failed: connection refused".to_string()
        )));
        assert!(!is_retryable_error(&Error::Sink(
            "API error (400 Bad Request): bad".to_string()
        )));
        assert!(!is_retryable_error(&Error::Config("x".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_sink_error() {
        // Port 9 (discard) on loopback is not expected to accept connections
        let sink = HttpSink::new(http_config("http://127.0.0.1:9")).unwrap();
        let batch = Batch {
            session_id: "s".to_string(),
            user_id: "u".to_string(),
            events: Vec::new(),
            conversions: Vec::new(),
            timestamp: 0,
            url: "http://localhost/".to_string(),
        };
        assert!(matches!(sink.deliver(&batch).await, Err(Error::Sink(_))));
    }
}

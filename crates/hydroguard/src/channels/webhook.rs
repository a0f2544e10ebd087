//! HTTP webhook channel.
//!
//! POSTs a JSON payload to a REST endpoint, such as a chat bot bridge or a
//! peer messaging relay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hydro_alerts::{
    AlertError, AlertKind, AlertLevel, AlertMessage, ChannelAdapter, ChannelFuture, ChannelOutcome,
    Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const fn default_timeout_secs() -> u64 {
    10
}

/// Settings of a webhook channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Endpoint receiving the POST.
    pub url: String,
    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub token: Option<String>,
    /// Endpoint answering GET when the service is up. No check when absent.
    #[serde(default)]
    pub probe_url: Option<String>,
    /// Request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// JSON body posted for each alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload<'a> {
    /// Ready-to-send text.
    pub text: &'a str,
    /// Alert level.
    pub level: AlertLevel,
    /// Dashboard colour of the level.
    pub level_color: &'static str,
    /// Water level reading.
    pub reading: f64,
    /// Event id.
    pub id: &'a str,
    /// When the message was composed.
    pub timestamp: DateTime<Utc>,
    /// Why the alert was sent.
    pub kind: AlertKind,
}

impl<'a> WebhookPayload<'a> {
    /// Builds the payload for a message.
    #[must_use]
    pub fn from_message(message: &'a AlertMessage) -> Self {
        Self {
            text: &message.text,
            level: message.level,
            level_color: message.level.color(),
            reading: message.reading,
            id: &message.event_id,
            timestamp: message.timestamp,
            kind: message.kind,
        }
    }
}

/// A channel that POSTs alerts to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    settings: WebhookSettings,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Creates a webhook channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if a URL is not http(s), the
    /// timeout is zero, or the HTTP client cannot be built.
    pub fn new(name: impl Into<String>, settings: WebhookSettings) -> Result<Self> {
        let name = name.into();
        validate_url(&name, &settings.url)?;
        if let Some(probe_url) = &settings.probe_url {
            validate_url(&name, probe_url)?;
        }
        if settings.timeout_secs == 0 {
            return Err(AlertError::InvalidConfig {
                reason: format!("channel '{name}': timeout_secs must be positive"),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AlertError::InvalidConfig {
                reason: format!("channel '{name}': failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            name,
            settings,
            client,
        })
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &WebhookSettings {
        &self.settings
    }
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(AlertError::InvalidConfig {
            reason: format!("channel '{name}': url must start with http:// or https://, got '{url}'"),
        })
    }
}

impl ChannelAdapter for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, message: &'a AlertMessage) -> ChannelFuture<'a, ChannelOutcome> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(&self.settings.url)
                .json(&WebhookPayload::from_message(message));
            if let Some(token) = &self.settings.token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(channel = %self.name, id = %message.short_id(), status = %response.status(), "webhook delivered");
                    ChannelOutcome::Delivered
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(channel = %self.name, status = %status, "webhook rejected alert");
                    ChannelOutcome::failure(format!("HTTP {status}"))
                }
                Err(e) => {
                    warn!(channel = %self.name, error = %e, "webhook request failed");
                    ChannelOutcome::failure(e.to_string())
                }
            }
        })
    }

    fn probe(&self) -> ChannelFuture<'_, bool> {
        Box::pin(async move {
            let Some(url) = &self.settings.probe_url else {
                return true;
            };
            match self.client.get(url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!(channel = %self.name, error = %e, "webhook probe failed");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_alerts::AlertEvent;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn message() -> AlertMessage {
        let event = AlertEvent::new(
            AlertKind::Transition,
            AlertLevel::Danger,
            AlertLevel::Critical,
            295.0,
            0.0,
        );
        AlertMessage::from_event(&event)
    }

    fn settings(url: &str) -> WebhookSettings {
        WebhookSettings {
            url: url.to_string(),
            token: None,
            probe_url: None,
            timeout_secs: 5,
        }
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Accepts one HTTP request, answers with `status`, and returns the raw request.
    async fn serve_once(status: u16) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response =
                format!("HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            request
        });
        (format!("http://{addr}/v1/alerts"), handle)
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn rejects_non_http_url() {
            assert!(WebhookChannel::new("chat", settings("ftp://example.org")).is_err());
        }

        #[test]
        fn rejects_bad_probe_url() {
            let mut settings = settings("http://127.0.0.1:7000/");
            settings.probe_url = Some("127.0.0.1:7000/health".to_string());
            assert!(WebhookChannel::new("chat", settings).is_err());
        }

        #[test]
        fn settings_defaults() {
            let parsed: WebhookSettings =
                serde_json::from_value(serde_json::json!({ "url": "https://relay.local/send" }))
                    .unwrap();
            assert_eq!(parsed.token, None);
            assert_eq!(parsed.timeout_secs, 10);
        }
    }

    mod payload_tests {
        use super::*;

        #[test]
        fn payload_fields() {
            let message = message();
            let json = serde_json::to_value(WebhookPayload::from_message(&message)).unwrap();
            assert_eq!(json["level"], "CRITICAL");
            assert_eq!(json["level_color"], "#ef4444");
            assert_eq!(json["kind"], "transition");
            assert_eq!(json["reading"], 295.0);
            assert_eq!(json["id"], message.event_id.as_str());
            assert!(json["text"].as_str().unwrap().starts_with("FLOOD ALERT [CRITICAL]"));
            assert!(json["timestamp"].is_string());
        }
    }

    mod send_tests {
        use super::*;

        #[tokio::test]
        async fn posts_json_with_bearer_token() {
            let (url, server) = serve_once(200).await;
            let mut settings = settings(&url);
            settings.token = Some("s3cret".to_string());
            let channel = WebhookChannel::new("chat", settings).unwrap();

            let outcome = channel.send(&message()).await;
            assert!(outcome.is_delivered());

            let request = server.await.unwrap();
            let lower = request.to_lowercase();
            assert!(request.starts_with("POST /v1/alerts"));
            assert!(lower.contains("authorization: bearer s3cret"));
            assert!(lower.contains("content-type: application/json"));

            let body = request.split("\r\n\r\n").nth(1).unwrap();
            let json: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(json["level"], "CRITICAL");
        }

        #[tokio::test]
        async fn error_status_is_failure() {
            let (url, server) = serve_once(503).await;
            let channel = WebhookChannel::new("chat", settings(&url)).unwrap();

            let outcome = channel.send(&message()).await;
            assert!(outcome.reason().is_some_and(|r| r.contains("503")));
            server.await.unwrap();
        }

        #[tokio::test]
        async fn unreachable_endpoint_is_failure() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let channel =
                WebhookChannel::new("chat", settings(&format!("http://{addr}/"))).unwrap();
            assert!(!channel.send(&message()).await.is_delivered());
        }
    }

    mod probe_tests {
        use super::*;

        #[tokio::test]
        async fn without_probe_url_is_available() {
            let channel = WebhookChannel::new("chat", settings("http://127.0.0.1:1/")).unwrap();
            assert!(channel.probe().await);
        }

        #[tokio::test]
        async fn probe_url_is_checked() {
            let (url, server) = serve_once(200).await;
            let mut settings = settings("http://127.0.0.1:1/");
            settings.probe_url = Some(url);
            let channel = WebhookChannel::new("chat", settings).unwrap();

            assert!(channel.probe().await);
            assert!(server.await.unwrap().starts_with("GET /v1/alerts"));
        }
    }
}

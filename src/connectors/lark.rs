//! Alert delivery.
//!
//! [`NotificationSink`] delivers a rendered alert message. [`LarkNotifier`]
//! posts it to a Lark (Feishu) custom-bot webhook.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Environment variable holding the webhook URL.
pub const LARK_WEBHOOK_ENV: &str = "LARK_WEBHOOK_URL";

/// Delivery attempts per message, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt; doubles afterwards.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers alert text to operators.
///
/// Implementations own their retry policy. Callers never retry on top of it:
/// `false` means the message was dropped.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn send(&self, text: &str) -> bool;
}

#[derive(Debug, Serialize)]
struct LarkTextMessage<'a> {
    msg_type: &'static str,
    content: LarkTextContent<'a>,
}

#[derive(Debug, Serialize)]
struct LarkTextContent<'a> {
    text: &'a str,
}

impl<'a> LarkTextMessage<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            msg_type: "text",
            content: LarkTextContent { text },
        }
    }
}

/// Lark answers 200 with a non-zero `code` for rejected payloads.
#[derive(Debug, Deserialize)]
struct LarkResponse {
    #[serde(default, alias = "StatusCode")]
    code: i64,
    #[serde(default, alias = "StatusMessage")]
    msg: String,
}

/// Outcome of a single webhook attempt.
#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Delivered,
    Retryable(String),
    Rejected(String),
}

/// Returns true for statuses worth retrying (server-side failures).
fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Lark custom-bot webhook client.
#[derive(Clone)]
pub struct LarkNotifier {
    client: Client,
    webhook_url: Option<String>,
    initial_backoff: Duration,
}

impl LarkNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build webhook HTTP client, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            webhook_url: webhook_url.filter(|url| !url.trim().is_empty()),
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    /// Reads the webhook URL from `LARK_WEBHOOK_URL`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(LARK_WEBHOOK_ENV).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn attempt(&self, url: &str, text: &str) -> Attempt {
        let response = match self
            .client
            .post(url)
            .json(&LarkTextMessage::new(text))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Retryable(e.to_string()),
        };

        let status = response.status();
        if is_retryable(status) {
            return Attempt::Retryable(format!("HTTP {}", status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Attempt::Rejected(format!("HTTP {}: {}", status, body));
        }

        match response.json::<LarkResponse>().await {
            Ok(body) if body.code != 0 => {
                Attempt::Rejected(format!("code {}: {}", body.code, body.msg))
            }
            _ => Attempt::Delivered,
        }
    }
}

#[async_trait]
impl NotificationSink for LarkNotifier {
    async fn send(&self, text: &str) -> bool {
        let Some(url) = self.webhook_url.as_deref() else {
            warn!("{} is not set, dropping notification: {}", LARK_WEBHOOK_ENV, text);
            return false;
        };

        let mut backoff = self.initial_backoff;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(url, text).await {
                Attempt::Delivered => {
                    info!("Notification sent: {}", text);
                    return true;
                }
                Attempt::Rejected(reason) => {
                    error!("Notification rejected, not retrying: {}", reason);
                    return false;
                }
                Attempt::Retryable(reason) => {
                    warn!(
                        "Notification attempt {}/{} failed: {}",
                        attempt, MAX_ATTEMPTS, reason
                    );
                    if attempt < MAX_ATTEMPTS {
                        debug!("Retrying notification in {}ms", backoff.as_millis());
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        error!("Failed to send Lark notification after {} attempts", MAX_ATTEMPTS);
        false
    }
}

impl std::fmt::Debug for LarkNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarkNotifier")
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_value(LarkTextMessage::new("hello")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"msg_type": "text", "content": {"text": "hello"}})
        );
    }

    #[test]
    fn test_only_server_errors_retry() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_drops_message() {
        let notifier = LarkNotifier::new(None);
        assert!(!notifier.is_configured());
        assert!(!notifier.send("test").await);
    }

    #[test]
    fn test_blank_url_is_unconfigured() {
        assert!(!LarkNotifier::new(Some("  ".to_string())).is_configured());
    }

    #[test]
    fn test_debug_redacts_url() {
        let notifier = LarkNotifier::new(Some("https://open.larksuite.com/hook/secret".to_string()));
        let debug = format!("{:?}", notifier);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

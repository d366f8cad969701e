//! Messaging gateway: outbound delivery and inbound event polling.
//!
//! WhatsApp traffic flows through an HTTP sidecar on port 3001. Outbound
//! sends go through the [`MessagingGateway`] trait so conversation logic can
//! be tested without a live bridge; inbound messages arrive via an HTTP
//! long-polling listener that feeds an mpsc channel.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default port the messaging bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts in milliseconds.
const HEALTH_CHECK_DELAY_MS: u64 = 2000;

/// Errors from the messaging gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge is not running or not connected to the messaging network.
    #[error("messaging bridge not running")]
    BridgeNotRunning,

    /// The bridge rejected the send.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Connection status reported by the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayStatus {
    /// Whether the bridge is connected to the messaging network.
    pub connected: bool,

    /// The account handle linked, if connected.
    pub phone_number: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
}

/// An incoming event from the messaging bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// A new message was received (or sent by us from another device).
    #[serde(rename = "message")]
    Message {
        /// Contact handle (phone number) of the conversation.
        contact: String,
        /// Message text content.
        text: String,
        /// Bridge-assigned message identifier.
        message_id: Option<String>,
        /// Whether this message was sent by us.
        from_me: bool,
    },
    /// Messaging connection established.
    #[serde(rename = "connected")]
    Connected,
    /// Messaging connection lost.
    #[serde(rename = "disconnected")]
    Disconnected {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
}

/// Abstraction over the outbound messaging channel.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a plain text message to the given contact handle.
    async fn send_text(&self, contact: &str, text: &str) -> Result<(), GatewayError>;

    /// Send a document by URL with an accompanying caption.
    async fn send_document(
        &self,
        contact: &str,
        document_url: &str,
        caption: &str,
    ) -> Result<(), GatewayError>;
}

/// Gateway backed by the HTTP bridge sidecar.
pub struct HttpMessagingGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMessagingGateway {
    /// Create a new gateway pointing at the given base URL.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self { client, base_url }
    }

    /// Create a gateway connecting to `http://127.0.0.1:{port}`.
    pub fn with_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{port}"))
    }

    /// Check whether the bridge is reachable and connected.
    pub async fn health_check(&self) -> Result<bool, GatewayError> {
        let url = format!("{}/status", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: BridgeResponse<GatewayStatus> = resp.json().await?;
                Ok(body.data.is_some_and(|s| s.connected))
            }
            Ok(_) => Ok(false),
            Err(_) => Ok(false),
        }
    }

    /// Wait for the bridge to become healthy, retrying with a fixed delay.
    pub async fn wait_healthy(&self) -> Result<(), GatewayError> {
        for attempt in 0..HEALTH_CHECK_RETRIES {
            if self.health_check().await.unwrap_or(false) {
                return Ok(());
            }
            if attempt < HEALTH_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(std::time::Duration::from_millis(HEALTH_CHECK_DELAY_MS)).await;
            }
        }
        Err(GatewayError::BridgeNotRunning)
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MessagingGateway for HttpMessagingGateway {
    async fn send_text(&self, contact: &str, text: &str) -> Result<(), GatewayError> {
        let url = format!("{}/send", self.base_url);
        let body = serde_json::json!({ "contact": contact, "text": text });
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "gateway send failed: {body_text}");
            return Err(GatewayError::SendFailed(format!("send returned {status}")));
        }
        debug!(contact, "message sent via gateway");
        Ok(())
    }

    async fn send_document(
        &self,
        contact: &str,
        document_url: &str,
        caption: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/send-document", self.base_url);
        let body = serde_json::json!({
            "contact": contact,
            "url": document_url,
            "caption": caption,
        });
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "gateway document send failed: {body_text}");
            return Err(GatewayError::SendFailed(format!(
                "send-document returned {status}"
            )));
        }
        debug!(contact, "document sent via gateway");
        Ok(())
    }
}

/// Spawn an event listener that forwards bridge events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task and
/// reconnects automatically on disconnect with exponential backoff.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<GatewayEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{base_url}/events/poll");
        let mut backoff_ms: u64 = 1000;

        loop {
            info!(url = %poll_url, "connecting to gateway event stream");

            match poll_events(&poll_url, &event_tx).await {
                Ok(()) => {
                    info!("gateway event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "gateway event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll the bridge for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<GatewayEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(events) = resp.json::<Vec<GatewayEvent>>().await {
                    for event in events {
                        debug!(?event, "received gateway event");
                        if event_tx.send(event).await.is_err() {
                            // Receiver dropped, shut down cleanly.
                            return Ok(());
                        }
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Normal: long-poll timeout expired, just retry immediately.
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}

//! External calendar integration via an HTTP sidecar.
//!
//! Meeting events live in an external calendar reached through a small HTTP
//! bridge. The [`CalendarProvider`] trait keeps the rest of the crate
//! independent of the transport so scheduling logic can be tested against
//! in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default port the calendar bridge listens on.
pub const DEFAULT_BRIDGE_PORT: u16 = 3002;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts in milliseconds.
const HEALTH_CHECK_DELAY_MS: u64 = 2000;

/// Errors from the calendar integration.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar is not running or not reachable.
    #[error("calendar bridge not running")]
    BridgeNotRunning,

    /// The bridge rejected the operation.
    #[error("calendar operation failed: {0}")]
    OperationFailed(String),
}

/// Request to create an event in the external calendar.
#[derive(Debug, Clone, Serialize)]
pub struct EventRequest {
    /// Event title shown in the calendar.
    pub summary: String,

    /// Longer free-text description.
    pub description: String,

    /// Event start in UTC.
    pub start: DateTime<Utc>,

    /// Event end in UTC.
    pub end: DateTime<Utc>,

    /// Invitee e-mail address, when known.
    pub attendee_email: Option<String>,

    /// Invitee display name, when known.
    pub attendee_name: Option<String>,
}

/// Identifiers returned after creating an event.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedEvent {
    /// Provider-assigned event identifier.
    pub event_id: String,

    /// Video-conference link attached to the event, if any.
    pub meeting_url: Option<String>,
}

/// An event as reported by the external calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider-assigned event identifier.
    pub id: String,

    /// Event title.
    pub summary: String,

    /// Event start in UTC.
    pub start: DateTime<Utc>,

    /// Event end in UTC.
    pub end: DateTime<Utc>,

    /// Whether this is an all-day entry rather than a timed meeting.
    #[serde(default)]
    pub all_day: bool,

    /// Whether the event has been cancelled on the provider side.
    #[serde(default)]
    pub cancelled: bool,

    /// Attendee e-mail addresses.
    #[serde(default)]
    pub attendees: Vec<String>,

    /// Video-conference link attached to the event, if any.
    pub meeting_url: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Abstraction over the external calendar backend.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Create an event and return its provider identifiers.
    async fn create_event(&self, request: &EventRequest) -> Result<CreatedEvent, CalendarError>;

    /// List events whose start falls within `[from, to)`.
    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;

    /// Delete an event by its provider identifier.
    ///
    /// Deleting an already-deleted event is not an error.
    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;
}

/// Calendar provider backed by the HTTP bridge sidecar.
pub struct HttpCalendarProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCalendarProvider {
    /// Create a new provider pointing at the given base URL.
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

    /// Create a provider connecting to `http://127.0.0.1:{port}`.
    pub fn with_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{port}"))
    }

    /// Check whether the bridge is reachable.
    pub async fn health_check(&self) -> Result<bool, CalendarError> {
        let url = format!("{}/status", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(_) => Ok(false),
            Err(_) => Ok(false),
        }
    }

    /// Wait for the bridge to become healthy, retrying with a fixed delay.
    pub async fn wait_healthy(&self) -> Result<(), CalendarError> {
        for attempt in 0..HEALTH_CHECK_RETRIES {
            if self.health_check().await.unwrap_or(false) {
                return Ok(());
            }
            if attempt < HEALTH_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(std::time::Duration::from_millis(HEALTH_CHECK_DELAY_MS)).await;
            }
        }
        Err(CalendarError::BridgeNotRunning)
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarProvider {
    async fn create_event(&self, request: &EventRequest) -> Result<CreatedEvent, CalendarError> {
        let url = format!("{}/events", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "calendar event creation failed: {body_text}");
            return Err(CalendarError::OperationFailed(format!(
                "create returned {status}"
            )));
        }
        let body: BridgeResponse<CreatedEvent> = resp.json().await?;
        let created = body.data.ok_or_else(|| {
            CalendarError::OperationFailed(
                body.error.unwrap_or_else(|| "no event data returned".to_owned()),
            )
        })?;
        debug!(event_id = %created.event_id, "calendar event created");
        Ok(created)
    }

    async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let url = format!(
            "{}/events?from={}&to={}",
            self.base_url,
            from.to_rfc3339(),
            to.to_rfc3339()
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(CalendarError::OperationFailed(format!(
                "list returned {}",
                resp.status()
            )));
        }
        let body: BridgeResponse<Vec<CalendarEvent>> = resp.json().await?;
        Ok(body.data.unwrap_or_default())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        let url = format!("{}/events/{event_id}", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Already gone on the provider side; treat as success.
            debug!(event_id, "calendar event already absent on delete");
            return Ok(());
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "calendar event deletion failed: {body_text}");
            return Err(CalendarError::OperationFailed(format!(
                "delete returned {status}"
            )));
        }
        debug!(event_id, "calendar event deleted");
        Ok(())
    }
}

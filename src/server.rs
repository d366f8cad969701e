//! Inbound HTTP surface: the message endpoint the web chat widget posts to
//! and a health probe.
//!
//! WhatsApp traffic does not come through here; it arrives via the gateway
//! event listener and is fed to the same [`Orchestrator`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::agent::{Orchestrator, PipelineError, TurnRequest};
use crate::store::{Channel, Store};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Turn pipeline entry point.
    pub orchestrator: Arc<Orchestrator>,
    /// Store handle for the health probe.
    pub store: Arc<Store>,
}

/// Inbound message payload.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    /// Channel name, `whatsapp` or `webchat`.
    pub channel: String,
    /// Contact handle (phone number). Web chat may omit this and send
    /// `visitor_id` instead.
    #[serde(default)]
    pub contact_handle: Option<String>,
    /// The message text.
    pub message_text: String,
    /// Caller-side message identifier, logged only.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Session id of an existing conversation.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Web chat visitor identifier, used as the contact handle when no
    /// phone number exists yet.
    #[serde(default)]
    pub visitor_id: Option<String>,
}

/// Successful turn response.
#[derive(Debug, Serialize)]
pub struct TurnReply {
    /// Always `true` on this shape.
    pub success: bool,
    /// Reply text; empty when the contact is blocked.
    pub response_text: String,
    /// Wall-clock turn time.
    pub duration_ms: u64,
    /// Detected intent label.
    pub intent: String,
    /// Detected sentiment label.
    pub sentiment: String,
}

/// Error response shape.
#[derive(Debug, Serialize)]
pub struct ErrorReply {
    /// Always `false` on this shape.
    pub success: bool,
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthReply {
    /// `ready` or `degraded`.
    pub status: &'static str,
    /// Database check outcome.
    pub database: &'static str,
    /// RFC 3339 timestamp of the check.
    pub checked_at: String,
}

/// Build the router with all routes attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(handle_message))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the router until the shutdown signal flips.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(
    host: &str,
    port: u16,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let address = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            // Either a flipped flag or a dropped sender ends the server.
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn handle_message(
    State(state): State<AppState>,
    Json(payload): Json<InboundMessage>,
) -> Result<Json<TurnReply>, (StatusCode, Json<ErrorReply>)> {
    let Ok(channel) = Channel::parse(&payload.channel) else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "unknown_channel",
            format!("unknown channel: {}", payload.channel),
        ));
    };

    let contact_handle = payload
        .contact_handle
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .or(payload.visitor_id.as_deref())
        .map(str::trim)
        .unwrap_or_default()
        .to_owned();
    if contact_handle.is_empty() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "missing_contact",
            "contact_handle or visitor_id is required".to_owned(),
        ));
    }
    if payload.message_text.trim().is_empty() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "message_text must not be empty".to_owned(),
        ));
    }

    if let Some(message_id) = &payload.message_id {
        tracing::debug!(message_id = %message_id, channel = %channel, "inbound message");
    }

    let request = TurnRequest {
        channel,
        contact_handle,
        message_text: payload.message_text,
        conversation_id: payload.conversation_id,
    };

    match state.orchestrator.handle_turn(request).await {
        Ok(outcome) => Ok(Json(TurnReply {
            success: true,
            response_text: outcome.reply.unwrap_or_default(),
            duration_ms: outcome.duration_ms,
            intent: outcome.intent.to_owned(),
            sentiment: outcome.sentiment.to_owned(),
        })),
        Err(PipelineError::RateLimited) => Err(reject(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "message volume ceiling reached, retry later".to_owned(),
        )),
        Err(PipelineError::DeadlineExceeded) => Err(reject(
            StatusCode::GATEWAY_TIMEOUT,
            "deadline_exceeded",
            "the turn did not complete in time".to_owned(),
        )),
        Err(e @ PipelineError::Store(_)) => {
            error!(error = %e, "turn failed");
            Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "the message could not be processed".to_owned(),
            ))
        }
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReply>) {
    let database_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.store.pool())
        .await
        .is_ok();
    if !database_ok {
        warn!("health probe: database unreachable");
    }

    let reply = HealthReply {
        status: if database_ok { "ready" } else { "degraded" },
        database: if database_ok { "ready" } else { "unreachable" },
        checked_at: Utc::now().to_rfc3339(),
    };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(reply))
}

fn reject(code: StatusCode, error: &str, detail: String) -> (StatusCode, Json<ErrorReply>) {
    (
        code,
        Json(ErrorReply {
            success: false,
            error: error.to_owned(),
            detail,
        }),
    )
}

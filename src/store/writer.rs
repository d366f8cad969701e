//! Background writer task for best-effort persistence.
//!
//! Message history, derived conversation context, and audit trails are
//! recorded through a single mpsc-fed task. Failures are logged and dropped;
//! they must never fail the turn that produced them. Funneling appends
//! through one task also keeps per-conversation message order stable.

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, trace};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A queued best-effort write.
#[derive(Debug)]
pub enum WriteOp {
    /// Append one message to a conversation's history.
    AppendMessage {
        /// Conversation the message belongs to.
        conversation_id: i64,
        /// Stable role string (`user` or `assistant`).
        role: &'static str,
        /// Stable channel string.
        channel: &'static str,
        /// Message body.
        content: String,
    },
    /// Replace the derived context columns of a conversation.
    UpdateDerivedContext {
        /// Conversation to update.
        conversation_id: i64,
        /// Current topic, if detected.
        topic: Option<String>,
        /// Sentiment of the latest inbound message.
        sentiment: Option<String>,
        /// Inferred communication preference.
        preference: Option<String>,
        /// JSON array of objections raised so far.
        objections: String,
        /// JSON array of questions the contact asked.
        questions_asked: String,
        /// JSON array of facts the contact disclosed.
        disclosed: String,
        /// JSON snapshot of the qualification state.
        bant_snapshot: Option<String>,
    },
    /// Record one tool invocation with its outcome and latency.
    LogToolExecution {
        /// Tool name as exposed to the model.
        tool_name: String,
        /// JSON-encoded arguments.
        arguments: String,
        /// Natural-language result summary.
        result: String,
        /// Whether the tool reported success.
        success: bool,
        /// Wall-clock latency in milliseconds.
        latency_ms: i64,
        /// Lead in context, when resolved.
        lead_id: Option<i64>,
        /// Conversation in context, when resolved.
        conversation_id: Option<i64>,
    },
    /// Record a business or security event.
    LogActivity {
        /// Lead the event concerns, when known.
        lead_id: Option<i64>,
        /// Short machine-friendly kind (`stage_change`, `security`, ...).
        kind: String,
        /// Human-readable description.
        description: String,
    },
}

// ---------------------------------------------------------------------------
// Writer loop
// ---------------------------------------------------------------------------

/// Consumes write operations until all senders are dropped.
pub async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        trace!(?op, "store write");
        if let Err(err) = handle_op(&db, op).await {
            error!(error = %err, "best-effort store write failed");
        }
    }
    trace!("store writer stopped");
}

async fn handle_op(db: &SqlitePool, op: WriteOp) -> Result<(), sqlx::Error> {
    match op {
        WriteOp::AppendMessage {
            conversation_id,
            role,
            channel,
            content,
        } => {
            sqlx::query(
                "INSERT INTO messages (conversation_id, role, content, channel) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(conversation_id)
            .bind(role)
            .bind(content)
            .bind(channel)
            .execute(db)
            .await?;
            sqlx::query("UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1")
                .bind(conversation_id)
                .execute(db)
                .await?;
        }
        WriteOp::UpdateDerivedContext {
            conversation_id,
            topic,
            sentiment,
            preference,
            objections,
            questions_asked,
            disclosed,
            bant_snapshot,
        } => {
            sqlx::query(
                "UPDATE conversations SET topic = ?2, sentiment = ?3, preference = ?4, \
                 objections = ?5, questions_asked = ?6, disclosed = ?7, bant_snapshot = ?8, \
                 updated_at = datetime('now') WHERE id = ?1",
            )
            .bind(conversation_id)
            .bind(topic)
            .bind(sentiment)
            .bind(preference)
            .bind(objections)
            .bind(questions_asked)
            .bind(disclosed)
            .bind(bant_snapshot)
            .execute(db)
            .await?;
        }
        WriteOp::LogToolExecution {
            tool_name,
            arguments,
            result,
            success,
            latency_ms,
            lead_id,
            conversation_id,
        } => {
            sqlx::query(
                "INSERT INTO tool_execution_log \
                 (tool_name, arguments, result, success, latency_ms, lead_id, conversation_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(tool_name)
            .bind(arguments)
            .bind(result)
            .bind(success)
            .bind(latency_ms)
            .bind(lead_id)
            .bind(conversation_id)
            .execute(db)
            .await?;
        }
        WriteOp::LogActivity {
            lead_id,
            kind,
            description,
        } => {
            sqlx::query(
                "INSERT INTO activity_log (lead_id, kind, description) VALUES (?1, ?2, ?3)",
            )
            .bind(lead_id)
            .bind(kind)
            .bind(description)
            .execute(db)
            .await?;
        }
    }
    Ok(())
}

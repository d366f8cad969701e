//! Conversations and their message history.
//!
//! One conversation exists per (lead, channel) pair. Message appends and
//! derived-context updates go through the background writer; a failure there
//! costs history, never a reply.

use tracing::debug;
use uuid::Uuid;

use super::writer::WriteOp;
use super::{Channel, MessageRole, Store, StoreError, MAX_CONTENT_SIZE};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A conversation thread between the agent and one lead on one channel.
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Row id.
    pub id: i64,
    /// Opaque session identifier exposed to channel frontends.
    pub session_id: String,
    /// Owning lead.
    pub lead_id: i64,
    /// Channel the thread lives on.
    pub channel: Channel,
    /// Current topic, when detected.
    pub topic: Option<String>,
    /// Sentiment of the latest inbound message.
    pub sentiment: Option<String>,
    /// Inferred communication preference.
    pub preference: Option<String>,
    /// Objections raised so far.
    pub objections: Vec<String>,
    /// Questions the contact asked.
    pub questions_asked: Vec<String>,
    /// Facts the contact disclosed.
    pub disclosed: Vec<String>,
    /// JSON snapshot of the qualification state at last update.
    pub bant_snapshot: Option<serde_json::Value>,
    /// Timestamp of the last mutation (UTC, database format).
    pub updated_at: String,
}

/// A single stored message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Row id.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: i64,
    /// Who authored it.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Creation timestamp (UTC, database format).
    pub created_at: String,
}

/// Derived context fields recomputed after each turn.
#[derive(Debug, Clone, Default)]
pub struct DerivedContext {
    /// Current topic.
    pub topic: Option<String>,
    /// Sentiment label of the latest inbound message.
    pub sentiment: Option<String>,
    /// Communication preference.
    pub preference: Option<String>,
    /// Objections raised so far.
    pub objections: Vec<String>,
    /// Questions the contact asked.
    pub questions_asked: Vec<String>,
    /// Facts the contact disclosed.
    pub disclosed: Vec<String>,
    /// Snapshot of the qualification state.
    pub bant_snapshot: Option<serde_json::Value>,
}

type ConversationRow = (
    i64,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    Option<String>,
    String,
);

const CONVERSATION_COLUMNS: &str = "id, session_id, lead_id, channel, topic, sentiment, \
     preference, objections, questions_asked, disclosed, bant_snapshot, updated_at";

impl Conversation {
    fn from_row(row: ConversationRow) -> Result<Self, StoreError> {
        let bant_snapshot = row
            .10
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Self {
            id: row.0,
            session_id: row.1,
            lead_id: row.2,
            channel: Channel::parse(&row.3)?,
            topic: row.4,
            sentiment: row.5,
            preference: row.6,
            objections: serde_json::from_str(&row.7)?,
            questions_asked: serde_json::from_str(&row.8)?,
            disclosed: serde_json::from_str(&row.9)?,
            bant_snapshot,
            updated_at: row.11,
        })
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Store {
    /// Finds the conversation for a (lead, channel) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_conversation(
        &self,
        lead_id: i64,
        channel: Channel,
    ) -> Result<Option<Conversation>, StoreError> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE lead_id = ?1 AND channel = ?2"
        ))
        .bind(lead_id)
        .bind(channel.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(Conversation::from_row).transpose()
    }

    /// Finds a conversation by its opaque session identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_conversation_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE session_id = ?1"
        ))
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Conversation::from_row).transpose()
    }

    /// Returns the existing conversation for a (lead, channel) pair or
    /// creates a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_or_create_conversation(
        &self,
        lead_id: i64,
        channel: Channel,
    ) -> Result<Conversation, StoreError> {
        if let Some(existing) = self.find_conversation(lead_id, channel).await? {
            return Ok(existing);
        }
        let session_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO conversations (session_id, lead_id, channel) VALUES (?1, ?2, ?3) \
             ON CONFLICT (lead_id, channel) DO NOTHING",
        )
        .bind(&session_id)
        .bind(lead_id)
        .bind(channel.as_str())
        .execute(self.pool())
        .await?;
        debug!(lead_id, channel = channel.as_str(), "conversation ready");
        self.find_conversation(lead_id, channel)
            .await?
            .ok_or_else(|| StoreError::InvalidEnum {
                field: "conversation",
                value: format!("{lead_id}/{}", channel.as_str()),
            })
    }

    /// Loads the most recent messages of a conversation in chronological
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<(i64, i64, String, String, String)> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, created_at FROM messages \
             WHERE conversation_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        let mut messages = rows
            .into_iter()
            .map(|(id, conversation_id, role, content, created_at)| {
                Ok(StoredMessage {
                    id,
                    conversation_id,
                    role: MessageRole::parse(&role)?,
                    content,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Timestamp of the newest message in a conversation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn last_message_at(
        &self,
        conversation_id: i64,
    ) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM messages WHERE conversation_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Queues a message append for the background writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContentTooLarge`] for oversized bodies and
    /// [`StoreError::WriterClosed`] when the writer is gone.
    pub fn append_message(
        &self,
        conversation_id: i64,
        role: MessageRole,
        channel: Channel,
        content: &str,
    ) -> Result<(), StoreError> {
        if content.len() > MAX_CONTENT_SIZE {
            return Err(StoreError::ContentTooLarge {
                size: content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }
        self.enqueue(WriteOp::AppendMessage {
            conversation_id,
            role: role.as_str(),
            channel: channel.as_str(),
            content: content.to_string(),
        })
    }

    /// Queues a derived-context update for the background writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] when a context list cannot be serialized
    /// and [`StoreError::WriterClosed`] when the writer is gone.
    pub fn update_derived_context(
        &self,
        conversation_id: i64,
        context: &DerivedContext,
    ) -> Result<(), StoreError> {
        let bant_snapshot = context
            .bant_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.enqueue(WriteOp::UpdateDerivedContext {
            conversation_id,
            topic: context.topic.clone(),
            sentiment: context.sentiment.clone(),
            preference: context.preference.clone(),
            objections: serde_json::to_string(&context.objections)?,
            questions_asked: serde_json::to_string(&context.questions_asked)?,
            disclosed: serde_json::to_string(&context.disclosed)?,
            bant_snapshot,
        })
    }
}

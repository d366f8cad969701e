//! Scheduled follow-up nudges.

use super::{FunnelStage, Store, StoreError};

/// A scheduled follow-up message.
#[derive(Debug, Clone)]
pub struct FollowUp {
    /// Row id.
    pub id: i64,
    /// Lead to nudge.
    pub lead_id: i64,
    /// When to send, `YYYY-MM-DDTHH:MM:SS`.
    pub send_at: String,
    /// Rendered message body.
    pub message: String,
    /// Funnel stage at scheduling time.
    pub stage: FunnelStage,
    /// Whether it has been dispatched.
    pub sent: bool,
    /// Whether it was called off before dispatch.
    pub cancelled: bool,
}

type FollowUpRow = (i64, i64, String, String, String, i64, i64);

impl FollowUp {
    fn from_row(row: FollowUpRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.0,
            lead_id: row.1,
            send_at: row.2,
            message: row.3,
            stage: FunnelStage::parse(&row.4)?,
            sent: row.5 != 0,
            cancelled: row.6 != 0,
        })
    }
}

const FOLLOW_UP_COLUMNS: &str = "id, lead_id, send_at, message, stage, sent, cancelled";

impl Store {
    /// Whether the lead already has a follow-up waiting to be sent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn pending_follow_up_exists(&self, lead_id: i64) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM follow_ups \
             WHERE lead_id = ?1 AND sent = 0 AND cancelled = 0",
        )
        .bind(lead_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0 > 0)
    }

    /// Schedules a follow-up message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the insert fails.
    pub async fn schedule_follow_up(
        &self,
        lead_id: i64,
        send_at: &str,
        message: &str,
        stage: FunnelStage,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO follow_ups (lead_id, send_at, message, stage) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(lead_id)
        .bind(send_at)
        .bind(message)
        .bind(stage.as_str())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Loads follow-ups whose send time has arrived, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn due_follow_ups(&self, now: &str, limit: u32) -> Result<Vec<FollowUp>, StoreError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups \
             WHERE sent = 0 AND cancelled = 0 AND send_at <= ?1 \
             ORDER BY send_at LIMIT ?2"
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(FollowUp::from_row).collect()
    }

    /// Marks a follow-up as dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn mark_follow_up_sent(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE follow_ups SET sent = 1, sent_at = datetime('now') \
             WHERE id = ?1 AND sent = 0 AND cancelled = 0",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cancels every unsent follow-up for a lead, e.g. once a meeting is on
    /// the books. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn cancel_pending_follow_ups(&self, lead_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE follow_ups SET cancelled = 1 \
             WHERE lead_id = ?1 AND sent = 0 AND cancelled = 0",
        )
        .bind(lead_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

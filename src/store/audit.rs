//! Audit trails and the contact block list.
//!
//! The engine only ever writes the audit tables; they exist for operators
//! and offline analysis.

use std::time::Duration;

use super::writer::WriteOp;
use super::{Store, StoreError};

impl Store {
    /// Queues a tool invocation record for the background writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriterClosed`] when the writer is gone.
    pub fn log_tool_execution(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        result: &str,
        success: bool,
        latency: Duration,
        lead_id: Option<i64>,
        conversation_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let latency_ms = i64::try_from(latency.as_millis()).unwrap_or(i64::MAX);
        self.enqueue(WriteOp::LogToolExecution {
            tool_name: tool_name.to_string(),
            arguments: arguments.to_string(),
            result: result.to_string(),
            success,
            latency_ms,
            lead_id,
            conversation_id,
        })
    }

    /// Queues a business or security event for the background writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriterClosed`] when the writer is gone.
    pub fn log_activity(
        &self,
        lead_id: Option<i64>,
        kind: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        self.enqueue(WriteOp::LogActivity {
            lead_id,
            kind: kind.to_string(),
            description: description.to_string(),
        })
    }

    /// Whether a contact handle is on the block list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn is_contact_blocked(&self, phone: &str) -> Result<bool, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blocked_contacts WHERE phone = ?1")
            .bind(phone)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0 > 0)
    }

    /// Adds a contact handle to the block list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the insert fails.
    pub async fn block_contact(&self, phone: &str, reason: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO blocked_contacts (phone, reason) VALUES (?1, ?2)",
        )
        .bind(phone)
        .bind(reason)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

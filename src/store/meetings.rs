//! Meetings booked for leads.
//!
//! `scheduled_at` is stored as `YYYY-MM-DDTHH:MM:SS` text. The partial unique
//! index on (lead_id, scheduled_at) over active statuses backs the
//! duplicate-booking guarantee; see `idx_meetings_active_unique`.

use tracing::debug;

use super::{MeetingStatus, Store, StoreError};

/// A booked meeting.
#[derive(Debug, Clone)]
pub struct Meeting {
    /// Row id.
    pub id: i64,
    /// Owning lead.
    pub lead_id: i64,
    /// Start time, `YYYY-MM-DDTHH:MM:SS`.
    pub scheduled_at: String,
    /// Duration in minutes.
    pub duration_minutes: i64,
    /// Lifecycle status.
    pub status: MeetingStatus,
    /// Event id in the external calendar, when mirrored there.
    pub external_event_id: Option<String>,
    /// Video call link, when available.
    pub meeting_url: Option<String>,
    /// Set exactly once, when the meeting transitions into cancelled.
    pub cancelled_at: Option<String>,
}

/// Fields accepted when inserting a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    /// Owning lead.
    pub lead_id: i64,
    /// Start time, `YYYY-MM-DDTHH:MM:SS`.
    pub scheduled_at: String,
    /// Duration in minutes.
    pub duration_minutes: i64,
    /// External calendar event id, when already created.
    pub external_event_id: Option<String>,
    /// Video call link, when available.
    pub meeting_url: Option<String>,
}

type MeetingRow = (
    i64,
    i64,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl Meeting {
    fn from_row(row: MeetingRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.0,
            lead_id: row.1,
            scheduled_at: row.2,
            duration_minutes: row.3,
            status: MeetingStatus::parse(&row.4)?,
            external_event_id: row.5,
            meeting_url: row.6,
            cancelled_at: row.7,
        })
    }
}

const MEETING_COLUMNS: &str = "id, lead_id, scheduled_at, duration_minutes, status, \
     external_event_id, meeting_url, cancelled_at";

impl Store {
    /// Looks up a meeting by row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_meeting(&self, id: i64) -> Result<Option<Meeting>, StoreError> {
        let row: Option<MeetingRow> =
            sqlx::query_as(&format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(Meeting::from_row).transpose()
    }

    /// Looks up a meeting by its external calendar event id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn find_meeting_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<Meeting>, StoreError> {
        let row: Option<MeetingRow> = sqlx::query_as(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings WHERE external_event_id = ?1"
        ))
        .bind(external_event_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Meeting::from_row).transpose()
    }

    /// Finds an active (scheduled or confirmed) meeting for a lead at an
    /// exact start time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn active_meeting_at(
        &self,
        lead_id: i64,
        scheduled_at: &str,
    ) -> Result<Option<Meeting>, StoreError> {
        let row: Option<MeetingRow> = sqlx::query_as(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE lead_id = ?1 AND scheduled_at = ?2 \
             AND status IN ('scheduled', 'confirmed')"
        ))
        .bind(lead_id)
        .bind(scheduled_at)
        .fetch_optional(self.pool())
        .await?;
        row.map(Meeting::from_row).transpose()
    }

    /// The lead's next active meeting at or after `now`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or row decoding failure.
    pub async fn next_active_meeting(
        &self,
        lead_id: i64,
        now: &str,
    ) -> Result<Option<Meeting>, StoreError> {
        let row: Option<MeetingRow> = sqlx::query_as(&format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE lead_id = ?1 AND scheduled_at >= ?2 \
             AND status IN ('scheduled', 'confirmed') \
             ORDER BY scheduled_at LIMIT 1"
        ))
        .bind(lead_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;
        row.map(Meeting::from_row).transpose()
    }

    /// Inserts a meeting in `scheduled` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`]; callers can distinguish the unique
    /// violation raised when the lead already holds an active meeting at this
    /// time via [`StoreError::is_unique_violation`].
    pub async fn create_meeting(&self, new: NewMeeting) -> Result<Meeting, StoreError> {
        let result = sqlx::query(
            "INSERT INTO meetings \
             (lead_id, scheduled_at, duration_minutes, status, external_event_id, meeting_url) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(new.lead_id)
        .bind(&new.scheduled_at)
        .bind(new.duration_minutes)
        .bind(MeetingStatus::Scheduled.as_str())
        .bind(&new.external_event_id)
        .bind(&new.meeting_url)
        .execute(self.pool())
        .await?;
        let id = result.last_insert_rowid();
        debug!(meeting_id = id, lead_id = new.lead_id, at = %new.scheduled_at, "meeting created");
        self.find_meeting(id)
            .await?
            .ok_or_else(|| StoreError::InvalidEnum {
                field: "meeting_id",
                value: id.to_string(),
            })
    }

    /// Cancels a meeting if it is still active. `cancelled_at` is written
    /// only on this transition, so repeating the call leaves it untouched.
    ///
    /// Returns `true` when this call performed the transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn cancel_meeting(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE meetings SET status = 'cancelled', cancelled_at = datetime('now') \
             WHERE id = ?1 AND status IN ('scheduled', 'confirmed')",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Adopts a new start time (and optionally a new link) for a meeting,
    /// used when the external calendar is the source of a reschedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn update_meeting_schedule(
        &self,
        id: i64,
        scheduled_at: &str,
        meeting_url: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE meetings SET scheduled_at = ?2, \
             meeting_url = COALESCE(?3, meeting_url) WHERE id = ?1",
        )
        .bind(id)
        .bind(scheduled_at)
        .bind(meeting_url)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

//! Bookable calendar slots.
//!
//! Dates and times are stored as `YYYY-MM-DD` / `HH:MM` text. The conditional
//! flip in [`Store::try_reserve_slot`] is the concurrency gate for bookings:
//! whichever caller's UPDATE matches `available = 1` first wins, everyone
//! else sees zero rows affected.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use tracing::debug;

use super::{Store, StoreError};

/// A bookable meeting slot.
#[derive(Debug, Clone)]
pub struct CalendarSlot {
    /// Row id.
    pub id: i64,
    /// Slot date, `YYYY-MM-DD`.
    pub slot_date: String,
    /// Slot start time, `HH:MM`.
    pub slot_time: String,
    /// Duration in minutes.
    pub duration_minutes: i64,
    /// Whether the slot can still be booked.
    pub available: bool,
    /// Lead holding the reservation, when taken.
    pub reserved_by: Option<i64>,
}

type SlotRow = (i64, String, String, i64, i64, Option<i64>);

impl CalendarSlot {
    fn from_row(row: SlotRow) -> Self {
        Self {
            id: row.0,
            slot_date: row.1,
            slot_time: row.2,
            duration_minutes: row.3,
            available: row.4 != 0,
            reserved_by: row.5,
        }
    }
}

const SLOT_COLUMNS: &str = "id, slot_date, slot_time, duration_minutes, available, reserved_by";

/// Default business-hour start times used when seeding slots.
pub const BUSINESS_HOURS: &[&str] = &["09:00", "10:00", "11:00", "14:00", "15:00", "16:00"];

impl Store {
    /// Looks up the slot at an exact date and time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn find_slot(
        &self,
        date: &str,
        time: &str,
    ) -> Result<Option<CalendarSlot>, StoreError> {
        let row: Option<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM calendar_slots WHERE slot_date = ?1 AND slot_time = ?2"
        ))
        .bind(date)
        .bind(time)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(CalendarSlot::from_row))
    }

    /// Lists available slots between two dates, earliest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the query fails.
    pub async fn available_slots(
        &self,
        from_date: &str,
        to_date: &str,
        limit: u32,
    ) -> Result<Vec<CalendarSlot>, StoreError> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM calendar_slots \
             WHERE available = 1 AND slot_date >= ?1 AND slot_date <= ?2 \
             ORDER BY slot_date, slot_time LIMIT ?3"
        ))
        .bind(from_date)
        .bind(to_date)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(CalendarSlot::from_row).collect())
    }

    /// Atomically flips a slot from available to reserved.
    ///
    /// Returns `true` when this call won the slot, `false` when someone else
    /// already held it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn try_reserve_slot(&self, slot_id: i64, lead_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE calendar_slots SET available = 0, reserved_by = ?2, \
             reserved_at = datetime('now') WHERE id = ?1 AND available = 1",
        )
        .bind(slot_id)
        .bind(lead_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Releases a slot by row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn release_slot(&self, slot_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE calendar_slots SET available = 1, reserved_by = NULL, reserved_at = NULL \
             WHERE id = ?1",
        )
        .bind(slot_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Releases the slot at a date and time, if one exists. Cancellations key
    /// by schedule rather than row id so externally created meetings release
    /// cleanly too.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the update fails.
    pub async fn release_slot_at(&self, date: &str, time: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE calendar_slots SET available = 1, reserved_by = NULL, reserved_at = NULL \
             WHERE slot_date = ?1 AND slot_time = ?2",
        )
        .bind(date)
        .bind(time)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Inserts a slot if absent. Returns `true` when a row was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the insert fails.
    pub async fn insert_slot(
        &self,
        date: &str,
        time: &str,
        duration_minutes: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO calendar_slots (slot_date, slot_time, duration_minutes) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(date)
        .bind(time)
        .bind(duration_minutes)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks the slot at a date and time reserved for a lead, creating the
    /// row if it does not exist. Used when adopting meetings that originate
    /// in the external calendar, which may fall outside the seeded grid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when a write fails.
    pub async fn mark_slot_reserved(
        &self,
        date: &str,
        time: &str,
        duration_minutes: i64,
        lead_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO calendar_slots (slot_date, slot_time, duration_minutes) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(date)
        .bind(time)
        .bind(duration_minutes)
        .execute(self.pool())
        .await?;
        sqlx::query(
            "UPDATE calendar_slots SET available = 0, reserved_by = ?3, \
             reserved_at = datetime('now') WHERE slot_date = ?1 AND slot_time = ?2",
        )
        .bind(date)
        .bind(time)
        .bind(lead_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Seeds weekday business-hour slots for the next `days_ahead` days.
    /// Existing rows are left alone; returns the number of slots created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when an insert fails.
    pub async fn seed_weekday_slots(
        &self,
        start: NaiveDate,
        days_ahead: u32,
        duration_minutes: i64,
    ) -> Result<u64, StoreError> {
        let mut created = 0u64;
        for offset in 0..days_ahead {
            let Some(day) = start.checked_add_days(Days::new(u64::from(offset))) else {
                continue;
            };
            if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            let date = day.format("%Y-%m-%d").to_string();
            for time in BUSINESS_HOURS {
                if self.insert_slot(&date, time, duration_minutes).await? {
                    created = created.saturating_add(1);
                }
            }
        }
        debug!(created, days_ahead, "slot seeding finished");
        Ok(created)
    }
}

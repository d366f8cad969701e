//! Two-way reconciliation between local meetings and the external calendar.
//!
//! The external calendar can be edited out-of-band: events appear, move, or
//! get cancelled without this system seeing the change. The reconciler walks
//! a bounded future window and converges both sides. The one asymmetric rule
//! is that a local cancellation always wins; the reconciler deletes the
//! external event rather than resurrecting a meeting someone cancelled here.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::calendar::{CalendarEvent, CalendarProvider};
use crate::store::{Meeting, MeetingStatus, NewLead, NewMeeting, Store};

use super::{split_storage_timestamp, storage_timestamp};

/// Counts of reconciliation actions taken in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// External events inspected.
    pub events_seen: u32,

    /// Local meetings created for unknown external events.
    pub created: u32,

    /// Local meetings cancelled because the external event was cancelled.
    pub cancelled_locally: u32,

    /// External events deleted because the local meeting was cancelled.
    pub cancelled_externally: u32,

    /// Local meetings whose time or link was adopted from the external side.
    pub rescheduled: u32,

    /// Events skipped (all-day, cancelled-on-arrival, or unresolvable).
    pub skipped: u32,
}

impl ReconcileSummary {
    /// Whether this pass performed any write on either side.
    pub fn changed_anything(&self) -> bool {
        self.created > 0
            || self.cancelled_locally > 0
            || self.cancelled_externally > 0
            || self.rescheduled > 0
    }
}

/// Periodically converges local meetings with the external calendar.
pub struct CalendarReconciler {
    store: Arc<Store>,
    calendar: Arc<dyn CalendarProvider>,
    window_days: i64,
    slot_duration_minutes: i64,
}

impl CalendarReconciler {
    /// Create a reconciler over the given store and calendar backend.
    pub fn new(
        store: Arc<Store>,
        calendar: Arc<dyn CalendarProvider>,
        window_days: i64,
        slot_duration_minutes: i64,
    ) -> Self {
        Self {
            store,
            calendar,
            window_days,
            slot_duration_minutes,
        }
    }

    /// Run one reconciliation pass over the configured future window.
    ///
    /// Per-event failures are logged and counted as skipped rather than
    /// aborting the pass; a second run with no external changes performs no
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns an error only when the external event listing itself fails.
    pub async fn run_once(&self) -> anyhow::Result<ReconcileSummary> {
        let now = Utc::now();
        let to = now
            .checked_add_signed(Duration::days(self.window_days))
            .unwrap_or(now);
        let events = self
            .calendar
            .list_events(now, to)
            .await
            .context("failed to list external calendar events")?;

        let mut summary = ReconcileSummary::default();
        for event in &events {
            summary.events_seen = summary.events_seen.saturating_add(1);

            if event.all_day {
                debug!(event_id = %event.id, "skipping all-day event");
                summary.skipped = summary.skipped.saturating_add(1);
                continue;
            }

            let outcome = match self.store.find_meeting_by_external_id(&event.id).await {
                Ok(Some(meeting)) => self.reconcile_known(&meeting, event).await,
                Ok(None) => self.adopt_unknown(event).await,
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "meeting lookup failed");
                    Err(())
                }
            };

            match outcome {
                Ok(action) => action.apply(&mut summary),
                Err(()) => summary.skipped = summary.skipped.saturating_add(1),
            }
        }

        if summary.changed_anything() {
            info!(?summary, "reconciliation pass applied changes");
        } else {
            debug!(events = summary.events_seen, "reconciliation pass made no changes");
        }
        Ok(summary)
    }

    /// Bring an already-linked meeting in line with its external event.
    async fn reconcile_known(
        &self,
        meeting: &Meeting,
        event: &CalendarEvent,
    ) -> Result<Action, ()> {
        let locally_cancelled = meeting.status == MeetingStatus::Cancelled;

        if locally_cancelled && !event.cancelled {
            // Local cancellation wins: remove the external event.
            if let Err(e) = self.calendar.delete_event(&event.id).await {
                warn!(event_id = %event.id, error = %e, "failed to delete external event");
                return Err(());
            }
            info!(meeting_id = meeting.id, event_id = %event.id, "external event cancelled to match local state");
            return Ok(Action::CancelledExternally);
        }

        if event.cancelled && meeting.status.is_active() {
            if let Err(e) = self.store.cancel_meeting(meeting.id).await {
                warn!(meeting_id = meeting.id, error = %e, "local cancellation failed");
                return Err(());
            }
            if let Some((date, time)) = split_storage_timestamp(&meeting.scheduled_at) {
                if let Err(e) = self.store.release_slot_at(date, time).await {
                    warn!(meeting_id = meeting.id, error = %e, "slot release failed");
                }
            }
            info!(meeting_id = meeting.id, "meeting cancelled to match external state");
            return Ok(Action::CancelledLocally);
        }

        if meeting.status.is_active() && !event.cancelled {
            let external_at = storage_timestamp(event.start);
            if external_at != meeting.scheduled_at {
                return self.adopt_reschedule(meeting, event).await;
            }
        }

        Ok(Action::None)
    }

    /// Move a meeting to the time the external calendar now reports.
    async fn adopt_reschedule(
        &self,
        meeting: &Meeting,
        event: &CalendarEvent,
    ) -> Result<Action, ()> {
        let external_at = storage_timestamp(event.start);

        if let Err(e) = self
            .store
            .update_meeting_schedule(meeting.id, &external_at, event.meeting_url.as_deref())
            .await
        {
            warn!(meeting_id = meeting.id, error = %e, "failed to adopt external reschedule");
            return Err(());
        }

        if let Some((date, time)) = split_storage_timestamp(&meeting.scheduled_at) {
            if let Err(e) = self.store.release_slot_at(date, time).await {
                warn!(meeting_id = meeting.id, error = %e, "old slot release failed");
            }
        }
        if let Some((date, time)) = split_storage_timestamp(&external_at) {
            if let Err(e) = self
                .store
                .mark_slot_reserved(date, time, self.slot_duration_minutes, meeting.lead_id)
                .await
            {
                warn!(meeting_id = meeting.id, error = %e, "new slot reservation failed");
            }
        }

        info!(
            meeting_id = meeting.id,
            from = %meeting.scheduled_at,
            to = %external_at,
            "meeting rescheduled from external calendar"
        );
        Ok(Action::Rescheduled)
    }

    /// Materialize a local meeting for an external event this system has
    /// never seen.
    async fn adopt_unknown(&self, event: &CalendarEvent) -> Result<Action, ()> {
        if event.cancelled {
            // Never materialize a meeting that arrives already cancelled.
            debug!(event_id = %event.id, "skipping cancelled-on-arrival event");
            return Ok(Action::Skipped);
        }

        let Some(email) = event.attendees.first() else {
            debug!(event_id = %event.id, "no attendee to resolve a lead from");
            return Ok(Action::Skipped);
        };

        let lead = match self.store.find_lead_by_email(email).await {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                let fields = NewLead {
                    email: Some(email.clone()),
                    ..NewLead::default()
                };
                match self.store.create_lead(email, fields).await {
                    Ok(lead) => {
                        info!(lead_id = lead.id, "minimal lead created from calendar attendee");
                        lead
                    }
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "lead creation failed");
                        return Err(());
                    }
                }
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "lead lookup failed");
                return Err(());
            }
        };

        let duration = event
            .end
            .signed_duration_since(event.start)
            .num_minutes()
            .max(0);
        let duration = if duration == 0 {
            self.slot_duration_minutes
        } else {
            duration
        };

        let scheduled_at = storage_timestamp(event.start);
        if let Some((date, time)) = split_storage_timestamp(&scheduled_at) {
            if let Err(e) = self
                .store
                .mark_slot_reserved(date, time, self.slot_duration_minutes, lead.id)
                .await
            {
                warn!(event_id = %event.id, error = %e, "slot reservation failed");
            }
        }

        let new = NewMeeting {
            lead_id: lead.id,
            scheduled_at,
            duration_minutes: duration,
            external_event_id: Some(event.id.clone()),
            meeting_url: event.meeting_url.clone(),
        };
        match self.store.create_meeting(new).await {
            Ok(meeting) => {
                info!(meeting_id = meeting.id, event_id = %event.id, "meeting adopted from external calendar");
                Ok(Action::Created)
            }
            Err(e) if e.is_unique_violation() => {
                // The lead already holds an active meeting at this time under
                // another event; leave it alone.
                debug!(event_id = %event.id, "duplicate meeting time, leaving local state");
                Ok(Action::Skipped)
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "meeting adoption failed");
                Err(())
            }
        }
    }
}

/// What one event's reconciliation did, folded into the summary.
enum Action {
    None,
    Created,
    CancelledLocally,
    CancelledExternally,
    Rescheduled,
    Skipped,
}

impl Action {
    fn apply(self, summary: &mut ReconcileSummary) {
        match self {
            Self::None => {}
            Self::Created => summary.created = summary.created.saturating_add(1),
            Self::CancelledLocally => {
                summary.cancelled_locally = summary.cancelled_locally.saturating_add(1);
            }
            Self::CancelledExternally => {
                summary.cancelled_externally = summary.cancelled_externally.saturating_add(1);
            }
            Self::Rescheduled => summary.rescheduled = summary.rescheduled.saturating_add(1),
            Self::Skipped => summary.skipped = summary.skipped.saturating_add(1),
        }
    }
}

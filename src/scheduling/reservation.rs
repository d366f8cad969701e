//! Slot reservation: the booking path that keeps the slot table and the
//! meetings table consistent under concurrent and repeated requests.
//!
//! The ordering here is load-bearing. A per-lead claim held for the whole
//! booking rejects same-lead requests that arrive mid-flight; the slot flip
//! is a single conditional update so only one caller can win it; the
//! duplicate re-check runs after the flip so a repeated booking returns the
//! existing meeting instead of inserting a second row; the external calendar
//! write is best-effort and never blocks the local booking.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::calendar::{CalendarProvider, EventRequest};
use crate::config::{BookingConfig, BusinessConfig};
use crate::store::{FunnelStage, Lead, Meeting, NewMeeting, Store, StoreError};

use super::{parse_slot_datetime, split_storage_timestamp, storage_timestamp};

/// Why a booking request was refused.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// The requested time is not far enough in the future.
    #[error("slot is less than {minimum_minutes} minutes away")]
    TooSoon {
        /// Minimum lead time in minutes.
        minimum_minutes: i64,
    },

    /// The requested time is beyond the booking horizon.
    #[error("slot is more than {maximum_days} days away")]
    TooFar {
        /// Maximum horizon in days.
        maximum_days: i64,
    },

    /// Another booking for this lead is still running; this request is a
    /// duplicate of it.
    #[error("a booking for this lead is already being processed")]
    AlreadyProcessing,

    /// No slot exists at the requested date and time.
    #[error("no slot at the requested date and time")]
    SlotNotFound,

    /// The slot exists but is already reserved.
    #[error("slot already taken")]
    SlotTaken,

    /// The date or time could not be parsed.
    #[error("invalid date or time")]
    InvalidDateTime,

    /// The store failed mid-booking.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Customer-facing Portuguese message for this refusal.
    pub fn user_message(&self) -> String {
        match self {
            Self::TooSoon { minimum_minutes } => format!(
                "Esse horário está muito em cima da hora. Consigo agendar a partir de \
                 {minimum_minutes} minutos de antecedência. Quer escolher outro horário?"
            ),
            Self::TooFar { maximum_days } => format!(
                "Esse horário está muito distante. Consigo agendar em até {maximum_days} dias. \
                 Quer escolher uma data mais próxima?"
            ),
            Self::AlreadyProcessing => {
                "Já estou processando um agendamento para você, um instante.".to_owned()
            }
            Self::SlotNotFound => {
                "Não encontrei esse horário na agenda. Quer que eu liste os horários \
                 disponíveis?"
                    .to_owned()
            }
            Self::SlotTaken => {
                "Esse horário acabou de ser reservado. Quer escolher outro?".to_owned()
            }
            Self::InvalidDateTime => {
                "Não consegui entender a data ou o horário. Pode me dizer no formato \
                 dia e hora, por exemplo: 2026-09-14 às 10:00?"
                    .to_owned()
            }
            Self::Store(_) => {
                "Tive um problema ao registrar o agendamento. Pode tentar de novo em \
                 instantes?"
                    .to_owned()
            }
        }
    }
}

/// A successful booking outcome.
#[derive(Debug, Clone)]
pub struct BookedMeeting {
    /// The meeting row, either newly created or pre-existing.
    pub meeting: Meeting,

    /// True when this request matched a meeting that already existed, so no
    /// new row was created.
    pub already_existed: bool,
}

/// Books and cancels meetings while keeping slots, meetings, and the external
/// calendar consistent.
pub struct ReservationManager {
    store: Arc<Store>,
    calendar: Arc<dyn CalendarProvider>,
    booking: BookingConfig,
    business: BusinessConfig,
    in_flight: Mutex<HashSet<i64>>,
}

/// Releases the per-lead booking claim when the booking path returns.
struct LeadClaim<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    lead_id: i64,
}

impl Drop for LeadClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.lead_id);
    }
}

impl ReservationManager {
    /// Create a manager over the given store and calendar backend.
    pub fn new(
        store: Arc<Store>,
        calendar: Arc<dyn CalendarProvider>,
        booking: BookingConfig,
        business: BusinessConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            booking,
            business,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Claim the lead for the duration of one booking. A second claim while
    /// the first is held means the model repeated the call mid-flight.
    fn claim_lead(&self, lead_id: i64) -> Result<LeadClaim<'_>, BookingError> {
        let mut held = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !held.insert(lead_id) {
            return Err(BookingError::AlreadyProcessing);
        }
        Ok(LeadClaim {
            in_flight: &self.in_flight,
            lead_id,
        })
    }

    /// Reserve the slot at `date`/`time` for a lead and create the meeting.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError`] describing why the booking was refused; see
    /// the variant docs. Store failures after the slot flip release the slot
    /// before returning.
    pub async fn reserve(
        &self,
        lead: &Lead,
        date: &str,
        time: &str,
    ) -> Result<BookedMeeting, BookingError> {
        let start = parse_slot_datetime(date, time).ok_or(BookingError::InvalidDateTime)?;
        let now = Utc::now();
        self.validate_window(start, now)?;

        let _claim = self.claim_lead(lead.id)?;
        let scheduled_at = storage_timestamp(start);

        let slot = self
            .store
            .find_slot(date, time)
            .await?
            .ok_or(BookingError::SlotNotFound)?;
        if !slot.available {
            // A repeat of a booking this lead already completed is satisfied
            // by the existing meeting; anything else is a real conflict.
            if slot.reserved_by == Some(lead.id) {
                if let Some(existing) =
                    self.store.active_meeting_at(lead.id, &scheduled_at).await?
                {
                    return Ok(BookedMeeting {
                        meeting: existing,
                        already_existed: true,
                    });
                }
            }
            return Err(BookingError::SlotTaken);
        }

        if !self.store.try_reserve_slot(slot.id, lead.id).await? {
            // Lost the conditional flip to a concurrent booking.
            return Err(BookingError::SlotTaken);
        }

        // The flip succeeded; if this lead already holds a meeting at the
        // same time the booking is satisfied and the reservation stands.
        if let Some(existing) = self.store.active_meeting_at(lead.id, &scheduled_at).await? {
            info!(lead_id = lead.id, meeting_id = existing.id, "booking already satisfied");
            return Ok(BookedMeeting {
                meeting: existing,
                already_existed: true,
            });
        }

        let (external_event_id, meeting_url) = self.create_external_event(lead, start).await;

        let new = NewMeeting {
            lead_id: lead.id,
            scheduled_at: scheduled_at.clone(),
            duration_minutes: self.booking.slot_duration_minutes,
            external_event_id,
            meeting_url,
        };
        let meeting = match self.store.create_meeting(new).await {
            Ok(meeting) => meeting,
            Err(e) if e.is_unique_violation() => {
                // A sibling write landed between the re-check and the insert.
                // The meeting exists, so the reservation must stand.
                match self.store.active_meeting_at(lead.id, &scheduled_at).await? {
                    Some(existing) => {
                        return Ok(BookedMeeting {
                            meeting: existing,
                            already_existed: true,
                        })
                    }
                    None => {
                        self.release_quietly(slot.id).await;
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.release_quietly(slot.id).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .store
            .update_lead_stage(lead.id, FunnelStage::MeetingScheduled)
            .await
        {
            warn!(lead_id = lead.id, error = %e, "failed to advance stage after booking");
        }
        if let Err(e) = self.store.log_activity(
            Some(lead.id),
            "meeting_scheduled",
            &format!("Reunião agendada para {date} às {time}"),
        ) {
            warn!(error = %e, "failed to log booking activity");
        }
        match self.store.cancel_pending_follow_ups(lead.id).await {
            Ok(cancelled) if cancelled > 0 => {
                info!(lead_id = lead.id, cancelled, "pending follow-ups cancelled by booking");
            }
            Ok(_) => {}
            Err(e) => warn!(lead_id = lead.id, error = %e, "failed to cancel follow-ups"),
        }

        info!(
            lead_id = lead.id,
            meeting_id = meeting.id,
            at = %meeting.scheduled_at,
            "meeting booked"
        );
        Ok(BookedMeeting {
            meeting,
            already_existed: false,
        })
    }

    /// Cancel a meeting: best-effort external delete, local status flip, and
    /// slot release keyed by the meeting's original date and time.
    ///
    /// Returns `true` when this call performed the local transition.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] when a local write fails.
    pub async fn cancel(&self, meeting: &Meeting) -> Result<bool, BookingError> {
        if let Some(ref event_id) = meeting.external_event_id {
            if let Err(e) = self.calendar.delete_event(event_id).await {
                warn!(event_id = %event_id, error = %e, "external event delete failed, continuing");
            }
        }

        let transitioned = self.store.cancel_meeting(meeting.id).await?;

        if let Some((date, time)) = split_storage_timestamp(&meeting.scheduled_at) {
            self.store.release_slot_at(date, time).await?;
        } else {
            warn!(
                meeting_id = meeting.id,
                scheduled_at = %meeting.scheduled_at,
                "unparseable meeting timestamp, slot not released"
            );
        }

        if transitioned {
            if let Err(e) = self.store.log_activity(
                Some(meeting.lead_id),
                "meeting_cancelled",
                &format!("Reunião de {} cancelada", meeting.scheduled_at),
            ) {
                warn!(error = %e, "failed to log cancellation activity");
            }
            info!(meeting_id = meeting.id, lead_id = meeting.lead_id, "meeting cancelled");
        }
        Ok(transitioned)
    }

    fn validate_window(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), BookingError> {
        let until = start.signed_duration_since(now);
        if until.num_minutes() < self.booking.min_lead_minutes {
            return Err(BookingError::TooSoon {
                minimum_minutes: self.booking.min_lead_minutes,
            });
        }
        if until.num_days() > self.booking.max_horizon_days {
            return Err(BookingError::TooFar {
                maximum_days: self.booking.max_horizon_days,
            });
        }
        Ok(())
    }

    async fn create_external_event(
        &self,
        lead: &Lead,
        start: DateTime<Utc>,
    ) -> (Option<String>, Option<String>) {
        let end = start
            .checked_add_signed(Duration::minutes(self.booking.slot_duration_minutes))
            .unwrap_or(start);
        let display_name = lead.name.clone().unwrap_or_else(|| lead.phone.clone());
        let request = EventRequest {
            summary: format!("Reunião {} x {display_name}", self.business.company_name),
            description: format!(
                "Reunião comercial agendada pela assistente {}.",
                self.business.agent_name
            ),
            start,
            end,
            attendee_email: lead.email.clone(),
            attendee_name: lead.name.clone(),
        };
        match self.calendar.create_event(&request).await {
            Ok(created) => (Some(created.event_id), created.meeting_url),
            Err(e) => {
                // Best-effort: reconciliation will mirror the meeting later.
                warn!(lead_id = lead.id, error = %e, "external event creation failed");
                (None, None)
            }
        }
    }

    async fn release_quietly(&self, slot_id: i64) {
        if let Err(e) = self.store.release_slot(slot_id).await {
            warn!(slot_id, error = %e, "failed to release slot after booking failure");
        }
    }
}

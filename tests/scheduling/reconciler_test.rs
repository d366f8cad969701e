//! Tests for two-way calendar reconciliation.

use std::sync::{Arc, Mutex};

use armitage::calendar::{
    CalendarError, CalendarEvent, CalendarProvider, CreatedEvent, EventRequest,
};
use armitage::scheduling::reconciler::CalendarReconciler;
use armitage::store::{MeetingStatus, NewLead, NewMeeting, Store};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Calendar backend whose event list the test scripts directly.
struct FakeCalendar {
    events: Mutex<Vec<CalendarEvent>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeCalendar {
    fn with_events(events: Vec<CalendarEvent>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(events),
            deleted: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn create_event(&self, _request: &EventRequest) -> Result<CreatedEvent, CalendarError> {
        Err(CalendarError::OperationFailed(
            "create not expected here".to_owned(),
        ))
    }

    async fn list_events(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        Ok(self.events.lock().expect("events lock").clone())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        self.events
            .lock()
            .expect("events lock")
            .retain(|e| e.id != event_id);
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(event_id.to_owned());
        Ok(())
    }
}

async fn setup_store() -> Arc<Store> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    armitage::store::apply_migrations(&pool)
        .await
        .expect("migrations apply");
    Arc::new(Store::new(pool))
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, hour, minute, 0)
        .single()
        .expect("valid datetime")
}

fn event(id: &str, start: DateTime<Utc>, minutes: i64) -> CalendarEvent {
    CalendarEvent {
        id: id.to_owned(),
        summary: "Reunião comercial".to_owned(),
        start,
        end: start
            .checked_add_signed(Duration::minutes(minutes))
            .expect("valid end"),
        all_day: false,
        cancelled: false,
        attendees: Vec::new(),
        meeting_url: None,
    }
}

fn reconciler(store: &Arc<Store>, calendar: &Arc<FakeCalendar>) -> CalendarReconciler {
    CalendarReconciler::new(
        Arc::clone(store),
        Arc::clone(calendar) as Arc<dyn CalendarProvider>,
        30,
        60,
    )
}

#[tokio::test]
async fn aligned_sides_produce_no_writes() {
    let store = setup_store().await;
    let lead = store
        .create_lead("+5511922220001", NewLead::default())
        .await
        .expect("create lead");
    store
        .create_meeting(NewMeeting {
            lead_id: lead.id,
            scheduled_at: "2026-09-14T10:00:00".to_string(),
            duration_minutes: 60,
            external_event_id: Some("evt-1".to_string()),
            meeting_url: None,
        })
        .await
        .expect("create meeting");
    let calendar = FakeCalendar::with_events(vec![event("evt-1", at(10, 0), 60)]);

    let summary = reconciler(&store, &calendar)
        .run_once()
        .await
        .expect("pass runs");
    assert_eq!(summary.events_seen, 1);
    assert!(!summary.changed_anything());
    assert!(calendar.deleted.lock().expect("deleted lock").is_empty());
}

#[tokio::test]
async fn local_cancellation_wins_over_the_external_event() {
    let store = setup_store().await;
    let lead = store
        .create_lead("+5511922220002", NewLead::default())
        .await
        .expect("create lead");
    let meeting = store
        .create_meeting(NewMeeting {
            lead_id: lead.id,
            scheduled_at: "2026-09-14T10:00:00".to_string(),
            duration_minutes: 60,
            external_event_id: Some("evt-2".to_string()),
            meeting_url: None,
        })
        .await
        .expect("create meeting");
    store.cancel_meeting(meeting.id).await.expect("cancel");
    let calendar = FakeCalendar::with_events(vec![event("evt-2", at(10, 0), 60)]);
    let reconciler = reconciler(&store, &calendar);

    let summary = reconciler.run_once().await.expect("first pass");
    assert_eq!(summary.cancelled_externally, 1);
    assert!(calendar
        .deleted
        .lock()
        .expect("deleted lock")
        .contains(&"evt-2".to_owned()));

    // The event is gone, so a second pass converges to nothing.
    let second = reconciler.run_once().await.expect("second pass");
    assert_eq!(second.events_seen, 0);
    assert!(!second.changed_anything());
}

#[tokio::test]
async fn external_cancellation_cancels_locally_and_frees_the_slot() {
    let store = setup_store().await;
    let lead = store
        .create_lead("+5511922220003", NewLead::default())
        .await
        .expect("create lead");
    let meeting = store
        .create_meeting(NewMeeting {
            lead_id: lead.id,
            scheduled_at: "2026-09-14T10:00:00".to_string(),
            duration_minutes: 60,
            external_event_id: Some("evt-3".to_string()),
            meeting_url: None,
        })
        .await
        .expect("create meeting");
    store
        .mark_slot_reserved("2026-09-14", "10:00", 60, lead.id)
        .await
        .expect("reserve slot");

    let mut cancelled_event = event("evt-3", at(10, 0), 60);
    cancelled_event.cancelled = true;
    let calendar = FakeCalendar::with_events(vec![cancelled_event]);
    let reconciler = reconciler(&store, &calendar);

    let summary = reconciler.run_once().await.expect("first pass");
    assert_eq!(summary.cancelled_locally, 1);

    let local = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(local.status, MeetingStatus::Cancelled);
    let slot = store
        .find_slot("2026-09-14", "10:00")
        .await
        .expect("lookup")
        .expect("slot exists");
    assert!(slot.available);

    // Both sides now agree; nothing further happens.
    let second = reconciler.run_once().await.expect("second pass");
    assert!(!second.changed_anything());
}

#[tokio::test]
async fn external_time_change_is_adopted_and_slots_remapped() {
    let store = setup_store().await;
    let lead = store
        .create_lead("+5511922220004", NewLead::default())
        .await
        .expect("create lead");
    let meeting = store
        .create_meeting(NewMeeting {
            lead_id: lead.id,
            scheduled_at: "2026-09-14T10:00:00".to_string(),
            duration_minutes: 60,
            external_event_id: Some("evt-4".to_string()),
            meeting_url: None,
        })
        .await
        .expect("create meeting");
    store
        .mark_slot_reserved("2026-09-14", "10:00", 60, lead.id)
        .await
        .expect("reserve slot");

    let mut moved = event("evt-4", at(15, 0), 60);
    moved.meeting_url = Some("https://meet.example.com/moved".to_string());
    let calendar = FakeCalendar::with_events(vec![moved]);
    let reconciler = reconciler(&store, &calendar);

    let summary = reconciler.run_once().await.expect("first pass");
    assert_eq!(summary.rescheduled, 1);

    let local = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(local.scheduled_at, "2026-09-14T15:00:00");
    assert_eq!(
        local.meeting_url.as_deref(),
        Some("https://meet.example.com/moved")
    );

    let old_slot = store
        .find_slot("2026-09-14", "10:00")
        .await
        .expect("lookup")
        .expect("slot exists");
    assert!(old_slot.available);
    let new_slot = store
        .find_slot("2026-09-14", "15:00")
        .await
        .expect("lookup")
        .expect("row was created");
    assert!(!new_slot.available);
    assert_eq!(new_slot.reserved_by, Some(lead.id));

    let second = reconciler.run_once().await.expect("second pass");
    assert!(!second.changed_anything());
}

#[tokio::test]
async fn all_day_and_cancelled_arrivals_are_skipped() {
    let store = setup_store().await;
    let mut all_day = event("evt-5", at(0, 0), 1440);
    all_day.all_day = true;
    let mut dead_on_arrival = event("evt-6", at(11, 0), 60);
    dead_on_arrival.cancelled = true;
    dead_on_arrival.attendees = vec!["alguem@example.com".to_string()];
    let calendar = FakeCalendar::with_events(vec![all_day, dead_on_arrival]);

    let summary = reconciler(&store, &calendar)
        .run_once()
        .await
        .expect("pass runs");
    assert_eq!(summary.events_seen, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.created, 0);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM meetings")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(count.0, 0);
}

#[tokio::test]
async fn unknown_event_materializes_a_lead_and_meeting() {
    let store = setup_store().await;
    // Zero-length events fall back to the configured slot duration.
    let mut unknown = event("evt-7", at(14, 0), 0);
    unknown.attendees = vec!["novo@cliente.com.br".to_string()];
    let calendar = FakeCalendar::with_events(vec![unknown]);

    let summary = reconciler(&store, &calendar)
        .run_once()
        .await
        .expect("pass runs");
    assert_eq!(summary.created, 1);

    let lead = store
        .find_lead_by_email("novo@cliente.com.br")
        .await
        .expect("lookup")
        .expect("lead was created");
    let meeting = store
        .find_meeting_by_external_id("evt-7")
        .await
        .expect("lookup")
        .expect("meeting was adopted");
    assert_eq!(meeting.lead_id, lead.id);
    assert_eq!(meeting.scheduled_at, "2026-09-14T14:00:00");
    assert_eq!(meeting.duration_minutes, 60);

    let slot = store
        .find_slot("2026-09-14", "14:00")
        .await
        .expect("lookup")
        .expect("slot row created");
    assert_eq!(slot.reserved_by, Some(lead.id));
}

#[tokio::test]
async fn adoption_reuses_an_existing_lead_by_email() {
    let store = setup_store().await;
    let existing = store
        .create_lead(
            "+5511922220005",
            NewLead {
                email: Some("ana@padoca.com.br".to_string()),
                ..NewLead::default()
            },
        )
        .await
        .expect("create lead");

    let mut unknown = event("evt-8", at(9, 0), 30);
    unknown.attendees = vec!["ana@padoca.com.br".to_string()];
    let calendar = FakeCalendar::with_events(vec![unknown]);

    let summary = reconciler(&store, &calendar)
        .run_once()
        .await
        .expect("pass runs");
    assert_eq!(summary.created, 1);

    let meeting = store
        .find_meeting_by_external_id("evt-8")
        .await
        .expect("lookup")
        .expect("meeting was adopted");
    assert_eq!(meeting.lead_id, existing.id);
    assert_eq!(meeting.duration_minutes, 30);

    let leads: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(leads.0, 1);
}

#[tokio::test]
async fn unknown_event_without_attendees_is_left_alone() {
    let store = setup_store().await;
    let calendar = FakeCalendar::with_events(vec![event("evt-9", at(16, 0), 60)]);

    let summary = reconciler(&store, &calendar)
        .run_once()
        .await
        .expect("pass runs");
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.created, 0);
}

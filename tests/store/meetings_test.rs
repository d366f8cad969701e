//! Tests for meeting rows, their lifecycle, and the duplicate-booking index.

use armitage::store::{MeetingStatus, NewLead, NewMeeting, Store};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

async fn setup_store() -> Store {
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
    Store::new(pool)
}

async fn setup_lead(store: &Store, phone: &str) -> i64 {
    store
        .create_lead(phone, NewLead::default())
        .await
        .expect("create lead")
        .id
}

fn new_meeting(lead_id: i64, scheduled_at: &str) -> NewMeeting {
    NewMeeting {
        lead_id,
        scheduled_at: scheduled_at.to_string(),
        duration_minutes: 60,
        external_event_id: None,
        meeting_url: None,
    }
}

#[tokio::test]
async fn created_meeting_round_trips_through_lookups() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660001").await;

    let meeting = store
        .create_meeting(NewMeeting {
            external_event_id: Some("evt-abc".to_string()),
            meeting_url: Some("https://meet.example.com/abc".to_string()),
            ..new_meeting(lead_id, "2026-09-14T10:00:00")
        })
        .await
        .expect("create meeting");
    assert_eq!(meeting.status, MeetingStatus::Scheduled);
    assert!(meeting.cancelled_at.is_none());

    let by_id = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(by_id.scheduled_at, "2026-09-14T10:00:00");

    let by_external = store
        .find_meeting_by_external_id("evt-abc")
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(by_external.id, meeting.id);

    store.shutdown().await;
}

#[tokio::test]
async fn second_active_meeting_at_same_time_hits_the_unique_index() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660002").await;

    let first = store
        .create_meeting(new_meeting(lead_id, "2026-09-14T10:00:00"))
        .await
        .expect("first create");
    let err = store
        .create_meeting(new_meeting(lead_id, "2026-09-14T10:00:00"))
        .await
        .expect_err("duplicate must fail");
    assert!(err.is_unique_violation());

    // Once the first is cancelled the time becomes insertable again.
    assert!(store
        .cancel_meeting(first.id)
        .await
        .expect("cancel first"));
    store
        .create_meeting(new_meeting(lead_id, "2026-09-14T10:00:00"))
        .await
        .expect("re-create after cancel");

    store.shutdown().await;
}

#[tokio::test]
async fn cancel_transitions_exactly_once() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660003").await;

    let meeting = store
        .create_meeting(new_meeting(lead_id, "2026-09-14T14:00:00"))
        .await
        .expect("create");

    assert!(store.cancel_meeting(meeting.id).await.expect("first cancel"));
    assert!(!store
        .cancel_meeting(meeting.id)
        .await
        .expect("second cancel"));

    let cancelled = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(cancelled.status, MeetingStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    store.shutdown().await;
}

#[tokio::test]
async fn active_lookup_ignores_cancelled_meetings() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660004").await;

    let meeting = store
        .create_meeting(new_meeting(lead_id, "2026-09-15T09:00:00"))
        .await
        .expect("create");
    assert!(store
        .active_meeting_at(lead_id, "2026-09-15T09:00:00")
        .await
        .expect("lookup")
        .is_some());

    store.cancel_meeting(meeting.id).await.expect("cancel");
    assert!(store
        .active_meeting_at(lead_id, "2026-09-15T09:00:00")
        .await
        .expect("lookup")
        .is_none());

    store.shutdown().await;
}

#[tokio::test]
async fn next_active_meeting_picks_the_earliest_upcoming() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660006").await;

    store
        .create_meeting(new_meeting(lead_id, "2026-09-20T10:00:00"))
        .await
        .expect("create later");
    store
        .create_meeting(new_meeting(lead_id, "2026-09-18T10:00:00"))
        .await
        .expect("create sooner");
    let stale = store
        .create_meeting(new_meeting(lead_id, "2026-09-10T10:00:00"))
        .await
        .expect("create past");

    let next = store
        .next_active_meeting(lead_id, "2026-09-15T00:00:00")
        .await
        .expect("lookup")
        .expect("one upcoming");
    assert_eq!(next.scheduled_at, "2026-09-18T10:00:00");
    assert_ne!(next.id, stale.id);

    store.shutdown().await;
}

#[tokio::test]
async fn schedule_update_adopts_time_and_keeps_url_when_absent() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511966660007").await;

    let meeting = store
        .create_meeting(NewMeeting {
            meeting_url: Some("https://meet.example.com/original".to_string()),
            ..new_meeting(lead_id, "2026-09-14T10:00:00")
        })
        .await
        .expect("create");

    store
        .update_meeting_schedule(meeting.id, "2026-09-14T15:00:00", None)
        .await
        .expect("reschedule without url");
    let moved = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(moved.scheduled_at, "2026-09-14T15:00:00");
    assert_eq!(
        moved.meeting_url.as_deref(),
        Some("https://meet.example.com/original")
    );

    store
        .update_meeting_schedule(meeting.id, "2026-09-14T16:00:00", Some("https://meet.example.com/new"))
        .await
        .expect("reschedule with url");
    let moved_again = store
        .find_meeting(meeting.id)
        .await
        .expect("lookup")
        .expect("meeting exists");
    assert_eq!(
        moved_again.meeting_url.as_deref(),
        Some("https://meet.example.com/new")
    );

    store.shutdown().await;
}

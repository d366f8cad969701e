//! Tests for scheduled follow-up rows.

use armitage::store::{FunnelStage, NewLead, Store};
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

#[tokio::test]
async fn scheduling_makes_a_pending_follow_up_visible() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511955550001").await;

    assert!(!store
        .pending_follow_up_exists(lead_id)
        .await
        .expect("query before"));

    store
        .schedule_follow_up(
            lead_id,
            "2026-09-14T10:00:00",
            "Oi! Conseguiu ver a apresentação?",
            FunnelStage::PresentationSent,
        )
        .await
        .expect("schedule");

    assert!(store
        .pending_follow_up_exists(lead_id)
        .await
        .expect("query after"));

    store.shutdown().await;
}

#[tokio::test]
async fn due_selection_is_oldest_first_and_bounded() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511955550002").await;

    store
        .schedule_follow_up(lead_id, "2026-09-14T12:00:00", "segundo", FunnelStage::New)
        .await
        .expect("schedule later");
    store
        .schedule_follow_up(lead_id, "2026-09-14T08:00:00", "primeiro", FunnelStage::New)
        .await
        .expect("schedule earlier");
    store
        .schedule_follow_up(lead_id, "2026-09-20T08:00:00", "futuro", FunnelStage::New)
        .await
        .expect("schedule future");

    let due = store
        .due_follow_ups("2026-09-14T23:00:00", 10)
        .await
        .expect("load due");
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].message, "primeiro");
    assert_eq!(due[1].message, "segundo");

    let bounded = store
        .due_follow_ups("2026-09-14T23:00:00", 1)
        .await
        .expect("load bounded");
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0].message, "primeiro");

    store.shutdown().await;
}

#[tokio::test]
async fn marking_sent_happens_exactly_once() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511955550003").await;

    let id = store
        .schedule_follow_up(lead_id, "2026-09-14T10:00:00", "oi", FunnelStage::New)
        .await
        .expect("schedule");

    assert!(store.mark_follow_up_sent(id).await.expect("first mark"));
    assert!(!store.mark_follow_up_sent(id).await.expect("second mark"));

    assert!(!store
        .pending_follow_up_exists(lead_id)
        .await
        .expect("pending after send"));
    assert!(store
        .due_follow_ups("2099-01-01T00:00:00", 10)
        .await
        .expect("due after send")
        .is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn cancelling_pending_rows_spares_sent_ones() {
    let store = setup_store().await;
    let lead_id = setup_lead(&store, "+5511955550004").await;

    let sent_id = store
        .schedule_follow_up(lead_id, "2026-09-10T10:00:00", "já foi", FunnelStage::New)
        .await
        .expect("schedule sent");
    store
        .mark_follow_up_sent(sent_id)
        .await
        .expect("mark sent");
    store
        .schedule_follow_up(lead_id, "2026-09-14T10:00:00", "pendente a", FunnelStage::New)
        .await
        .expect("schedule pending");
    store
        .schedule_follow_up(lead_id, "2026-09-15T10:00:00", "pendente b", FunnelStage::New)
        .await
        .expect("schedule pending");

    let cancelled = store
        .cancel_pending_follow_ups(lead_id)
        .await
        .expect("cancel");
    assert_eq!(cancelled, 2);

    let counts: (i64, i64) = sqlx::query_as(
        "SELECT SUM(sent), SUM(cancelled) FROM follow_ups WHERE lead_id = ?1",
    )
    .bind(lead_id)
    .fetch_one(store.pool())
    .await
    .expect("counts");
    assert_eq!(counts, (1, 2));

    store.shutdown().await;
}

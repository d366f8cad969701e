//! Tests for follow-up scheduling and dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use armitage::gateway::{GatewayError, MessagingGateway};
use armitage::scheduling::followup::{dispatch_due, schedule_for_lead};
use armitage::store::{FunnelStage, Lead, NewLead, ServiceCategory, Store};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Gateway that records outbound texts and can be told to fail.
struct FakeGateway {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn send_text(&self, contact: &str, text: &str) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::SendFailed("bridge down".to_owned()));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((contact.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn send_document(
        &self,
        _contact: &str,
        _document_url: &str,
        _caption: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

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

async fn setup_lead(store: &Store, phone: &str, stage: FunnelStage) -> Lead {
    let lead = store
        .create_lead(
            phone,
            NewLead {
                name: Some("Ana Souza".to_string()),
                need: Some(ServiceCategory::Websites),
                ..NewLead::default()
            },
        )
        .await
        .expect("create lead");
    store
        .update_lead_stage(lead.id, stage)
        .await
        .expect("set stage");
    store
        .find_lead_by_id(lead.id)
        .await
        .expect("reload")
        .expect("lead exists")
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 12, 0, 0)
        .single()
        .expect("valid datetime")
}

#[tokio::test]
async fn scheduling_inserts_once_and_never_stacks() {
    let store = setup_store().await;
    let lead = setup_lead(&store, "+5511911110001", FunnelStage::New).await;
    let now = noon();

    assert!(schedule_for_lead(&store, &lead, now, now)
        .await
        .expect("first call"));
    assert!(!schedule_for_lead(&store, &lead, now, now)
        .await
        .expect("second call"));

    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT send_at FROM follow_ups WHERE lead_id = ?1")
            .bind(lead.id)
            .fetch_all(store.pool())
            .await
            .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "2026-09-15T12:00:00");

    store.shutdown().await;
}

#[tokio::test]
async fn an_overdue_rule_falls_through_to_the_next_one() {
    let store = setup_store().await;
    let lead = setup_lead(&store, "+5511911110002", FunnelStage::New).await;
    let now = noon();
    let last_message = now
        .checked_sub_signed(Duration::hours(48))
        .expect("valid past");

    assert!(schedule_for_lead(&store, &lead, last_message, now)
        .await
        .expect("schedule"));

    let row: (String, String) =
        sqlx::query_as("SELECT send_at, message FROM follow_ups WHERE lead_id = ?1")
            .bind(lead.id)
            .fetch_one(store.pool())
            .await
            .expect("row");
    // 24h after the last message already passed; the 72h rule fires instead.
    assert_eq!(row.0, "2026-09-15T12:00:00");
    assert!(row.1.contains("Ainda posso te ajudar"));
    assert!(row.1.contains("Ana"));

    store.shutdown().await;
}

#[tokio::test]
async fn stages_without_rules_schedule_nothing() {
    let store = setup_store().await;
    let booked = setup_lead(&store, "+5511911110003", FunnelStage::MeetingScheduled).await;
    let closed = setup_lead(&store, "+5511911110004", FunnelStage::Closed).await;
    let now = noon();

    assert!(!schedule_for_lead(&store, &booked, now, now)
        .await
        .expect("booked lead"));
    assert!(!schedule_for_lead(&store, &closed, now, now)
        .await
        .expect("closed lead"));

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM follow_ups")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(count.0, 0);

    store.shutdown().await;
}

#[tokio::test]
async fn due_follow_ups_are_sent_and_marked() {
    let store = setup_store().await;
    let lead = setup_lead(&store, "+5511911110005", FunnelStage::New).await;
    store
        .schedule_follow_up(lead.id, "2026-09-14T08:00:00", "Oi! Tudo bem?", lead.stage)
        .await
        .expect("schedule");
    let gateway = FakeGateway::new();

    let sent = dispatch_due(&store, &gateway, noon())
        .await
        .expect("dispatch");
    assert_eq!(sent, 1);
    {
        let deliveries = gateway.sent.lock().expect("sent lock");
        assert_eq!(deliveries[0], (lead.phone.clone(), "Oi! Tudo bem?".to_owned()));
    }

    // Already sent; a second pass delivers nothing.
    let again = dispatch_due(&store, &gateway, noon())
        .await
        .expect("second dispatch");
    assert_eq!(again, 0);
    assert_eq!(gateway.sent_count(), 1);

    store.shutdown().await;
}

#[tokio::test]
async fn delivery_failure_leaves_the_row_for_retry() {
    let store = setup_store().await;
    let lead = setup_lead(&store, "+5511911110006", FunnelStage::New).await;
    store
        .schedule_follow_up(lead.id, "2026-09-14T08:00:00", "Oi!", lead.stage)
        .await
        .expect("schedule");
    let gateway = FakeGateway::new();
    gateway.fail.store(true, Ordering::SeqCst);

    let sent = dispatch_due(&store, &gateway, noon())
        .await
        .expect("failing dispatch");
    assert_eq!(sent, 0);
    assert!(store
        .pending_follow_up_exists(lead.id)
        .await
        .expect("still pending"));

    gateway.fail.store(false, Ordering::SeqCst);
    let sent = dispatch_due(&store, &gateway, noon())
        .await
        .expect("retry dispatch");
    assert_eq!(sent, 1);

    store.shutdown().await;
}

#[tokio::test]
async fn leads_out_of_the_funnel_get_cancelled_not_messaged() {
    let store = setup_store().await;
    let lead = setup_lead(&store, "+5511911110007", FunnelStage::New).await;
    store
        .schedule_follow_up(lead.id, "2026-09-14T08:00:00", "Oi!", lead.stage)
        .await
        .expect("schedule");
    store
        .update_lead_stage(lead.id, FunnelStage::Closed)
        .await
        .expect("close lead");
    let gateway = FakeGateway::new();

    let sent = dispatch_due(&store, &gateway, noon())
        .await
        .expect("dispatch");
    assert_eq!(sent, 0);
    assert_eq!(gateway.sent_count(), 0);
    assert!(!store
        .pending_follow_up_exists(lead.id)
        .await
        .expect("cancelled"));

    store.shutdown().await;
}

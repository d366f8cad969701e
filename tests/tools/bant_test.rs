//! Tests for the qualification tools, driven through the registry with the
//! default weight table (budget 30, authority 20, need 30, timeline 20).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use armitage::calendar::{CalendarError, CalendarEvent, CalendarProvider, CreatedEvent, EventRequest};
use armitage::config::Config;
use armitage::gateway::{GatewayError, MessagingGateway};
use armitage::knowledge::KnowledgeClient;
use armitage::scheduling::reservation::ReservationManager;
use armitage::store::{Channel, NewLead, Store};
use armitage::tools::{build_registry, RegistryDeps, ToolContext, ToolRegistry};

struct FakeCalendar;

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn create_event(&self, _request: &EventRequest) -> Result<CreatedEvent, CalendarError> {
        Ok(CreatedEvent {
            event_id: "evt-1".to_owned(),
            meeting_url: None,
        })
    }

    async fn list_events(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        Ok(Vec::new())
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), CalendarError> {
        Ok(())
    }
}

struct FakeGateway;

#[async_trait]
impl MessagingGateway for FakeGateway {
    async fn send_text(&self, _contact: &str, _text: &str) -> Result<(), GatewayError> {
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

fn registry_over(store: &Arc<Store>) -> ToolRegistry {
    let config = Config::default();
    let calendar: Arc<dyn CalendarProvider> = Arc::new(FakeCalendar);
    let reservations = Arc::new(ReservationManager::new(
        Arc::clone(store),
        calendar,
        config.booking.clone(),
        config.business.clone(),
    ));
    build_registry(RegistryDeps {
        store: Arc::clone(store),
        reservations,
        gateway: Arc::new(FakeGateway),
        knowledge: Arc::new(KnowledgeClient::new(&config.knowledge)),
        bant: config.bant.clone(),
        business: config.business.clone(),
        gateway_config: config.gateway.clone(),
    })
}

async fn ctx_with_lead(store: &Store, phone: &str) -> ToolContext {
    let lead = store
        .create_lead(
            phone,
            NewLead {
                name: Some("Ana Souza".to_owned()),
                ..NewLead::default()
            },
        )
        .await
        .expect("create lead");
    ToolContext {
        lead_id: Some(lead.id),
        conversation_id: None,
        channel: Channel::Whatsapp,
        contact_phone: phone.to_owned(),
    }
}

#[tokio::test]
async fn registering_a_dimension_updates_the_stored_score() {
    let store = setup_store().await;
    let registry = registry_over(&store);
    let ctx = ctx_with_lead(&store, "+5511955550001").await;

    let outcome = registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "budget",
                "value": "R$ 20 mil",
                "confidence": "high",
            }),
            &ctx,
        )
        .await;
    assert!(outcome.success);
    assert_eq!(
        outcome.message,
        "Dimensão budget registrada. Pontuação de qualificação atual: 30/100."
    );

    let lead = store
        .find_lead_by_phone("+5511955550001")
        .await
        .expect("lookup")
        .expect("lead present");
    assert_eq!(lead.bant_score, 30);
}

#[tokio::test]
async fn re_registering_a_dimension_replaces_its_contribution() {
    let store = setup_store().await;
    let registry = registry_over(&store);
    let ctx = ctx_with_lead(&store, "+5511955550002").await;

    registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "budget",
                "value": "R$ 20 mil",
                "confidence": "high",
            }),
            &ctx,
        )
        .await;
    // The lead walked it back; the new reading replaces the old one.
    let outcome = registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "budget",
                "value": "talvez uns R$ 5 mil",
                "confidence": "low",
            }),
            &ctx,
        )
        .await;
    assert!(outcome.success);

    let lead = store
        .find_lead_by_phone("+5511955550002")
        .await
        .expect("lookup")
        .expect("lead present");
    assert_eq!(lead.bant_score, 9);
}

#[tokio::test]
async fn recompute_reports_the_missing_dimensions() {
    let store = setup_store().await;
    let registry = registry_over(&store);
    let ctx = ctx_with_lead(&store, "+5511955550003").await;

    registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "budget",
                "value": "R$ 20 mil",
                "confidence": "high",
            }),
            &ctx,
        )
        .await;
    registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "timeline",
                "value": "quer lançar em dois meses",
                "confidence": "medium",
            }),
            &ctx,
        )
        .await;

    let outcome = registry
        .execute("recompute_bant_score", &serde_json::json!({}), &ctx)
        .await;
    assert!(outcome.success);
    // budget 30 at high + timeline 20 at medium (60%) = 42.
    assert!(outcome.message.contains("42/100"));
    assert!(outcome.message.contains("authority, need"));
    let data = outcome.data.expect("data present");
    assert_eq!(data["missing"], serde_json::json!(["authority", "need"]));
}

#[tokio::test]
async fn qualification_tools_need_a_lead() {
    let store = setup_store().await;
    let registry = registry_over(&store);
    let ctx = ToolContext {
        lead_id: None,
        conversation_id: None,
        channel: Channel::Whatsapp,
        contact_phone: "+5511955550004".to_owned(),
    };

    let outcome = registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "budget",
                "value": "R$ 20 mil",
                "confidence": "high",
            }),
            &ctx,
        )
        .await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("Registre o lead primeiro"));

    let outcome = registry
        .execute("recompute_bant_score", &serde_json::json!({}), &ctx)
        .await;
    assert!(!outcome.success);
}

#[tokio::test]
async fn unknown_dimension_values_are_refused() {
    let store = setup_store().await;
    let registry = registry_over(&store);
    let ctx = ctx_with_lead(&store, "+5511955550005").await;

    let outcome = registry
        .execute(
            "register_bant",
            &serde_json::json!({
                "dimension": "charisma",
                "value": "alto",
                "confidence": "high",
            }),
            &ctx,
        )
        .await;
    assert!(!outcome.success);

    let lead = store
        .find_lead_by_phone("+5511955550005")
        .await
        .expect("lookup")
        .expect("lead present");
    assert_eq!(lead.bant_score, 0);
}

//! Tests for registry wiring: catalogs, unknown names, and the audit trail.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use armitage::calendar::{CalendarError, CalendarEvent, CalendarProvider, CreatedEvent, EventRequest};
use armitage::config::Config;
use armitage::gateway::{GatewayError, MessagingGateway};
use armitage::knowledge::KnowledgeClient;
use armitage::scheduling::reservation::ReservationManager;
use armitage::store::{Channel, Store};
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

fn full_registry(store: &Arc<Store>) -> ToolRegistry {
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

fn anonymous_ctx() -> ToolContext {
    ToolContext {
        lead_id: None,
        conversation_id: None,
        channel: Channel::Whatsapp,
        contact_phone: "+5511933330001".to_owned(),
    }
}

#[tokio::test]
async fn every_catalog_entry_resolves() {
    let store = setup_store().await;
    let registry = full_registry(&store);
    registry.validate_catalogs().expect("catalogs resolve");
}

#[tokio::test]
async fn webchat_omits_document_delivery() {
    let store = setup_store().await;
    let registry = full_registry(&store);

    let whatsapp = registry.definitions_for(Channel::Whatsapp);
    let webchat = registry.definitions_for(Channel::Webchat);
    assert_eq!(whatsapp.len(), 11);
    assert_eq!(webchat.len(), 10);

    assert!(whatsapp.iter().any(|d| d.name == "send_presentation"));
    assert!(!webchat.iter().any(|d| d.name == "send_presentation"));
    // Everything else is shared.
    for definition in &webchat {
        assert!(whatsapp.iter().any(|d| d.name == definition.name));
    }
}

#[tokio::test]
async fn unknown_tool_names_fail_softly_and_are_logged() {
    let store = setup_store().await;
    let registry = full_registry(&store);

    let outcome = registry
        .execute("levitate", &serde_json::json!({}), &anonymous_ctx())
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Essa ação não está disponível.");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row: (String, i64) = sqlx::query_as(
        "SELECT tool_name, success FROM tool_execution_log WHERE tool_name = 'levitate'",
    )
    .fetch_one(store.pool())
    .await
    .expect("log row");
    assert_eq!(row.0, "levitate");
    assert_eq!(row.1, 0);
}

#[tokio::test]
async fn invalid_arguments_become_a_polite_refusal() {
    let store = setup_store().await;
    let registry = full_registry(&store);

    // create_lead requires a name.
    let outcome = registry
        .execute("create_lead", &serde_json::json!({}), &anonymous_ctx())
        .await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.message,
        "Não consegui concluir essa ação agora. Pode tentar novamente em instantes?"
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tool_execution_log WHERE tool_name = 'create_lead' AND success = 0",
    )
    .fetch_one(store.pool())
    .await
    .expect("log row");
    assert_eq!(row.0, 1);
}

#[tokio::test]
async fn successful_calls_are_logged_with_context_ids() {
    let store = setup_store().await;
    let registry = full_registry(&store);

    let outcome = registry
        .execute(
            "create_lead",
            &serde_json::json!({ "name": "Ana Souza" }),
            &anonymous_ctx(),
        )
        .await;
    assert!(outcome.success);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row: (String, i64) = sqlx::query_as(
        "SELECT arguments, success FROM tool_execution_log WHERE tool_name = 'create_lead'",
    )
    .fetch_one(store.pool())
    .await
    .expect("log row");
    assert!(row.0.contains("Ana Souza"));
    assert_eq!(row.1, 1);
}

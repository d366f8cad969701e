//! End-to-end turn pipeline tests driven by a scripted model.
//!
//! The provider below replays a fixed sequence of completions, so every test
//! controls exactly what the "model" says and observes what the pipeline does
//! with it: persistence, tool execution, canned shortcuts, and fallbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use armitage::agent::breaker::{DegradedModeBreaker, DEGRADED_REPLY};
use armitage::agent::ratelimit::RateLimiter;
use armitage::agent::{Orchestrator, OrchestratorDeps, PipelineError, TurnRequest};
use armitage::calendar::{CalendarError, CalendarEvent, CalendarProvider, CreatedEvent, EventRequest};
use armitage::config::Config;
use armitage::gateway::{GatewayError, MessagingGateway};
use armitage::knowledge::KnowledgeClient;
use armitage::prompts::PromptLibrary;
use armitage::providers::{
    CompletionRequest, CompletionResponse, ContentPart, LlmProvider, ProviderError, StopReason,
    UsageStats,
};
use armitage::scheduling::reservation::ReservationManager;
use armitage::store::{Channel, FunnelStage, MessageRole, NewLead, Store};
use armitage::tools::{build_registry, RegistryDeps};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays a fixed script of completions and counts how often it is asked.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<CompletionResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".to_owned())))
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn model_id(&self) -> &str {
        "test/scripted"
    }
}

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

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

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

/// Wire a full orchestrator over fakes. The prompts directory does not
/// exist, so the built-in channel instructions apply.
fn orchestrator_over(
    store: &Arc<Store>,
    provider: &Arc<ScriptedProvider>,
    breaker: &Arc<DegradedModeBreaker>,
    limiter: RateLimiter,
) -> Orchestrator {
    let config = Config::default();
    let calendar: Arc<dyn CalendarProvider> = Arc::new(FakeCalendar);
    let gateway: Arc<dyn MessagingGateway> = Arc::new(FakeGateway);
    let reservations = Arc::new(ReservationManager::new(
        Arc::clone(store),
        calendar,
        config.booking.clone(),
        config.business.clone(),
    ));
    let registry = Arc::new(build_registry(RegistryDeps {
        store: Arc::clone(store),
        reservations,
        gateway,
        knowledge: Arc::new(KnowledgeClient::new(&config.knowledge)),
        bant: config.bant.clone(),
        business: config.business.clone(),
        gateway_config: config.gateway.clone(),
    }));
    let prompts = PromptLibrary::new_without_watcher(
        std::env::temp_dir().join("armitage-tests-no-prompts"),
    )
    .expect("prompt library");

    Orchestrator::new(
        OrchestratorDeps {
            store: Arc::clone(store),
            provider: Arc::clone(provider) as Arc<dyn LlmProvider>,
            registry,
            prompts,
            breaker: Arc::clone(breaker),
            limiter: Arc::new(limiter),
        },
        &config,
    )
}

fn default_breaker() -> Arc<DegradedModeBreaker> {
    Arc::new(DegradedModeBreaker::new(&Config::default().breaker))
}

fn open_limiter() -> RateLimiter {
    RateLimiter::new(3600, 10_000)
}

fn text_response(text: &str) -> Result<CompletionResponse, ProviderError> {
    Ok(CompletionResponse {
        content: vec![ContentPart::Text {
            text: text.to_owned(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: UsageStats {
            input_tokens: 120,
            output_tokens: 40,
        },
        model: "test/scripted".to_owned(),
    })
}

fn whatsapp_turn(contact: &str, text: &str) -> TurnRequest {
    TurnRequest {
        channel: Channel::Whatsapp,
        contact_handle: contact.to_owned(),
        message_text: text.to_owned(),
        conversation_id: None,
    }
}

async fn setup_lead(store: &Store, phone: &str) -> i64 {
    store
        .create_lead(
            phone,
            NewLead {
                name: Some("Ana Souza".to_owned()),
                ..NewLead::default()
            },
        )
        .await
        .expect("create lead")
        .id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn a_plain_text_turn_replies_and_persists_both_sides() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![text_response(
        "Que ótimo! Me conta um pouco mais sobre o que você imagina para o site.",
    )]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    let lead_id = setup_lead(&store, "+5511987650001").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn(
            "+5511987650001",
            "quero um site para minha padaria",
        ))
        .await
        .expect("turn");

    assert_eq!(outcome.intent, "interest");
    let reply = outcome.reply.expect("reply present");
    assert!(reply.contains("site"));
    assert_eq!(provider.calls(), 1);

    // Message appends ride the background writer.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let conversation = store
        .find_or_create_conversation(lead_id, Channel::Whatsapp)
        .await
        .expect("conversation");
    let messages = store
        .recent_messages(conversation.id, 10)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, reply);

    // A fresh lead leaves the turn with a nurture follow-up queued.
    assert!(store
        .pending_follow_up_exists(lead_id)
        .await
        .expect("follow-up check"));
}

#[tokio::test]
async fn a_confident_greeting_skips_the_model() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    setup_lead(&store, "+5511987650002").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn("+5511987650002", "oi"))
        .await
        .expect("turn");

    assert_eq!(outcome.intent, "greeting");
    let reply = outcome.reply.expect("reply present");
    assert!(
        reply.starts_with("Oi") || reply.starts_with("Olá"),
        "unexpected canned reply: {reply}"
    );
    assert!(reply.contains("Ana"));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn blocked_contacts_are_ignored_silently() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    setup_lead(&store, "+5511987650003").await;
    store
        .block_contact("+5511987650003", Some("spam"))
        .await
        .expect("block");

    let outcome = orchestrator
        .handle_turn(whatsapp_turn("+5511987650003", "oi"))
        .await
        .expect("turn");

    assert_eq!(outcome.reply, None);
    assert_eq!(outcome.intent, "blocked");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn the_inbound_ceiling_rejects_the_turn() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = orchestrator_over(
        &store,
        &provider,
        &default_breaker(),
        RateLimiter::new(3600, 0),
    );

    let result = orchestrator
        .handle_turn(whatsapp_turn("+5511987650004", "oi"))
        .await;

    assert!(matches!(result, Err(PipelineError::RateLimited)));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn a_degraded_breaker_serves_the_canned_reply_without_the_model() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![]);
    let breaker = default_breaker();
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert!(breaker.is_degraded());
    let orchestrator = orchestrator_over(&store, &provider, &breaker, open_limiter());

    setup_lead(&store, "+5511987650005").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn("+5511987650005", "quero um site"))
        .await
        .expect("turn");

    assert_eq!(outcome.reply.as_deref(), Some(DEGRADED_REPLY));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn a_model_failure_degrades_the_turn_but_still_replies() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![Err(ProviderError::Unavailable(
        "upstream down".to_owned(),
    ))]);
    let breaker = default_breaker();
    let orchestrator = orchestrator_over(&store, &provider, &breaker, open_limiter());

    setup_lead(&store, "+5511987650006").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn("+5511987650006", "quero um site"))
        .await
        .expect("turn");

    assert_eq!(outcome.reply.as_deref(), Some(DEGRADED_REPLY));
    assert_eq!(provider.calls(), 1);
    assert_eq!(breaker.failure_count(), 1);
}

#[tokio::test]
async fn duplicate_tool_calls_in_one_batch_execute_once() {
    let store = setup_store().await;
    let stage_move = serde_json::json!({ "stage": "second_contact" });
    let provider = ScriptedProvider::new(vec![
        Ok(CompletionResponse {
            content: vec![
                ContentPart::ToolUse {
                    id: "call-1".to_owned(),
                    name: "update_funnel_stage".to_owned(),
                    input: stage_move.clone(),
                },
                ContentPart::ToolUse {
                    id: "call-2".to_owned(),
                    name: "update_funnel_stage".to_owned(),
                    input: stage_move,
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: UsageStats {
                input_tokens: 200,
                output_tokens: 30,
            },
            model: "test/scripted".to_owned(),
        }),
        text_response("Perfeito, anotado por aqui. Quer ver os horários disponíveis?"),
    ]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    let lead_id = setup_lead(&store, "+5511987650007").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn(
            "+5511987650007",
            "quero um site para minha loja",
        ))
        .await
        .expect("turn");

    assert_eq!(provider.calls(), 2);
    let reply = outcome.reply.expect("reply present");
    assert!(reply.contains("horários"));

    let lead = store
        .find_lead_by_id(lead_id)
        .await
        .expect("reload")
        .expect("lead present");
    assert_eq!(lead.stage, FunnelStage::SecondContact);

    // Both tool_use ids shared one execution; only one invocation was logged.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let logged: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tool_execution_log WHERE tool_name = 'update_funnel_stage'",
    )
    .fetch_one(store.pool())
    .await
    .expect("count");
    assert_eq!(logged.0, 1);
}

#[tokio::test]
async fn a_leaky_reply_is_replaced_by_the_fallback() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![text_response(
        "Conforme o prompt do sistema, vou te oferecer uma reunião amanhã.",
    )]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    setup_lead(&store, "+5511987650008").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn("+5511987650008", "quero um site"))
        .await
        .expect("turn");

    let reply = outcome.reply.expect("reply present");
    assert_eq!(
        reply,
        "Desculpe, me confundi na resposta. Vamos recomeçar: como posso te ajudar hoje?"
    );
}

#[tokio::test]
async fn an_unknown_contact_gets_a_reply_but_nothing_is_persisted() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![text_response(
        "Claro! Me conta seu nome e o que você precisa, por favor.",
    )]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    let outcome = orchestrator
        .handle_turn(TurnRequest {
            channel: Channel::Webchat,
            contact_handle: "visitor-91f3".to_owned(),
            message_text: "quero um site".to_owned(),
            conversation_id: None,
        })
        .await
        .expect("turn");

    assert!(outcome.reply.is_some());
    assert_eq!(provider.calls(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store
        .find_lead_by_phone("visitor-91f3")
        .await
        .expect("lookup")
        .is_none());
    let conversations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(conversations.0, 0);
}

#[tokio::test]
async fn a_session_from_another_channel_falls_back_to_the_lead_thread() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![text_response(
        "Entendi! Vamos seguir por aqui mesmo, então.",
    )]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    let lead_id = setup_lead(&store, "+5511987650009").await;
    let webchat = store
        .find_or_create_conversation(lead_id, Channel::Webchat)
        .await
        .expect("webchat thread");

    let outcome = orchestrator
        .handle_turn(TurnRequest {
            channel: Channel::Whatsapp,
            contact_handle: "+5511987650009".to_owned(),
            message_text: "quero um site".to_owned(),
            conversation_id: Some(webchat.session_id.clone()),
        })
        .await
        .expect("turn");
    assert!(outcome.reply.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let whatsapp = store
        .find_or_create_conversation(lead_id, Channel::Whatsapp)
        .await
        .expect("whatsapp thread");
    assert_ne!(whatsapp.id, webchat.id);
    let on_whatsapp = store
        .recent_messages(whatsapp.id, 10)
        .await
        .expect("whatsapp messages");
    let on_webchat = store
        .recent_messages(webchat.id, 10)
        .await
        .expect("webchat messages");
    assert_eq!(on_whatsapp.len(), 2);
    assert!(on_webchat.is_empty());
}

#[tokio::test]
async fn a_handoff_request_executes_the_tool_from_the_shortcut() {
    let store = setup_store().await;
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = orchestrator_over(&store, &provider, &default_breaker(), open_limiter());

    let lead_id = setup_lead(&store, "+5511987650010").await;
    let outcome = orchestrator
        .handle_turn(whatsapp_turn(
            "+5511987650010",
            "quero falar com um humano",
        ))
        .await
        .expect("turn");

    assert_eq!(outcome.intent, "human_request");
    assert!(outcome.reply.is_some());
    assert_eq!(provider.calls(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM activity_log WHERE kind = 'handoff_requested' AND lead_id = ?1",
    )
    .bind(lead_id)
    .fetch_one(store.pool())
    .await
    .expect("handoff activity");
    assert_eq!(row.0, 1);
}

//! Tool execution: the side-effecting functions the model can call.
//!
//! Every tool is registered under a name in a [`ToolRegistry`] validated at
//! startup, so an unknown name in a channel catalog is a configuration error
//! rather than a runtime surprise. Execution never raises to the caller: the
//! registry converts failures into unsuccessful [`ToolOutcome`]s whose
//! `message` is Portuguese text the model can relay, and logs every
//! invocation with its latency to the audit trail.

pub mod bant;
pub mod channel;
pub mod crm;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::providers::ToolDefinition;
use crate::store::{Channel, Lead, Store, StoreError};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Errors raised inside a tool implementation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The model supplied missing or malformed arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tool started but could not finish.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Per-turn context handed to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The resolved lead, when one existed at turn start.
    pub lead_id: Option<i64>,

    /// The conversation being served, when one exists.
    pub conversation_id: Option<i64>,

    /// Channel the turn arrived on.
    pub channel: Channel,

    /// Contact handle of the person talking to us.
    pub contact_phone: String,
}

/// Result of a tool invocation.
///
/// `message` is always natural language for the model's follow-up context;
/// `data` carries the structured form for the audit trail and tests.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Whether the side effect happened.
    pub success: bool,

    /// Natural-language summary, in the deployment locale.
    pub message: String,

    /// Structured details, when the tool has any.
    pub data: Option<serde_json::Value>,
}

impl ToolOutcome {
    /// Successful outcome with a message only.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Successful outcome with structured details attached.
    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Failed outcome; the message explains the refusal in natural language.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait and registry
// ---------------------------------------------------------------------------

/// A callable tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description, and JSON Schema advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on invalid arguments or store failure; the
    /// registry converts errors into failed outcomes.
    async fn run(&self, ctx: &ToolContext, input: &serde_json::Value)
        -> Result<ToolOutcome, ToolError>;
}

/// Tool names advertised on the WhatsApp channel.
pub const WHATSAPP_CATALOG: &[&str] = &[
    "create_lead",
    "update_lead",
    "update_funnel_stage",
    "register_bant",
    "recompute_bant_score",
    "request_handoff",
    "send_presentation",
    "search_slots",
    "book_slot",
    "cancel_meeting",
    "search_knowledge",
];

/// Tool names advertised on the web chat channel. Document delivery needs a
/// messaging address, so the presentation tool is WhatsApp-only.
pub const WEBCHAT_CATALOG: &[&str] = &[
    "create_lead",
    "update_lead",
    "update_funnel_stage",
    "register_bant",
    "recompute_bant_score",
    "request_handoff",
    "search_slots",
    "book_slot",
    "cancel_meeting",
    "search_knowledge",
];

/// Registry mapping tool names to handlers, with per-channel catalogs.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    store: Arc<Store>,
}

impl ToolRegistry {
    /// Build an empty registry over the audit store.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            tools: HashMap::new(),
            store,
        }
    }

    /// Register a tool under a name.
    pub fn register(&mut self, name: &'static str, tool: Arc<dyn Tool>) {
        self.tools.insert(name, tool);
    }

    /// Verify every catalog entry resolves to a registered tool.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unresolvable catalog entry.
    pub fn validate_catalogs(&self) -> anyhow::Result<()> {
        for name in WHATSAPP_CATALOG.iter().chain(WEBCHAT_CATALOG) {
            if !self.tools.contains_key(name) {
                anyhow::bail!("tool catalog references unregistered tool: {name}");
            }
        }
        Ok(())
    }

    /// Definitions for the catalog of a channel, in catalog order.
    pub fn definitions_for(&self, channel: Channel) -> Vec<ToolDefinition> {
        let catalog = match channel {
            Channel::Whatsapp => WHATSAPP_CATALOG,
            Channel::Webchat => WEBCHAT_CATALOG,
        };
        catalog
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Execute a tool by name, logging the invocation regardless of outcome.
    ///
    /// Unknown names and tool errors come back as failed outcomes, never as
    /// panics or raised errors.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        let started = Instant::now();
        debug!(tool = name, channel = %ctx.channel, "executing tool");

        let outcome = match self.tools.get(name) {
            Some(tool) => match tool.run(ctx, arguments).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(tool = name, error = %e, "tool execution failed");
                    ToolOutcome::fail(
                        "Não consegui concluir essa ação agora. Pode tentar novamente em \
                         instantes?",
                    )
                }
            },
            None => {
                warn!(tool = name, "model requested unknown tool");
                ToolOutcome::fail("Essa ação não está disponível.")
            }
        };

        if let Err(e) = self.store.log_tool_execution(
            name,
            arguments,
            &outcome.message,
            outcome.success,
            started.elapsed(),
            ctx.lead_id,
            ctx.conversation_id,
        ) {
            warn!(tool = name, error = %e, "failed to log tool execution");
        }

        outcome
    }
}

/// Everything the full tool set needs at construction time.
pub struct RegistryDeps {
    /// Persistence layer.
    pub store: Arc<Store>,
    /// Booking and cancellation manager.
    pub reservations: Arc<crate::scheduling::reservation::ReservationManager>,
    /// Outbound messaging gateway.
    pub gateway: Arc<dyn crate::gateway::MessagingGateway>,
    /// Knowledge base client.
    pub knowledge: Arc<crate::knowledge::KnowledgeClient>,
    /// Qualification weight table.
    pub bant: crate::config::BantConfig,
    /// Business identity.
    pub business: crate::config::BusinessConfig,
    /// Gateway settings, for handoff notification.
    pub gateway_config: crate::config::GatewayConfig,
}

/// Build the production registry with every tool registered.
pub fn build_registry(deps: RegistryDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::new(Arc::clone(&deps.store));
    registry.register(
        "create_lead",
        Arc::new(crm::CreateLeadTool::new(Arc::clone(&deps.store))),
    );
    registry.register(
        "update_lead",
        Arc::new(crm::UpdateLeadTool::new(Arc::clone(&deps.store))),
    );
    registry.register(
        "update_funnel_stage",
        Arc::new(crm::UpdateFunnelStageTool::new(Arc::clone(&deps.store))),
    );
    registry.register(
        "register_bant",
        Arc::new(bant::RegisterBantTool::new(
            Arc::clone(&deps.store),
            deps.bant.clone(),
        )),
    );
    registry.register(
        "recompute_bant_score",
        Arc::new(bant::RecomputeBantScoreTool::new(
            Arc::clone(&deps.store),
            deps.bant,
        )),
    );
    registry.register(
        "request_handoff",
        Arc::new(crm::RequestHandoffTool::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.gateway),
            deps.gateway_config,
        )),
    );
    registry.register(
        "send_presentation",
        Arc::new(channel::SendPresentationTool::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.gateway),
            deps.business,
        )),
    );
    registry.register(
        "search_slots",
        Arc::new(channel::SearchSlotsTool::new(Arc::clone(&deps.store))),
    );
    registry.register(
        "book_slot",
        Arc::new(channel::BookSlotTool::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.reservations),
        )),
    );
    registry.register(
        "cancel_meeting",
        Arc::new(channel::CancelMeetingTool::new(
            Arc::clone(&deps.store),
            deps.reservations,
        )),
    );
    registry.register(
        "search_knowledge",
        Arc::new(channel::SearchKnowledgeTool::new(deps.knowledge)),
    );
    registry
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Resolve the lead for a tool call: the context's lead when present,
/// otherwise a lookup by contact handle (the lead may have been created by
/// an earlier tool in the same batch).
pub(crate) async fn resolve_lead(
    store: &Store,
    ctx: &ToolContext,
) -> Result<Option<Lead>, ToolError> {
    if let Some(id) = ctx.lead_id {
        if let Some(lead) = store.find_lead_by_id(id).await? {
            return Ok(Some(lead));
        }
    }
    Ok(store.find_lead_by_phone(&ctx.contact_phone).await?)
}

/// Portuguese refusal used when a tool needs a lead that does not exist yet.
pub(crate) const NO_LEAD_MESSAGE: &str =
    "Ainda não tenho um cadastro para este contato. Registre o lead primeiro com o nome \
     e o interesse dele.";

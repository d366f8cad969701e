//! The turn pipeline: one inbound message in, exactly one reply out.
//!
//! Stages run in a fixed order and each may short-circuit with a final
//! reply: rate limit, block list, lead and conversation resolution, history,
//! enrichment, quick-reply shortcut, then the LLM with tools, sanitation,
//! validation, persistence, and follow-up scheduling. Tool effects commit as
//! they run; a later failure never rolls them back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::agent::breaker::{DegradedModeBreaker, DEGRADED_REPLY};
use crate::agent::context::{
    assemble_system_prompt, history_to_messages, merge_derived_context, PromptInputs,
};
use crate::agent::ratelimit::RateLimiter;
use crate::agent::validator::{sanitize_reply, validate};
use crate::classify::{classify_intent, classify_sentiment, IntentClassification, Sentiment};
use crate::config::{BusinessConfig, Config, LimitsConfig, LlmConfig};
use crate::prompts::PromptLibrary;
use crate::providers::{
    CompletionRequest, ContentPart, LlmProvider, Message, MessageContent, Role, StopReason,
};
use crate::quickreply;
use crate::scheduling::followup;
use crate::scheduling::storage_timestamp;
use crate::store::conversations::Conversation;
use crate::store::leads::Lead;
use crate::store::{Channel, MessageRole, Store, StoreError};
use crate::tools::{ToolContext, ToolRegistry, WHATSAPP_CATALOG};

/// Bounded timeout for one LLM call; expiry counts as an LLM failure.
const LLM_CALL_TIMEOUT_SECS: u64 = 45;

// ---------------------------------------------------------------------------
// Request / outcome / errors
// ---------------------------------------------------------------------------

/// One inbound message to handle.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Channel the message arrived on.
    pub channel: Channel,
    /// Contact handle (phone number or web visitor id).
    pub contact_handle: String,
    /// The message text.
    pub message_text: String,
    /// Session id of an existing conversation, when the caller knows it.
    pub conversation_id: Option<String>,
}

/// The result of a handled turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Reply to send back; `None` means handled silently (blocked contact).
    pub reply: Option<String>,
    /// Detected intent label.
    pub intent: &'static str,
    /// Detected sentiment label.
    pub sentiment: &'static str,
    /// Wall-clock time spent on the turn.
    pub duration_ms: u64,
}

/// Errors surfaced to the caller; everything else resolves to a reply.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The system-wide inbound ceiling was hit.
    #[error("rate limit exceeded")]
    RateLimited,
    /// The turn ran past its overall deadline.
    #[error("turn deadline exceeded")]
    DeadlineExceeded,
    /// A store read or write needed by the pipeline failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Construction-time dependencies of the [`Orchestrator`].
pub struct OrchestratorDeps {
    /// Persistence layer.
    pub store: Arc<Store>,
    /// LLM provider.
    pub provider: Arc<dyn LlmProvider>,
    /// Tool registry.
    pub registry: Arc<ToolRegistry>,
    /// Channel instruction library.
    pub prompts: Arc<PromptLibrary>,
    /// LLM failure breaker, process-wide.
    pub breaker: Arc<DegradedModeBreaker>,
    /// Inbound rate limiter, process-wide.
    pub limiter: Arc<RateLimiter>,
}

/// Drives the turn pipeline.
pub struct Orchestrator {
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    prompts: Arc<PromptLibrary>,
    breaker: Arc<DegradedModeBreaker>,
    limiter: Arc<RateLimiter>,
    business: BusinessConfig,
    limits: LimitsConfig,
    llm: LlmConfig,
    turn_deadline: Duration,
}

impl Orchestrator {
    /// Build the orchestrator from its dependencies and configuration.
    pub fn new(deps: OrchestratorDeps, config: &Config) -> Self {
        Self {
            store: deps.store,
            provider: deps.provider,
            registry: deps.registry,
            prompts: deps.prompts,
            breaker: deps.breaker,
            limiter: deps.limiter,
            business: config.business.clone(),
            limits: config.limits.clone(),
            llm: config.llm.clone(),
            turn_deadline: Duration::from_secs(config.service.turn_deadline_secs),
        }
    }

    /// Handle one inbound message end to end.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RateLimited`] when the inbound ceiling is
    /// hit, [`PipelineError::DeadlineExceeded`] when the turn overruns its
    /// deadline, and [`PipelineError::Store`] when a required store
    /// operation fails. Tool effects that committed before a failure stay
    /// committed.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome, PipelineError> {
        let started = Instant::now();
        match tokio::time::timeout(self.turn_deadline, self.run_turn(&request)).await {
            Ok(Ok(mut outcome)) => {
                outcome.duration_ms =
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                Ok(outcome)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    contact = %request.contact_handle,
                    deadline_secs = self.turn_deadline.as_secs(),
                    "turn deadline exceeded"
                );
                Err(PipelineError::DeadlineExceeded)
            }
        }
    }

    async fn run_turn(&self, request: &TurnRequest) -> Result<TurnOutcome, PipelineError> {
        // Stage 1: rate limit, system-wide.
        if !self.limiter.admit() {
            if let Err(e) = self.store.log_activity(
                None,
                "rate_limited",
                &format!("Mensagem recusada por limite de volume ({})", request.contact_handle),
            ) {
                warn!(error = %e, "failed to log rate limit event");
            }
            return Err(PipelineError::RateLimited);
        }

        // Stage 2: block list. Silent success, no reply.
        if self.store.is_contact_blocked(&request.contact_handle).await? {
            info!(contact = %request.contact_handle, "blocked contact ignored");
            return Ok(TurnOutcome {
                reply: None,
                intent: "blocked",
                sentiment: Sentiment::Neutral.as_str(),
                duration_ms: 0,
            });
        }

        // Stage 3: lead resolution. Absent lead means an ephemeral context;
        // only the create_lead tool materializes one.
        let mut lead = self
            .store
            .find_lead_by_phone(&request.contact_handle)
            .await?;

        // Stage 4: conversation resolution. Without a lead there is nothing
        // to attach messages to, so persistence is skipped for the turn.
        let conversation = self.resolve_conversation(request, lead.as_ref()).await?;
        if let (None, Some(conv)) = (&lead, &conversation) {
            lead = self.store.find_lead_by_id(conv.lead_id).await?;
        }

        // Stage 5: history, chronological.
        let history = match &conversation {
            Some(conv) => {
                self.store
                    .recent_messages(conv.id, self.limits.history_messages)
                    .await?
            }
            None => Vec::new(),
        };

        // Stage 6: enrichment. Classifier output feeds the prompt; the
        // derived-context write is best-effort.
        let intent = classify_intent(&request.message_text);
        let sentiment = classify_sentiment(&request.message_text);
        let bant_details = match &lead {
            Some(lead) => self.store.bant_details(lead.id).await.unwrap_or_default(),
            None => Vec::new(),
        };
        if let Some(conv) = &conversation {
            let mut derived = merge_derived_context(
                Some(conv),
                &request.message_text,
                &history,
                sentiment,
            );
            if let Some(lead) = &lead {
                derived.bant_snapshot = Some(json!({
                    "score": lead.bant_score,
                    "registered": bant_details
                        .iter()
                        .map(|d| d.dimension.as_str())
                        .collect::<Vec<_>>(),
                }));
            }
            if let Err(e) = self.store.update_derived_context(conv.id, &derived) {
                warn!(conversation_id = conv.id, error = %e, "derived context update failed");
            }
            if let Err(e) = self.store.append_message(
                conv.id,
                MessageRole::User,
                request.channel,
                &request.message_text,
            ) {
                warn!(conversation_id = conv.id, error = %e, "inbound message append failed");
            }
        }

        let tool_ctx = ToolContext {
            lead_id: lead.as_ref().map(|l| l.id),
            conversation_id: conversation.as_ref().map(|c| c.id),
            channel: request.channel,
            contact_phone: request.contact_handle.clone(),
        };

        // Stage 7: quick-reply shortcut for high-confidence intents.
        if let Some(quick) =
            quickreply::resolve(&intent, lead.as_ref(), self.limits.quick_reply_threshold)
        {
            debug!(intent = intent.intent.as_str(), "serving quick reply");
            if let Some(tool) = &quick.tool {
                self.registry
                    .execute(tool.name, &tool.arguments, &tool_ctx)
                    .await;
            }
            return self
                .finish_turn(request, conversation.as_ref(), quick.reply, intent, sentiment)
                .await;
        }

        // Degraded mode: skip the model entirely, serve the canned apology.
        if self.breaker.is_degraded() {
            info!(contact = %request.contact_handle, "breaker degraded, serving canned reply");
            return self
                .finish_turn(
                    request,
                    conversation.as_ref(),
                    DEGRADED_REPLY.to_owned(),
                    intent,
                    sentiment,
                )
                .await;
        }

        // Stage 8: prompt assembly.
        let next_meeting = match &lead {
            Some(lead) => {
                self.store
                    .next_active_meeting(lead.id, &storage_timestamp(Utc::now()))
                    .await?
            }
            None => None,
        };
        let instructions = self.prompts.instructions_for(request.channel);
        let system = assemble_system_prompt(&PromptInputs {
            instructions: &instructions,
            business: &self.business,
            lead: lead.as_ref(),
            bant_details: &bant_details,
            next_meeting: next_meeting.as_ref(),
            conversation: conversation.as_ref(),
            intent,
            sentiment,
            now: Utc::now(),
        });
        let tools = self.registry.definitions_for(request.channel);

        let mut messages = history_to_messages(&history);
        messages.push(Message {
            role: Role::User,
            content: MessageContent::Text(request.message_text.clone()),
        });

        // Stages 9-10: LLM call, tool execution, follow-up call, sanitation.
        // The WhatsApp catalog is the full tool-name set, so sanitation
        // covers replies on either channel.
        let reply = match self
            .run_completion(&system, &tools, messages, &tool_ctx)
            .await
        {
            Some(text) => sanitize_reply(&text, WHATSAPP_CATALOG),
            None => DEGRADED_REPLY.to_owned(),
        };

        // Stage 11: validation with fixed fallbacks.
        let reply = match validate(&reply) {
            Ok(()) => reply,
            Err(reason) => {
                warn!(reason = ?reason, "reply rejected by validator");
                reason.fallback_message().to_owned()
            }
        };

        self.finish_turn(request, conversation.as_ref(), reply, intent, sentiment)
            .await
    }

    /// Stages 12-13: persist the assistant reply, schedule follow-ups,
    /// append the activity-log entry. All best-effort.
    async fn finish_turn(
        &self,
        request: &TurnRequest,
        conversation: Option<&Conversation>,
        reply: String,
        intent: IntentClassification,
        sentiment: Sentiment,
    ) -> Result<TurnOutcome, PipelineError> {
        if let Some(conv) = conversation {
            if let Err(e) =
                self.store
                    .append_message(conv.id, MessageRole::Assistant, request.channel, &reply)
            {
                warn!(conversation_id = conv.id, error = %e, "assistant message append failed");
            }
        }

        // Tools may have materialized or mutated the lead mid-turn.
        let lead = self
            .store
            .find_lead_by_phone(&request.contact_handle)
            .await
            .unwrap_or_default();
        if let Some(lead) = &lead {
            let now = Utc::now();
            match followup::schedule_for_lead(&self.store, lead, now, now).await {
                Ok(true) => debug!(lead_id = lead.id, "follow-up scheduled"),
                Ok(false) => {}
                Err(e) => warn!(lead_id = lead.id, error = %e, "follow-up scheduling failed"),
            }
            if let Err(e) = self.store.log_activity(
                Some(lead.id),
                "conversation_turn",
                &format!("Mensagem respondida (intenção: {})", intent.intent.as_str()),
            ) {
                warn!(lead_id = lead.id, error = %e, "activity log append failed");
            }
        }

        Ok(TurnOutcome {
            reply: Some(reply),
            intent: intent.intent.as_str(),
            sentiment: sentiment.as_str(),
            duration_ms: 0,
        })
    }

    async fn resolve_conversation(
        &self,
        request: &TurnRequest,
        lead: Option<&Lead>,
    ) -> Result<Option<Conversation>, PipelineError> {
        if let Some(session_id) = &request.conversation_id {
            if let Some(conv) = self.store.find_conversation_by_session(session_id).await? {
                if conv.channel == request.channel {
                    return Ok(Some(conv));
                }
                warn!(
                    session_id = %session_id,
                    "conversation session belongs to another channel, resolving by lead"
                );
            }
        }
        match lead {
            Some(lead) => Ok(Some(
                self.store
                    .find_or_create_conversation(lead.id, request.channel)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// One LLM request plus at most one tool round-trip.
    ///
    /// Returns `None` on LLM failure (already fed to the breaker).
    async fn run_completion(
        &self,
        system: &str,
        tools: &[crate::providers::ToolDefinition],
        mut messages: Vec<Message>,
        tool_ctx: &ToolContext,
    ) -> Option<String> {
        let response = self.complete_or_trip(system, tools, messages.clone()).await?;

        let has_tool_calls = response
            .content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolUse { .. }));
        if !has_tool_calls || response.stop_reason != StopReason::ToolUse {
            return Some(extract_text(&response.content));
        }

        // Tool phase: execute each requested call sequentially, deduplicating
        // identical (name, arguments) pairs inside the batch; every
        // tool_use_id still receives a result part.
        let mut executed: HashMap<(String, String), (String, bool)> = HashMap::new();
        let mut assistant_content: Vec<ContentPart> = Vec::new();
        let mut result_parts: Vec<ContentPart> = Vec::new();

        for part in &response.content {
            match part {
                ContentPart::Text { .. } => assistant_content.push(part.clone()),
                ContentPart::ToolUse { id, name, input } => {
                    assistant_content.push(part.clone());
                    let key = (name.clone(), input.to_string());
                    let (content, is_error) = match executed.get(&key) {
                        Some(cached) => {
                            debug!(tool = %name, "duplicate tool call in batch, reusing result");
                            cached.clone()
                        }
                        None => {
                            let outcome = self.registry.execute(name, input, tool_ctx).await;
                            let entry = (outcome.message, !outcome.success);
                            executed.insert(key, entry.clone());
                            entry
                        }
                    };
                    result_parts.push(ContentPart::ToolResult {
                        tool_use_id: id.clone(),
                        content,
                        is_error,
                    });
                }
                ContentPart::ToolResult { .. } => {}
            }
        }

        messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(assistant_content),
        });
        messages.push(Message {
            role: Role::User,
            content: MessageContent::Parts(result_parts),
        });

        // Single follow-up round-trip; further tool requests are not served.
        let follow_up = self.complete_or_trip(system, tools, messages).await?;
        Some(extract_text(&follow_up.content))
    }

    /// Call the provider with a bounded timeout, feeding the breaker.
    async fn complete_or_trip(
        &self,
        system: &str,
        tools: &[crate::providers::ToolDefinition],
        messages: Vec<Message>,
    ) -> Option<crate::providers::CompletionResponse> {
        let request = CompletionRequest {
            messages,
            system: Some(system.to_owned()),
            tools: tools.to_vec(),
            max_tokens: Some(self.llm.max_tokens),
            temperature: Some(self.llm.temperature),
            stop_sequences: vec![],
        };
        let call = self.provider.complete(request);
        match tokio::time::timeout(Duration::from_secs(LLM_CALL_TIMEOUT_SECS), call).await {
            Ok(Ok(response)) => {
                self.breaker.record_success();
                Some(response)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "LLM completion failed");
                self.breaker.record_failure();
                None
            }
            Err(_) => {
                warn!(timeout_secs = LLM_CALL_TIMEOUT_SECS, "LLM completion timed out");
                self.breaker.record_failure();
                None
            }
        }
    }
}

/// Join the text parts of a response, dropping tool chatter.
fn extract_text(content: &[ContentPart]) -> String {
    content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

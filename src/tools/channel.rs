//! Channel tools: presentation delivery, slot search, booking, cancellation,
//! and knowledge lookup.
//!
//! Booking and cancellation delegate to the reservation manager, which owns
//! the slot/meeting consistency rules; the tools here only translate between
//! model arguments and those calls, and phrase the outcome for the lead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::config::BusinessConfig;
use crate::gateway::MessagingGateway;
use crate::knowledge::KnowledgeClient;
use crate::providers::ToolDefinition;
use crate::scheduling::reservation::ReservationManager;
use crate::scheduling::{split_storage_timestamp, storage_timestamp, weekday_pt};
use crate::store::{FunnelStage, Store};
use crate::tools::{resolve_lead, Tool, ToolContext, ToolError, ToolOutcome, NO_LEAD_MESSAGE};

/// Most slots ever offered in one search reply.
const MAX_SLOT_RESULTS: u32 = 8;

/// Default and maximum width of the search window, in days.
const DEFAULT_SEARCH_DAYS: u32 = 7;
const MAX_SEARCH_DAYS: u32 = 30;

/// Human form of a slot, e.g. `segunda-feira, 14/09 às 10:00`.
pub(crate) fn format_slot_pt(date: &str, time: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => format!(
            "{}, {:02}/{:02} às {time}",
            weekday_pt(parsed.weekday()),
            parsed.day(),
            parsed.month()
        ),
        Err(_) => format!("{date} às {time}"),
    }
}

// ---------------------------------------------------------------------------
// send_presentation
// ---------------------------------------------------------------------------

/// Sends the company presentation document over the messaging gateway.
pub struct SendPresentationTool {
    store: Arc<Store>,
    gateway: Arc<dyn MessagingGateway>,
    business: BusinessConfig,
}

impl SendPresentationTool {
    /// Build the tool over the store and outbound gateway.
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<dyn MessagingGateway>,
        business: BusinessConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            business,
        }
    }
}

#[async_trait]
impl Tool for SendPresentationTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "send_presentation".to_owned(),
            description: "Envia a apresentação institucional em PDF para o lead pelo WhatsApp. \
                          Use quando o lead pedir mais informações sobre a empresa ou quando \
                          fizer sentido apresentar o portfólio."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let caption = format!("Apresentação da {}", self.business.company_name);
        if let Err(e) = self
            .gateway
            .send_document(&ctx.contact_phone, &self.business.presentation_url, &caption)
            .await
        {
            warn!(contact = %ctx.contact_phone, error = %e, "presentation send failed");
            return Ok(ToolOutcome::fail(
                "Não consegui enviar a apresentação agora. Tente novamente em instantes.",
            ));
        }

        // Advancing the funnel only makes sense from the initial stage; later
        // stages outrank a re-sent presentation.
        if let Some(lead) = resolve_lead(&self.store, ctx).await? {
            if lead.stage == FunnelStage::New {
                self.store
                    .update_lead_stage(lead.id, FunnelStage::PresentationSent)
                    .await?;
            }
            if let Err(e) = self.store.log_activity(
                Some(lead.id),
                "presentation_sent",
                "Apresentação institucional enviada",
            ) {
                warn!(lead_id = lead.id, error = %e, "failed to log presentation send");
            }
        }

        info!(contact = %ctx.contact_phone, "presentation sent");
        Ok(ToolOutcome::ok(
            "Apresentação enviada com sucesso. Pergunte ao lead o que achou.",
        ))
    }
}

// ---------------------------------------------------------------------------
// search_slots
// ---------------------------------------------------------------------------

/// Lists available meeting slots in a short window.
///
/// The outcome message carries a human list plus a machine block of
/// `date|time` pairs; the prompt instructs the model to copy a pair verbatim
/// into `book_slot`.
pub struct SearchSlotsTool {
    store: Arc<Store>,
}

impl SearchSlotsTool {
    /// Build the tool over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchSlotsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_slots".to_owned(),
            description: "Consulta os horários livres para reunião nos próximos dias. Sempre \
                          consulte antes de oferecer horários ao lead e ofereça apenas horários \
                          retornados aqui."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "from_date": {
                        "type": "string",
                        "description": "Data inicial no formato YYYY-MM-DD; omita para começar de hoje"
                    },
                    "days": {
                        "type": "integer",
                        "description": "Quantos dias pesquisar a partir da data inicial (padrão 7, máximo 30)"
                    }
                },
                "required": []
            }),
        }
    }

    async fn run(
        &self,
        _ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let today = Utc::now().date_naive();
        let from = match input.get("from_date").and_then(|v| v.as_str()) {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ToolError::InvalidInput(format!("invalid from_date: {raw}")))?,
            None => today,
        };
        let from = from.max(today);
        let days = input
            .get("days")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(DEFAULT_SEARCH_DAYS)
            .clamp(1, MAX_SEARCH_DAYS);
        let to = from
            .checked_add_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(from);

        let slots = self
            .store
            .available_slots(
                &from.format("%Y-%m-%d").to_string(),
                &to.format("%Y-%m-%d").to_string(),
                MAX_SLOT_RESULTS,
            )
            .await?;

        if slots.is_empty() {
            return Ok(ToolOutcome::ok(format!(
                "Nenhum horário livre entre {} e {}. Sugira ao lead pesquisar outra semana.",
                format_slot_pt(&from.format("%Y-%m-%d").to_string(), "00:00"),
                format_slot_pt(&to.format("%Y-%m-%d").to_string(), "00:00"),
            )));
        }

        let listing = slots
            .iter()
            .map(|slot| format!("- {}", format_slot_pt(&slot.slot_date, &slot.slot_time)))
            .collect::<Vec<_>>()
            .join("\n");
        let machine_block = slots
            .iter()
            .map(|slot| format!("{}|{}", slot.slot_date, slot.slot_time))
            .collect::<Vec<_>>()
            .join("\n");
        let data = slots
            .iter()
            .map(|slot| json!({ "date": slot.slot_date, "time": slot.slot_time }))
            .collect::<Vec<_>>();

        Ok(ToolOutcome::ok_with_data(
            format!("Horários livres:\n{listing}\n\nHORARIOS:\n{machine_block}"),
            json!({ "slots": data }),
        ))
    }
}

// ---------------------------------------------------------------------------
// book_slot
// ---------------------------------------------------------------------------

/// Books a meeting slot for the current lead.
pub struct BookSlotTool {
    store: Arc<Store>,
    reservations: Arc<ReservationManager>,
}

impl BookSlotTool {
    /// Build the tool over the store and reservation manager.
    pub fn new(store: Arc<Store>, reservations: Arc<ReservationManager>) -> Self {
        Self {
            store,
            reservations,
        }
    }
}

#[async_trait]
impl Tool for BookSlotTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "book_slot".to_owned(),
            description: "Agenda uma reunião no horário escolhido pelo lead. Use exatamente uma \
                          data e hora retornadas por search_slots, no bloco HORARIOS, sem \
                          alterar o formato."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "Data no formato YYYY-MM-DD, copiada do bloco HORARIOS"
                    },
                    "time": {
                        "type": "string",
                        "description": "Hora no formato HH:MM, copiada do bloco HORARIOS"
                    }
                },
                "required": ["date", "time"]
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let date = input
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: date".to_owned()))?;
        let time = input
            .get("time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: time".to_owned()))?;

        let Some(lead) = resolve_lead(&self.store, ctx).await? else {
            return Ok(ToolOutcome::fail(NO_LEAD_MESSAGE));
        };

        match self.reservations.reserve(&lead, date, time).await {
            Ok(booked) => {
                let when = format_slot_pt(date, time);
                let mut message = if booked.already_existed {
                    format!("A reunião de {when} já estava agendada para este lead.")
                } else {
                    format!("Reunião agendada para {when}.")
                };
                if let Some(url) = &booked.meeting.meeting_url {
                    message.push_str(&format!(" Link da chamada: {url}"));
                }
                Ok(ToolOutcome::ok_with_data(
                    message,
                    json!({
                        "meeting_id": booked.meeting.id,
                        "scheduled_at": booked.meeting.scheduled_at,
                        "meeting_url": booked.meeting.meeting_url,
                        "already_existed": booked.already_existed,
                    }),
                ))
            }
            Err(e) => {
                info!(lead_id = lead.id, date, time, error = %e, "booking refused");
                Ok(ToolOutcome::fail(e.user_message()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// cancel_meeting
// ---------------------------------------------------------------------------

/// Cancels the lead's next upcoming meeting.
pub struct CancelMeetingTool {
    store: Arc<Store>,
    reservations: Arc<ReservationManager>,
}

impl CancelMeetingTool {
    /// Build the tool over the store and reservation manager.
    pub fn new(store: Arc<Store>, reservations: Arc<ReservationManager>) -> Self {
        Self {
            store,
            reservations,
        }
    }
}

#[async_trait]
impl Tool for CancelMeetingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "cancel_meeting".to_owned(),
            description: "Cancela a próxima reunião agendada do lead. Confirme com o lead antes \
                          de cancelar."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let Some(lead) = resolve_lead(&self.store, ctx).await? else {
            return Ok(ToolOutcome::fail(NO_LEAD_MESSAGE));
        };

        let now = storage_timestamp(Utc::now());
        let Some(meeting) = self.store.next_active_meeting(lead.id, &now).await? else {
            return Ok(ToolOutcome::fail(
                "Não encontrei nenhuma reunião agendada para este lead.",
            ));
        };

        let when = split_storage_timestamp(&meeting.scheduled_at)
            .map(|(date, time)| format_slot_pt(date, time))
            .unwrap_or_else(|| meeting.scheduled_at.clone());

        match self.reservations.cancel(&meeting).await {
            Ok(true) => Ok(ToolOutcome::ok_with_data(
                format!("Reunião de {when} cancelada. O horário voltou a ficar disponível."),
                json!({ "meeting_id": meeting.id }),
            )),
            Ok(false) => Ok(ToolOutcome::ok(format!(
                "A reunião de {when} já estava cancelada."
            ))),
            Err(e) => {
                warn!(meeting_id = meeting.id, error = %e, "cancellation failed");
                Ok(ToolOutcome::fail(
                    "Não consegui cancelar a reunião agora. Tente novamente em instantes.",
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// search_knowledge
// ---------------------------------------------------------------------------

/// Looks up the company knowledge base for grounded answers about services,
/// prices, and process.
pub struct SearchKnowledgeTool {
    knowledge: Arc<KnowledgeClient>,
}

impl SearchKnowledgeTool {
    /// Build the tool over the knowledge client.
    pub fn new(knowledge: Arc<KnowledgeClient>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_knowledge".to_owned(),
            description: "Pesquisa na base de conhecimento da empresa (serviços, preços, prazos, \
                          cases). Use antes de responder perguntas específicas sobre a empresa \
                          para não inventar informação."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "O que pesquisar, em linguagem natural"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn run(
        &self,
        _ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: query".to_owned()))?;

        let passages = match self.knowledge.search(query).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "knowledge search failed");
                return Ok(ToolOutcome::fail(
                    "A base de conhecimento está indisponível no momento. Responda com o que \
                     já sabe e ofereça confirmar depois.",
                ));
            }
        };

        if passages.is_empty() {
            return Ok(ToolOutcome::ok(
                "Não encontrei nada sobre isso na base de conhecimento. Diga ao lead que vai \
                 confirmar com o time e siga a conversa.",
            ));
        }

        let listing = passages
            .iter()
            .map(|p| format!("• {}: {}", p.title, p.content))
            .collect::<Vec<_>>()
            .join("\n");
        let data = passages
            .iter()
            .map(|p| json!({ "title": p.title, "content": p.content, "score": p.score }))
            .collect::<Vec<_>>();

        Ok(ToolOutcome::ok_with_data(
            format!("Encontrei na base de conhecimento:\n{listing}"),
            json!({ "passages": data }),
        ))
    }
}

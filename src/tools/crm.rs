//! Lead-record tools: create, update, stage moves, human handoff.
//!
//! All of these are single-row read-modify-write operations. Re-running one
//! with the same arguments is harmless, which is what lets the orchestrator
//! retry turns without a rollback story.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::gateway::MessagingGateway;
use crate::providers::ToolDefinition;
use crate::store::{FunnelStage, LeadUpdate, NewLead, ServiceCategory, Store};
use crate::tools::{resolve_lead, Tool, ToolContext, ToolError, ToolOutcome, NO_LEAD_MESSAGE};

// ---------------------------------------------------------------------------
// create_lead
// ---------------------------------------------------------------------------

/// Materializes a lead for the current contact.
///
/// A contact talking to us has no lead row until this runs; calling it again
/// for a known contact merges the provided fields instead of failing.
pub struct CreateLeadTool {
    store: Arc<Store>,
}

impl CreateLeadTool {
    /// Build the tool over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for CreateLeadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_lead".to_owned(),
            description: "Cadastra o contato atual como lead no CRM. Chame assim que souber o \
                          nome da pessoa. Se o lead já existir, os campos informados são \
                          atualizados."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Nome da pessoa"
                    },
                    "email": {
                        "type": "string",
                        "description": "E-mail, se informado"
                    },
                    "company": {
                        "type": "string",
                        "description": "Empresa, se informada"
                    },
                    "need": {
                        "type": "string",
                        "enum": ["websites", "ecommerce", "mobile_apps", "marketing", "systems"],
                        "description": "Categoria de serviço que o lead procura"
                    }
                },
                "required": ["name"]
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let name = input
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: name".to_owned()))?;
        let email = input.get("email").and_then(|v| v.as_str());
        let company = input.get("company").and_then(|v| v.as_str());
        let need = match input.get("need").and_then(|v| v.as_str()) {
            Some(raw) => Some(
                ServiceCategory::from_label(raw)
                    .ok_or_else(|| ToolError::InvalidInput(format!("unknown need: {raw}")))?,
            ),
            None => None,
        };

        if let Some(existing) = self.store.find_lead_by_phone(&ctx.contact_phone).await? {
            self.store
                .update_lead_fields(
                    existing.id,
                    LeadUpdate {
                        name: Some(name.to_owned()),
                        email: email.map(str::to_owned),
                        company: company.map(str::to_owned),
                        need,
                    },
                )
                .await?;
            return Ok(ToolOutcome::ok_with_data(
                format!("O lead {name} já estava cadastrado. Dados atualizados."),
                json!({ "lead_id": existing.id, "created": false }),
            ));
        }

        let lead = self
            .store
            .create_lead(
                &ctx.contact_phone,
                NewLead {
                    name: Some(name.to_owned()),
                    email: email.map(str::to_owned),
                    company: company.map(str::to_owned),
                    need,
                },
            )
            .await?;

        if let Err(e) = self.store.log_activity(
            Some(lead.id),
            "lead_created",
            &format!("Lead {name} cadastrado via conversa"),
        ) {
            warn!(lead_id = lead.id, error = %e, "failed to log lead creation");
        }
        info!(lead_id = lead.id, "lead created by tool call");

        Ok(ToolOutcome::ok_with_data(
            format!("Lead {name} cadastrado com sucesso."),
            json!({ "lead_id": lead.id, "created": true }),
        ))
    }
}

// ---------------------------------------------------------------------------
// update_lead
// ---------------------------------------------------------------------------

/// Updates contact fields on the current lead. Absent fields keep their
/// stored value.
pub struct UpdateLeadTool {
    store: Arc<Store>,
}

impl UpdateLeadTool {
    /// Build the tool over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateLeadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_lead".to_owned(),
            description: "Atualiza dados cadastrais do lead atual (nome, e-mail, empresa ou \
                          interesse). Informe apenas os campos que mudaram."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Novo nome" },
                    "email": { "type": "string", "description": "Novo e-mail" },
                    "company": { "type": "string", "description": "Nova empresa" },
                    "need": {
                        "type": "string",
                        "enum": ["websites", "ecommerce", "mobile_apps", "marketing", "systems"],
                        "description": "Nova categoria de interesse"
                    }
                },
                "required": []
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let name = input.get("name").and_then(|v| v.as_str());
        let email = input.get("email").and_then(|v| v.as_str());
        let company = input.get("company").and_then(|v| v.as_str());
        let need = match input.get("need").and_then(|v| v.as_str()) {
            Some(raw) => Some(
                ServiceCategory::from_label(raw)
                    .ok_or_else(|| ToolError::InvalidInput(format!("unknown need: {raw}")))?,
            ),
            None => None,
        };

        if name.is_none() && email.is_none() && company.is_none() && need.is_none() {
            return Err(ToolError::InvalidInput(
                "at least one of name, email, company, need is required".to_owned(),
            ));
        }

        let Some(lead) = resolve_lead(&self.store, ctx).await? else {
            return Ok(ToolOutcome::fail(NO_LEAD_MESSAGE));
        };

        self.store
            .update_lead_fields(
                lead.id,
                LeadUpdate {
                    name: name.map(str::to_owned),
                    email: email.map(str::to_owned),
                    company: company.map(str::to_owned),
                    need,
                },
            )
            .await?;

        let mut changed = Vec::new();
        if name.is_some() {
            changed.push("nome");
        }
        if email.is_some() {
            changed.push("e-mail");
        }
        if company.is_some() {
            changed.push("empresa");
        }
        if need.is_some() {
            changed.push("interesse");
        }

        Ok(ToolOutcome::ok_with_data(
            format!("Cadastro atualizado: {}.", changed.join(", ")),
            json!({ "lead_id": lead.id, "updated": changed }),
        ))
    }
}

// ---------------------------------------------------------------------------
// update_funnel_stage
// ---------------------------------------------------------------------------

/// Moves the current lead to a different funnel stage.
pub struct UpdateFunnelStageTool {
    store: Arc<Store>,
}

impl UpdateFunnelStageTool {
    /// Build the tool over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateFunnelStageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_funnel_stage".to_owned(),
            description: "Move o lead atual para outra etapa do funil de vendas. Use quando a \
                          conversa avançar (ex.: proposta enviada, negócio fechado) ou quando o \
                          lead desistir."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "stage": {
                        "type": "string",
                        "enum": [
                            "new",
                            "presentation_sent",
                            "second_contact",
                            "meeting_scheduled",
                            "proposal_sent",
                            "closed",
                            "cancelled"
                        ],
                        "description": "Etapa de destino"
                    }
                },
                "required": ["stage"]
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let raw = input
            .get("stage")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: stage".to_owned()))?;
        let stage = FunnelStage::from_label(raw)
            .ok_or_else(|| ToolError::InvalidInput(format!("unknown stage: {raw}")))?;

        let Some(lead) = resolve_lead(&self.store, ctx).await? else {
            return Ok(ToolOutcome::fail(NO_LEAD_MESSAGE));
        };

        if lead.stage == stage {
            return Ok(ToolOutcome::ok(format!(
                "O lead já está na etapa {}.",
                stage.display_label()
            )));
        }

        self.store.update_lead_stage(lead.id, stage).await?;
        if let Err(e) = self.store.log_activity(
            Some(lead.id),
            "stage_changed",
            &format!(
                "Etapa alterada de {} para {}",
                lead.stage.display_label(),
                stage.display_label()
            ),
        ) {
            warn!(lead_id = lead.id, error = %e, "failed to log stage change");
        }
        info!(lead_id = lead.id, from = %lead.stage, to = %stage, "funnel stage updated");

        Ok(ToolOutcome::ok_with_data(
            format!("Lead movido para a etapa {}.", stage.display_label()),
            json!({ "lead_id": lead.id, "stage": stage.as_str() }),
        ))
    }
}

// ---------------------------------------------------------------------------
// request_handoff
// ---------------------------------------------------------------------------

/// Flags the conversation for a human attendant.
///
/// The request is recorded in the activity log either way; when a handoff
/// contact is configured the sales team is also pinged over the messaging
/// gateway, best-effort.
pub struct RequestHandoffTool {
    store: Arc<Store>,
    gateway: Arc<dyn MessagingGateway>,
    config: GatewayConfig,
}

impl RequestHandoffTool {
    /// Build the tool over the store and outbound gateway.
    pub fn new(store: Arc<Store>, gateway: Arc<dyn MessagingGateway>, config: GatewayConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }
}

#[async_trait]
impl Tool for RequestHandoffTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "request_handoff".to_owned(),
            description: "Aciona um atendente humano para assumir a conversa. Use quando o lead \
                          pedir para falar com uma pessoa, quando estiver irritado ou quando a \
                          negociação exigir alguém do time comercial."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Motivo do acionamento, em uma frase"
                    }
                },
                "required": ["reason"]
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let reason = input
            .get("reason")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: reason".to_owned()))?;

        let lead = resolve_lead(&self.store, ctx).await?;
        let lead_id = lead.as_ref().map(|l| l.id);
        let who = lead
            .as_ref()
            .and_then(|l| l.name.clone())
            .unwrap_or_else(|| ctx.contact_phone.clone());

        if let Err(e) = self.store.log_activity(
            lead_id,
            "handoff_requested",
            &format!("Atendimento humano solicitado: {reason}"),
        ) {
            warn!(contact = %ctx.contact_phone, error = %e, "failed to log handoff request");
        }

        if self.config.enabled {
            if let Some(handoff_contact) = &self.config.handoff_contact {
                let alert = format!(
                    "⚠️ Atendimento humano solicitado\nContato: {who} ({})\nMotivo: {reason}",
                    ctx.contact_phone
                );
                if let Err(e) = self.gateway.send_text(handoff_contact, &alert).await {
                    warn!(error = %e, "failed to notify handoff contact");
                }
            }
        }
        info!(contact = %ctx.contact_phone, reason, "human handoff requested");

        Ok(ToolOutcome::ok(
            "Atendente humano acionado. Avise o lead que alguém do time assume a conversa em \
             breve.",
        ))
    }
}

//! Qualification scoring tools.
//!
//! BANT tracks four dimensions per lead (budget, authority, need, timeline).
//! The score is a deterministic function of which dimensions have been
//! registered and at what confidence, weighted by a tunable table from
//! configuration, clamped to 0..=100. Registering more dimensions or raising
//! confidence never lowers the score.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::config::BantConfig;
use crate::providers::ToolDefinition;
use crate::store::{BantDetail, BantDimension, Confidence, Store};
use crate::tools::{resolve_lead, Tool, ToolContext, ToolError, ToolOutcome, NO_LEAD_MESSAGE};

/// Percentage of a dimension's weight awarded at a given confidence.
fn confidence_percent(confidence: Confidence) -> u64 {
    match confidence {
        Confidence::High => 100,
        Confidence::Medium => 60,
        Confidence::Low => 30,
    }
}

/// Compute the qualification score from registered dimensions.
///
/// Each present dimension contributes its configured weight scaled by the
/// confidence percentage; absent dimensions contribute zero. The result is
/// clamped to 100.
#[must_use]
pub fn compute_score(details: &[BantDetail], weights: &BantConfig) -> i64 {
    let mut total: u64 = 0;
    for detail in details {
        let weight = u64::from(match detail.dimension {
            BantDimension::Budget => weights.budget_weight,
            BantDimension::Authority => weights.authority_weight,
            BantDimension::Need => weights.need_weight,
            BantDimension::Timeline => weights.timeline_weight,
        });
        let contribution = weight.saturating_mul(confidence_percent(detail.confidence)) / 100;
        total = total.saturating_add(contribution);
    }
    i64::try_from(total.min(100)).unwrap_or(100)
}

// ---------------------------------------------------------------------------
// register_bant
// ---------------------------------------------------------------------------

/// Records one qualification dimension for the current lead and refreshes
/// the stored score.
pub struct RegisterBantTool {
    store: Arc<Store>,
    weights: BantConfig,
}

impl RegisterBantTool {
    /// Build the tool over the store with the configured weight table.
    pub fn new(store: Arc<Store>, weights: BantConfig) -> Self {
        Self { store, weights }
    }
}

#[async_trait]
impl Tool for RegisterBantTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "register_bant".to_owned(),
            description: "Registra uma dimensão de qualificação BANT (budget, authority, need \
                          ou timeline) descoberta na conversa. Use assim que o lead revelar \
                          orçamento, poder de decisão, necessidade concreta ou prazo."
                .to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dimension": {
                        "type": "string",
                        "enum": ["budget", "authority", "need", "timeline"],
                        "description": "Qual dimensão foi descoberta"
                    },
                    "value": {
                        "type": "string",
                        "description": "O que o lead disse, resumido (ex.: 'R$ 20 mil', 'é o dono', 'loja virtual', 'próximo mês')"
                    },
                    "confidence": {
                        "type": "string",
                        "enum": ["high", "medium", "low"],
                        "description": "high se o lead afirmou explicitamente, medium se ficou fortemente implícito, low se foi deduzido"
                    }
                },
                "required": ["dimension", "value", "confidence"]
            }),
        }
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        input: &serde_json::Value,
    ) -> Result<ToolOutcome, ToolError> {
        let dimension = input
            .get("dimension")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: dimension".to_owned()))?;
        let value = input
            .get("value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: value".to_owned()))?;
        let confidence = input
            .get("confidence")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing required field: confidence".to_owned()))?;

        let dimension = BantDimension::parse(dimension)
            .map_err(|_| ToolError::InvalidInput(format!("unknown dimension: {dimension}")))?;
        let confidence = Confidence::parse(confidence)
            .map_err(|_| ToolError::InvalidInput(format!("unknown confidence: {confidence}")))?;

        let Some(lead) = resolve_lead(&self.store, ctx).await? else {
            return Ok(ToolOutcome::fail(NO_LEAD_MESSAGE));
        };

        self.store
            .register_bant_dimension(lead.id, dimension, value, confidence)
            .await?;
        let details = self.store.bant_details(lead.id).await?;
        let score = compute_score(&details, &self.weights);
        self.store.set_bant_score(lead.id, score).await?;

        info!(
            lead_id = lead.id,
            dimension = dimension.as_str(),
            confidence = confidence.as_str(),
            score,
            "qualification dimension registered"
        );

        Ok(ToolOutcome::ok_with_data(
            format!(
                "Dimensão {} registrada. Pontuação de qualificação atual: {score}/100.",
                dimension.as_str()
            ),
            json!({ "dimension": dimension.as_str(), "score": score }),
        ))
    }
}

// ---------------------------------------------------------------------------
// recompute_bant_score
// ---------------------------------------------------------------------------

/// Recomputes the qualification score from all registered dimensions and
/// reports the per-dimension breakdown.
pub struct RecomputeBantScoreTool {
    store: Arc<Store>,
    weights: BantConfig,
}

impl RecomputeBantScoreTool {
    /// Build the tool over the store with the configured weight table.
    pub fn new(store: Arc<Store>, weights: BantConfig) -> Self {
        Self { store, weights }
    }
}

#[async_trait]
impl Tool for RecomputeBantScoreTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "recompute_bant_score".to_owned(),
            description: "Recalcula a pontuação de qualificação do lead a partir das dimensões \
                          BANT já registradas e informa quais ainda faltam."
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

        let details = self.store.bant_details(lead.id).await?;
        let score = compute_score(&details, &self.weights);
        self.store.set_bant_score(lead.id, score).await?;

        let registered: Vec<&str> = details.iter().map(|d| d.dimension.as_str()).collect();
        let missing: Vec<&str> = [
            BantDimension::Budget,
            BantDimension::Authority,
            BantDimension::Need,
            BantDimension::Timeline,
        ]
        .iter()
        .map(BantDimension::as_str)
        .filter(|name| !registered.contains(name))
        .collect();

        let message = if missing.is_empty() {
            format!("Pontuação de qualificação: {score}/100. Todas as dimensões registradas.")
        } else {
            format!(
                "Pontuação de qualificação: {score}/100. Dimensões ainda não registradas: {}.",
                missing.join(", ")
            )
        };

        Ok(ToolOutcome::ok_with_data(
            message,
            json!({ "score": score, "registered": registered, "missing": missing }),
        ))
    }
}

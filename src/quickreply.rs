//! Canned quick replies for high-confidence conversational intents.
//!
//! When the classifier is confident enough, greetings, farewells, and human
//! handoff requests are answered from fixed pt-BR templates without a model
//! round-trip. Anything ambiguous falls through to the full pipeline.

use rand::seq::SliceRandom;

use crate::classify::{Intent, IntentClassification};
use crate::store::leads::Lead;

/// A canned reply, optionally paired with one tool invocation.
#[derive(Debug, Clone)]
pub struct QuickReply {
    /// Reply text to send as-is.
    pub reply: String,
    /// Tool to execute alongside the reply.
    pub tool: Option<QuickReplyTool>,
}

/// A tool invocation attached to a quick reply.
#[derive(Debug, Clone)]
pub struct QuickReplyTool {
    /// Registered tool name.
    pub name: &'static str,
    /// Arguments passed to the tool.
    pub arguments: serde_json::Value,
}

const GREETING_TEMPLATES: &[&str] = &[
    "Oi{name}! Tudo bem? Me conta, como posso te ajudar?",
    "Olá{name}! Que bom falar com você. Em que posso ajudar?",
    "Oi{name}, tudo certo? Como posso te ajudar hoje?",
];

const FAREWELL_TEMPLATES: &[&str] = &[
    "Obrigado pelo contato{name}! Qualquer coisa é só chamar. Até mais!",
    "Valeu{name}! Fico à disposição por aqui. Até logo!",
];

const HANDOFF_REPLY: &str =
    "Claro{name}! Já estou acionando uma pessoa do nosso time para falar com você. Só um instante.";

/// Resolves a quick reply for a classified message, or `None` when the turn
/// must go through the model.
#[must_use]
pub fn resolve(
    classification: &IntentClassification,
    lead: Option<&Lead>,
    threshold: f32,
) -> Option<QuickReply> {
    if classification.confidence < threshold {
        return None;
    }

    let name_part = first_name(lead).map_or_else(String::new, |n| format!(" {n}"));

    match classification.intent {
        Intent::Greeting => {
            let template = pick(GREETING_TEMPLATES);
            Some(QuickReply {
                reply: template.replace("{name}", &name_part),
                tool: None,
            })
        }
        Intent::Farewell => {
            let template = pick(FAREWELL_TEMPLATES);
            Some(QuickReply {
                reply: template.replace("{name}", &name_part),
                tool: None,
            })
        }
        Intent::HumanRequest => Some(QuickReply {
            reply: HANDOFF_REPLY.replace("{name}", &name_part),
            tool: Some(QuickReplyTool {
                name: "request_handoff",
                arguments: serde_json::json!({
                    "reason": "contato pediu atendimento humano",
                }),
            }),
        }),
        _ => None,
    }
}

fn pick(templates: &[&'static str]) -> &'static str {
    templates
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(templates[0])
}

fn first_name(lead: Option<&Lead>) -> Option<&str> {
    lead.and_then(|l| l.name.as_deref())
        .and_then(|n| n.split_whitespace().next())
}

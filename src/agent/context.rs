//! System prompt assembly and derived-context enrichment.
//!
//! The system prompt is rebuilt from scratch every turn: channel
//! instructions, business identity, the lead's CRM state, qualification
//! progress, the next booked meeting, and guidance distilled from the
//! classifiers. Derived-context merging is the write-side counterpart,
//! folding each inbound message into the conversation's rolling fields.

use chrono::{DateTime, Datelike, Utc};

use crate::classify::{
    detect_objection, detect_topic, extract_questions, infer_preference, IntentClassification,
    Sentiment,
};
use crate::config::BusinessConfig;
use crate::providers::{Message, MessageContent, Role};
use crate::scheduling::{split_storage_timestamp, weekday_pt};
use crate::store::conversations::{Conversation, DerivedContext, StoredMessage};
use crate::store::leads::{BantDetail, Lead};
use crate::store::meetings::Meeting;
use crate::store::{Confidence, MessageRole};

/// Most entries kept per derived-context list.
const MAX_CONTEXT_ENTRIES: usize = 20;

/// Everything the prompt builder reads for one turn.
pub struct PromptInputs<'a> {
    /// Channel instruction text, already resolved for this channel.
    pub instructions: &'a str,
    /// Business identity.
    pub business: &'a BusinessConfig,
    /// The lead, when one exists.
    pub lead: Option<&'a Lead>,
    /// Registered qualification dimensions for the lead.
    pub bant_details: &'a [BantDetail],
    /// The lead's next active meeting, when booked.
    pub next_meeting: Option<&'a Meeting>,
    /// The conversation's rolling derived context, when one exists.
    pub conversation: Option<&'a Conversation>,
    /// Intent of the current inbound message.
    pub intent: IntentClassification,
    /// Sentiment of the current inbound message.
    pub sentiment: Sentiment,
    /// Current wall-clock time.
    pub now: DateTime<Utc>,
}

/// Build the system prompt for one turn.
///
/// Sections included:
/// 1. Channel instructions (persona and rules)
/// 2. Business identity
/// 3. Current date/time, so relative dates can be resolved
/// 4. Lead state, or a note that no lead exists yet
/// 5. Qualification progress
/// 6. Next booked meeting (when any)
/// 7. Conversation guidance from the classifiers
pub fn assemble_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    // Section 1: Channel instructions
    if !inputs.instructions.is_empty() {
        sections.push(inputs.instructions.to_owned());
    }

    // Section 2: Business identity
    sections.push(format!(
        "## Empresa\nVocê é {agent}, do time comercial da {company}. A apresentação \
         institucional fica em {url}; envie-a apenas pela ferramenta própria, nunca como link \
         solto.",
        agent = inputs.business.agent_name,
        company = inputs.business.company_name,
        url = inputs.business.presentation_url,
    ));

    // Section 3: Date/time
    sections.push(format!(
        "## Agora\n{}, {} UTC",
        weekday_pt(inputs.now.weekday()),
        inputs.now.format("%d/%m/%Y %H:%M"),
    ));

    // Section 4: Lead
    sections.push(lead_section(inputs.lead));

    // Section 5: Qualification
    sections.push(bant_section(inputs.bant_details));

    // Section 6: Next meeting
    if let Some(meeting) = inputs.next_meeting {
        sections.push(meeting_section(meeting));
    }

    // Section 7: Conversation guidance
    sections.push(guidance_section(inputs));

    sections.join("\n\n")
}

fn lead_section(lead: Option<&Lead>) -> String {
    let Some(lead) = lead else {
        return "## Lead\nEste contato ainda não está cadastrado no CRM. Assim que souber o \
                nome, cadastre com create_lead antes de avançar a conversa."
            .to_owned();
    };
    let mut lines = vec!["## Lead".to_owned()];
    lines.push(format!(
        "Nome: {}",
        lead.name.as_deref().unwrap_or("(não informado)")
    ));
    if let Some(company) = &lead.company {
        lines.push(format!("Empresa: {company}"));
    }
    if let Some(email) = &lead.email {
        lines.push(format!("E-mail: {email}"));
    }
    if let Some(need) = lead.need {
        lines.push(format!("Interesse: {}", need.label()));
    }
    lines.push(format!("Etapa do funil: {}", lead.stage.display_label()));
    lines.push(format!("Pontuação de qualificação: {}/100", lead.bant_score));
    lines.join("\n")
}

fn confidence_pt(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "confiança alta",
        Confidence::Medium => "confiança média",
        Confidence::Low => "confiança baixa",
    }
}

fn bant_section(details: &[BantDetail]) -> String {
    if details.is_empty() {
        return "## Qualificação (BANT)\nNenhuma dimensão registrada ainda. Descubra orçamento, \
                quem decide, a necessidade concreta e o prazo, uma pergunta por vez, e registre \
                com register_bant."
            .to_owned();
    }
    let mut lines = vec!["## Qualificação (BANT)".to_owned()];
    for detail in details {
        lines.push(format!(
            "- {}: {} ({})",
            detail.dimension.as_str(),
            detail.value,
            confidence_pt(detail.confidence)
        ));
    }
    lines.join("\n")
}

fn meeting_section(meeting: &Meeting) -> String {
    let when = split_storage_timestamp(&meeting.scheduled_at)
        .map_or_else(|| meeting.scheduled_at.clone(), |(date, time)| {
            format!("{date} às {time}")
        });
    let mut text = format!("## Próxima reunião\nAgendada para {when} UTC.");
    if let Some(url) = &meeting.meeting_url {
        text.push_str(&format!(" Link: {url}"));
    }
    text.push_str(" Não ofereça novo agendamento sem antes perguntar sobre esta reunião.");
    text
}

fn guidance_section(inputs: &PromptInputs<'_>) -> String {
    let mut lines = vec!["## Leitura da conversa".to_owned()];
    lines.push(format!(
        "Intenção detectada: {}",
        inputs.intent.intent.as_str()
    ));
    match inputs.sentiment {
        Sentiment::Negative => lines.push(
            "Sentimento: negativo. Acolha a insatisfação antes de vender qualquer coisa."
                .to_owned(),
        ),
        Sentiment::Positive => {
            lines.push("Sentimento: positivo. Bom momento para avançar a conversa.".to_owned());
        }
        Sentiment::Neutral => lines.push("Sentimento: neutro.".to_owned()),
    }
    if let Some(conversation) = inputs.conversation {
        if let Some(topic) = &conversation.topic {
            lines.push(format!("Assunto atual: {topic}"));
        }
        if let Some(preference) = &conversation.preference {
            lines.push(format!("O contato prefere {preference}."));
        }
        if !conversation.objections.is_empty() {
            lines.push(format!(
                "Objeções já levantadas: {}",
                conversation.objections.join(", ")
            ));
        }
        if !conversation.questions_asked.is_empty() {
            lines.push(format!(
                "Perguntas que o contato já fez: {}",
                conversation
                    .questions_asked
                    .iter()
                    .rev()
                    .take(5)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" | ")
            ));
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// History shaping
// ---------------------------------------------------------------------------

/// Convert stored history into provider messages, oldest first.
pub fn history_to_messages(history: &[StoredMessage]) -> Vec<Message> {
    history
        .iter()
        .map(|stored| Message {
            role: match stored.role {
                MessageRole::User => Role::User,
                MessageRole::Assistant => Role::Assistant,
            },
            content: MessageContent::Text(stored.content.clone()),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Derived-context merging
// ---------------------------------------------------------------------------

/// Fold one inbound message into the conversation's derived context.
///
/// Starts from the stored context when one exists, so lists accumulate
/// across turns; each list is capped at the most recent entries.
pub fn merge_derived_context(
    existing: Option<&Conversation>,
    message_text: &str,
    history: &[StoredMessage],
    sentiment: Sentiment,
) -> DerivedContext {
    let mut context = existing.map_or_else(DerivedContext::default, |c| DerivedContext {
        topic: c.topic.clone(),
        sentiment: c.sentiment.clone(),
        preference: c.preference.clone(),
        objections: c.objections.clone(),
        questions_asked: c.questions_asked.clone(),
        disclosed: c.disclosed.clone(),
        bant_snapshot: c.bant_snapshot.clone(),
    });

    let mut user_texts: Vec<&str> = history
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .collect();
    user_texts.push(message_text);

    if let Some(topic) = detect_topic(&user_texts) {
        context.topic = Some(topic);
    }
    context.sentiment = Some(sentiment.as_str().to_owned());
    if let Some(preference) = infer_preference(&user_texts) {
        context.preference = Some(preference);
    }
    if let Some(objection) = detect_objection(message_text) {
        push_unique(&mut context.objections, objection.to_owned());
    }
    for question in extract_questions(message_text) {
        push_unique(&mut context.questions_asked, question);
    }
    if let Some(need) = crate::classify::detect_need(message_text) {
        push_unique(&mut context.disclosed, format!("interesse: {}", need.label()));
    }
    let lowered = message_text.to_lowercase();
    if lowered.contains("r$") || lowered.contains("reais") {
        push_unique(&mut context.disclosed, "orçamento mencionado".to_owned());
    }

    context
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if list.contains(&value) {
        return;
    }
    list.push(value);
    if list.len() > MAX_CONTEXT_ENTRIES {
        let excess = list.len().saturating_sub(MAX_CONTEXT_ENTRIES);
        list.drain(..excess);
    }
}

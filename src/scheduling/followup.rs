//! Stage-based follow-up nudges.
//!
//! A small ordered rule table maps funnel stage and hours since the last
//! message to a templated Portuguese nudge. Scheduling picks the first rule
//! whose send time is still in the future and refuses to stack a second
//! pending follow-up on a lead; delivery happens later from the job runner.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::gateway::MessagingGateway;
use crate::store::{FunnelStage, Lead, Store, StoreError};

use super::storage_timestamp;

/// Maximum follow-ups delivered per dispatch pass.
const DISPATCH_BATCH_LIMIT: u32 = 20;

/// One row of the follow-up cadence table.
#[derive(Debug)]
pub struct FollowUpRule {
    /// Funnel stage the rule applies to.
    pub stage: FunnelStage,

    /// Hours after the conversation's last message to send.
    pub after_hours: i64,

    /// Message template; `{name}` and `{need}` are substituted at
    /// scheduling time.
    pub template: &'static str,
}

/// Cadence table, ordered earliest nudge first within each stage.
pub const FOLLOW_UP_RULES: &[FollowUpRule] = &[
    FollowUpRule {
        stage: FunnelStage::New,
        after_hours: 24,
        template: "Oi, {name}! Vi que você se interessou por {need}. Quer que eu te \
                   passe mais detalhes ou prefere agendar uma conversa rápida?",
    },
    FollowUpRule {
        stage: FunnelStage::New,
        after_hours: 72,
        template: "Oi, {name}! Ainda posso te ajudar com {need}? Se preferir, é só me \
                   dizer um bom horário para conversarmos.",
    },
    FollowUpRule {
        stage: FunnelStage::PresentationSent,
        after_hours: 24,
        template: "Oi, {name}! Conseguiu dar uma olhada na apresentação que te enviei? \
                   Fico à disposição para qualquer dúvida.",
    },
    FollowUpRule {
        stage: FunnelStage::PresentationSent,
        after_hours: 72,
        template: "Oi, {name}! Passando para saber se a apresentação fez sentido para \
                   você. Quer agendar uma conversa para falarmos de {need}?",
    },
    FollowUpRule {
        stage: FunnelStage::SecondContact,
        after_hours: 48,
        template: "Oi, {name}! Podemos retomar nossa conversa sobre {need}? Tenho \
                   horários livres essa semana se quiser agendar.",
    },
    FollowUpRule {
        stage: FunnelStage::ProposalSent,
        after_hours: 48,
        template: "Oi, {name}! Conseguiu avaliar a proposta? Qualquer ajuste que \
                   precisar, é só me falar.",
    },
    FollowUpRule {
        stage: FunnelStage::ProposalSent,
        after_hours: 120,
        template: "Oi, {name}! Nossa proposta para {need} continua válida. Quer \
                   conversar sobre os próximos passos?",
    },
];

/// Pick the first rule for `stage` whose send time is still ahead of `now`.
///
/// Rules whose send time already passed are skipped rather than fired late;
/// stages with no rules (booked, closed, cancelled leads) never match.
pub fn next_follow_up(
    stage: FunnelStage,
    last_message_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, &'static FollowUpRule)> {
    FOLLOW_UP_RULES
        .iter()
        .filter(|rule| rule.stage == stage)
        .find_map(|rule| {
            let send_at = last_message_at.checked_add_signed(Duration::hours(rule.after_hours))?;
            (send_at > now).then_some((send_at, rule))
        })
}

/// Substitute `{name}` and `{need}` into a template for a lead.
///
/// A missing name drops the greeting comma cleanly; a missing need falls
/// back to a generic phrase.
pub fn render_template(template: &str, lead: &Lead) -> String {
    let need = lead.need.map_or("nossos serviços", |need| need.label());
    let rendered = template.replace("{need}", need);
    match lead.name.as_deref().and_then(first_name) {
        Some(name) => rendered.replace("{name}", name),
        None => rendered.replace(", {name}", "").replace("{name}", ""),
    }
}

fn first_name(name: &str) -> Option<&str> {
    name.split_whitespace().next()
}

/// Schedule the next follow-up for a lead, if the cadence table has one and
/// none is already pending.
///
/// Returns `true` when a follow-up was inserted.
///
/// # Errors
///
/// Returns [`StoreError`] when a store operation fails.
pub async fn schedule_for_lead(
    store: &Store,
    lead: &Lead,
    last_message_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let Some((send_at, rule)) = next_follow_up(lead.stage, last_message_at, now) else {
        return Ok(false);
    };
    if store.pending_follow_up_exists(lead.id).await? {
        debug!(lead_id = lead.id, "follow-up already pending, not stacking another");
        return Ok(false);
    }

    let message = render_template(rule.template, lead);
    let id = store
        .schedule_follow_up(lead.id, &storage_timestamp(send_at), &message, lead.stage)
        .await?;
    info!(
        lead_id = lead.id,
        follow_up_id = id,
        send_at = %storage_timestamp(send_at),
        stage = %lead.stage,
        "follow-up scheduled"
    );
    Ok(true)
}

/// Deliver every due follow-up through the gateway.
///
/// Delivery failures leave the row pending for the next pass; leads that
/// meanwhile left the funnel get their pending follow-ups cancelled instead
/// of messaged. Returns how many messages went out.
///
/// # Errors
///
/// Returns [`StoreError`] when loading the due list fails.
pub async fn dispatch_due(
    store: &Store,
    gateway: &dyn MessagingGateway,
    now: DateTime<Utc>,
) -> Result<u32, StoreError> {
    let due = store
        .due_follow_ups(&storage_timestamp(now), DISPATCH_BATCH_LIMIT)
        .await?;
    let mut sent = 0u32;

    for follow_up in due {
        let lead = match store.find_lead_by_id(follow_up.lead_id).await {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                warn!(follow_up_id = follow_up.id, "follow-up references missing lead");
                continue;
            }
            Err(e) => {
                warn!(follow_up_id = follow_up.id, error = %e, "lead lookup failed");
                continue;
            }
        };

        if matches!(lead.stage, FunnelStage::Closed | FunnelStage::Cancelled) {
            store.cancel_pending_follow_ups(lead.id).await?;
            debug!(lead_id = lead.id, "lead left the funnel, follow-ups cancelled");
            continue;
        }

        if let Err(e) = gateway.send_text(&lead.phone, &follow_up.message).await {
            warn!(follow_up_id = follow_up.id, error = %e, "follow-up delivery failed, will retry");
            continue;
        }

        if store.mark_follow_up_sent(follow_up.id).await? {
            sent = sent.saturating_add(1);
            if let Err(e) = store.log_activity(
                Some(lead.id),
                "follow_up_sent",
                &format!("Follow-up enviado ({})", follow_up.stage),
            ) {
                warn!(error = %e, "failed to log follow-up activity");
            }
        }
    }

    if sent > 0 {
        info!(sent, "follow-ups dispatched");
    }
    Ok(sent)
}

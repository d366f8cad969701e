//! Outbound reply validation and cleanup.
//!
//! The model's final text passes through two gates before anyone sees it:
//! [`sanitize_reply`] strips tool names the model sometimes echoes into
//! prose, and [`validate`] rejects replies that should never reach a lead,
//! each rejection mapping to a fixed Portuguese fallback. No rejection ever
//! triggers a second model call.

/// Ceiling on reply length, in characters. WhatsApp readers stop well before
/// this; anything longer is the model rambling.
const MAX_REPLY_CHARS: usize = 1600;

/// Replies shorter than this (after trimming) carry no content.
const MIN_REPLY_CHARS: usize = 2;

/// Internal vocabulary that must never leak into a reply.
const INTERNAL_TERMS: &[&str] = &[
    "system prompt",
    "prompt do sistema",
    "tool_use",
    "tool_call",
    "function_call",
    "input_schema",
    "api key",
];

/// Filler sentences that answer nothing on their own.
const NON_ANSWERS: &[&str] = &[
    "não entendi",
    "desculpe, não entendi",
    "não sei",
    "não posso ajudar com isso",
    "como posso ajudar",
    "em que posso ajudar",
];

/// Common words used for the language heuristic.
const PORTUGUESE_MARKERS: &[&str] = &[
    "que", "não", "para", "com", "uma", "você", "por", "mais", "como", "dos", "das", "seu",
    "sua", "isso", "tem", "vamos", "está", "ajudar", "obrigado", "olá",
];
const ENGLISH_MARKERS: &[&str] = &[
    "the", "and", "you", "for", "with", "that", "this", "have", "your", "can", "will",
    "would", "about", "what", "how", "hello", "thanks",
];

/// Placeholder used when sanitation empties the reply entirely.
pub const HOLDING_REPLY: &str =
    "Um instante, estou verificando essas informações para você. 😊";

/// Why a reply was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Empty or near-empty text.
    Empty,
    /// Longer than a person would read in chat.
    TooLong,
    /// Leaked internal instruction or tooling vocabulary.
    InternalLeak,
    /// Overwhelmingly in the wrong language for the deployment locale.
    WrongLanguage,
    /// Nothing but generic filler.
    NonAnswer,
}

impl RejectionReason {
    /// The fixed fallback served in place of the rejected reply.
    #[must_use]
    pub fn fallback_message(&self) -> &'static str {
        match self {
            Self::Empty => "Desculpe, me perdi aqui por um instante. Pode repetir, por favor?",
            Self::TooLong => {
                "Tenho bastante coisa para te contar sobre isso! Para não virar um textão por \
                 aqui, que tal marcarmos uma conversa rápida? Te explico tudo com calma."
            }
            Self::InternalLeak => {
                "Desculpe, me confundi na resposta. Vamos recomeçar: como posso te ajudar hoje?"
            }
            Self::WrongLanguage => {
                "Opa, acho que me confundi no idioma! Vamos continuar em português: como posso \
                 te ajudar?"
            }
            Self::NonAnswer => {
                "Acho que não consegui te responder direito. Me conta um pouco mais sobre o que \
                 você precisa?"
            }
        }
    }
}

/// Check a candidate reply against the outbound policy.
///
/// # Errors
///
/// Returns the first applicable [`RejectionReason`]; callers serve its
/// [`RejectionReason::fallback_message`] instead of the reply.
pub fn validate(text: &str) -> Result<(), RejectionReason> {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_REPLY_CHARS {
        return Err(RejectionReason::Empty);
    }
    if trimmed.chars().count() > MAX_REPLY_CHARS {
        return Err(RejectionReason::TooLong);
    }

    let lowered = trimmed.to_lowercase();
    if INTERNAL_TERMS.iter().any(|term| lowered.contains(term)) {
        return Err(RejectionReason::InternalLeak);
    }
    if is_wrong_language(&lowered) {
        return Err(RejectionReason::WrongLanguage);
    }
    if is_non_answer(&lowered) {
        return Err(RejectionReason::NonAnswer);
    }
    Ok(())
}

/// Strip literal tool names the model echoed into the answer text.
///
/// Falls back to [`HOLDING_REPLY`] when cleanup leaves nothing behind.
#[must_use]
pub fn sanitize_reply(text: &str, tool_names: &[&str]) -> String {
    let mut cleaned = text.to_owned();
    for name in tool_names {
        if cleaned.contains(name) {
            cleaned = cleaned.replace(name, "");
        }
    }
    let cleaned = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_owned();
    if cleaned.is_empty() {
        HOLDING_REPLY.to_owned()
    } else {
        cleaned
    }
}

fn is_wrong_language(lowered: &str) -> bool {
    let mut portuguese = 0_u32;
    let mut english = 0_u32;
    for word in lowered.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphabetic());
        if PORTUGUESE_MARKERS.contains(&word) {
            portuguese = portuguese.saturating_add(1);
        }
        if ENGLISH_MARKERS.contains(&word) {
            english = english.saturating_add(1);
        }
    }
    // "Overwhelmingly" wrong: clear English dominance, not a borrowed word.
    english >= 4 && english > portuguese.saturating_mul(2)
}

fn is_non_answer(lowered: &str) -> bool {
    let mut remainder = lowered.to_owned();
    let mut hits = 0_u32;
    for phrase in NON_ANSWERS {
        if remainder.contains(phrase) {
            hits = hits.saturating_add(1);
            remainder = remainder.replace(phrase, "");
        }
    }
    if hits == 0 {
        return false;
    }
    remainder
        .chars()
        .all(|c| c.is_whitespace() || c.is_ascii_punctuation() || c == '…')
}

//! Deterministic message classification.
//!
//! Keyword-driven classifiers over inbound pt-BR text: coarse intent with a
//! confidence score, sentiment, service need, topic, and the small extraction
//! helpers feeding derived conversation context. No model calls happen here;
//! everything must stay cheap enough to run on every message.

pub mod intent;
pub mod sentiment;

pub use intent::{classify_intent, detect_need, detect_topic};
pub use sentiment::{classify_sentiment, infer_preference};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Coarse intent of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Standalone greeting.
    Greeting,
    /// Interest in a service.
    Interest,
    /// Asking about price or budget.
    PriceInquiry,
    /// Asking to book or move a meeting.
    ScheduleRequest,
    /// Positive confirmation of a previous proposal.
    Confirmation,
    /// Declining or postponing.
    Rejection,
    /// Asking for a human attendant.
    HumanRequest,
    /// Goodbye or thanks closing the exchange.
    Farewell,
    /// None of the above.
    Unknown,
}

impl Intent {
    /// Stable string form reported on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Interest => "interest",
            Self::PriceInquiry => "price_inquiry",
            Self::ScheduleRequest => "schedule_request",
            Self::Confirmation => "confirmation",
            Self::Rejection => "rejection",
            Self::HumanRequest => "human_request",
            Self::Farewell => "farewell",
            Self::Unknown => "unknown",
        }
    }
}

/// An intent label with the classifier's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentClassification {
    /// The detected intent.
    pub intent: Intent,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Sentiment of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    /// Clearly pleased.
    Positive,
    /// No strong signal either way.
    Neutral,
    /// Clearly displeased.
    Negative,
}

impl Sentiment {
    /// Stable string form reported on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword matching
// ---------------------------------------------------------------------------

/// Checks whether `text` (already lowercased) contains `keyword`. Multi-word
/// keywords match as substrings; single words match whole tokens only, so
/// "app" does not fire on "happy hour".
pub(crate) fn has_keyword(text: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        return text.contains(keyword);
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == keyword)
}

pub(crate) fn has_any_keyword(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| has_keyword(text, k))
}

pub(crate) fn count_keywords(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| has_keyword(text, k)).count()
}

// ---------------------------------------------------------------------------
// Derived-context extraction
// ---------------------------------------------------------------------------

/// Extracts the questions asked in a message, one per `?`-terminated
/// sentence.
#[must_use]
pub fn extract_questions(text: &str) -> Vec<String> {
    let mut questions = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == '?' {
            let q = current.trim().to_string();
            if q.len() > 1 {
                questions.push(q);
            }
            current.clear();
        }
    }
    questions
}

const OBJECTION_PRICE: &[&str] = &["caro", "cara", "fora do orçamento", "fora do orcamento"];
const OBJECTION_TIMING: &[&str] = &[
    "agora não",
    "agora nao",
    "mais pra frente",
    "depois eu vejo",
    "sem tempo",
    "outro momento",
];
const OBJECTION_INCUMBENT: &[&str] = &["já tenho", "ja tenho", "já trabalho com", "ja trabalho com"];
const OBJECTION_DOUBT: &[&str] = &["vou pensar", "não sei se", "nao sei se", "preciso pensar"];

/// Detects a sales objection in a message, returning a short pt-BR category
/// label for the derived context.
#[must_use]
pub fn detect_objection(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    if has_any_keyword(&lowered, OBJECTION_PRICE) {
        return Some("preço");
    }
    if has_any_keyword(&lowered, OBJECTION_TIMING) {
        return Some("timing");
    }
    if has_any_keyword(&lowered, OBJECTION_INCUMBENT) {
        return Some("já atendido");
    }
    if has_any_keyword(&lowered, OBJECTION_DOUBT) {
        return Some("indecisão");
    }
    None
}

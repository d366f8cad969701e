//! Sentiment scoring and communication-preference inference.

use super::{count_keywords, Sentiment};

const POSITIVE_KEYWORDS: &[&str] = &[
    "ótimo",
    "otimo",
    "excelente",
    "perfeito",
    "maravilhoso",
    "adorei",
    "gostei",
    "legal",
    "bacana",
    "show",
    "top",
    "obrigado",
    "obrigada",
    "valeu",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "caro",
    "ruim",
    "péssimo",
    "pessimo",
    "horrível",
    "horrivel",
    "demorado",
    "absurdo",
    "decepcionado",
    "decepcionada",
    "insatisfeito",
    "insatisfeita",
    "reclamação",
    "reclamacao",
    "cancelar",
    "desisto",
    "não gostei",
    "nao gostei",
];

/// Classifies the sentiment of one message by counting keyword hits on each
/// side; ties are neutral.
#[must_use]
pub fn classify_sentiment(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let positive = count_keywords(&lowered, POSITIVE_KEYWORDS);
    let negative = count_keywords(&lowered, NEGATIVE_KEYWORDS);
    if negative > positive {
        Sentiment::Negative
    } else if positive > negative {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

/// Messages needed before a preference is inferred at all.
const MIN_MESSAGES_FOR_PREFERENCE: usize = 3;

/// Average length at or below which the contact prefers short replies.
const SHORT_AVG_CHARS: usize = 40;

/// Average length at or above which the contact writes at length.
const LONG_AVG_CHARS: usize = 160;

/// Infers how the contact likes to communicate from their recent messages.
/// Returns a pt-BR instruction fragment for the system prompt, or `None`
/// when there is no clear signal yet.
#[must_use]
pub fn infer_preference(user_texts: &[&str]) -> Option<String> {
    if user_texts.len() < MIN_MESSAGES_FOR_PREFERENCE {
        return None;
    }
    let total: usize = user_texts
        .iter()
        .map(|t| t.chars().count())
        .fold(0usize, usize::saturating_add);
    let average = total.checked_div(user_texts.len())?;
    if average <= SHORT_AVG_CHARS {
        Some("respostas curtas e diretas".to_string())
    } else if average >= LONG_AVG_CHARS {
        Some("explicações detalhadas".to_string())
    } else {
        None
    }
}

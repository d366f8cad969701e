//! Intent, need, and topic detection.
//!
//! Checks run in priority order: a request for a human outranks everything,
//! explicit rejection outranks interest so negated requests classify
//! correctly, and actionable intents outrank conversational ones (greeting,
//! farewell). First hit wins.

use crate::store::ServiceCategory;

use super::{has_any_keyword, Intent, IntentClassification};

const STRONG_CONFIDENCE: f32 = 0.9;
const WEAK_CONFIDENCE: f32 = 0.6;

const HUMAN_KEYWORDS: &[&str] = &[
    "atendente",
    "humano",
    "pessoa de verdade",
    "falar com alguém",
    "falar com alguem",
    "falar com uma pessoa",
];

const SCHEDULE_KEYWORDS: &[&str] = &[
    "agendar",
    "agenda",
    "marcar",
    "remarcar",
    "reunião",
    "reuniao",
    "horário",
    "horario",
    "disponibilidade",
    "call",
];

const PRICE_KEYWORDS: &[&str] = &[
    "preço",
    "preco",
    "valor",
    "valores",
    "quanto custa",
    "quanto fica",
    "orçamento",
    "orcamento",
    "investimento",
];

const INTEREST_VERBS: &[&str] = &["quero", "preciso", "gostaria", "procuro", "busco", "interessado", "interessada"];

const REJECTION_KEYWORDS: &[&str] = &[
    "não tenho interesse",
    "nao tenho interesse",
    "não quero",
    "nao quero",
    "não preciso",
    "nao preciso",
    "pare de",
    "me remova",
    "descadastrar",
];

const CONFIRMATION_KEYWORDS: &[&str] = &[
    "sim",
    "pode ser",
    "claro",
    "com certeza",
    "perfeito",
    "fechado",
    "combinado",
    "vamos sim",
    "ok",
    "beleza",
];

const GREETING_KEYWORDS: &[&str] = &[
    "oi",
    "olá",
    "ola",
    "bom dia",
    "boa tarde",
    "boa noite",
    "e aí",
    "e ai",
    "tudo bem",
];

const FAREWELL_KEYWORDS: &[&str] = &[
    "tchau",
    "até mais",
    "ate mais",
    "até logo",
    "ate logo",
    "obrigado",
    "obrigada",
    "valeu",
    "abraço",
    "abraco",
];

/// Longest message (in chars) still treated as a standalone greeting or
/// farewell. Anything longer carries real content for the model.
const SHORT_MESSAGE_CHARS: usize = 30;

const WEBSITE_KEYWORDS: &[&str] = &["site", "website", "landing page", "página", "pagina", "portal"];
const ECOMMERCE_KEYWORDS: &[&str] = &[
    "loja virtual",
    "loja online",
    "e-commerce",
    "ecommerce",
    "vender online",
    "vender pela internet",
];
const APP_KEYWORDS: &[&str] = &["aplicativo", "app", "android", "ios"];
const MARKETING_KEYWORDS: &[&str] = &[
    "marketing",
    "tráfego",
    "trafego",
    "anúncio",
    "anuncio",
    "anúncios",
    "anuncios",
    "ads",
    "redes sociais",
    "instagram",
    "seo",
];
const SYSTEM_KEYWORDS: &[&str] = &[
    "sistema",
    "erp",
    "crm",
    "integração",
    "integracao",
    "automação",
    "automacao",
    "plataforma",
];

/// Classifies the coarse intent of an inbound message.
#[must_use]
pub fn classify_intent(text: &str) -> IntentClassification {
    let lowered = text.to_lowercase();
    let trimmed = lowered.trim();

    if has_any_keyword(trimmed, HUMAN_KEYWORDS) {
        return IntentClassification {
            intent: Intent::HumanRequest,
            confidence: STRONG_CONFIDENCE,
        };
    }

    if has_any_keyword(trimmed, SCHEDULE_KEYWORDS) {
        return IntentClassification {
            intent: Intent::ScheduleRequest,
            confidence: STRONG_CONFIDENCE,
        };
    }

    if has_any_keyword(trimmed, PRICE_KEYWORDS) {
        return IntentClassification {
            intent: Intent::PriceInquiry,
            confidence: STRONG_CONFIDENCE,
        };
    }

    if has_any_keyword(trimmed, REJECTION_KEYWORDS) {
        return IntentClassification {
            intent: Intent::Rejection,
            confidence: STRONG_CONFIDENCE,
        };
    }

    if detect_need(trimmed).is_some() {
        let confidence = if has_any_keyword(trimmed, INTEREST_VERBS) {
            STRONG_CONFIDENCE
        } else {
            WEAK_CONFIDENCE
        };
        return IntentClassification {
            intent: Intent::Interest,
            confidence,
        };
    }

    if has_any_keyword(trimmed, CONFIRMATION_KEYWORDS) {
        // Bare agreement needs conversational context to act on, so the
        // confidence stays below the quick-reply threshold.
        return IntentClassification {
            intent: Intent::Confirmation,
            confidence: WEAK_CONFIDENCE,
        };
    }

    if has_any_keyword(trimmed, GREETING_KEYWORDS) {
        let confidence = if trimmed.chars().count() <= SHORT_MESSAGE_CHARS {
            STRONG_CONFIDENCE
        } else {
            WEAK_CONFIDENCE
        };
        return IntentClassification {
            intent: Intent::Greeting,
            confidence,
        };
    }

    if has_any_keyword(trimmed, FAREWELL_KEYWORDS) {
        let confidence = if trimmed.chars().count() <= SHORT_MESSAGE_CHARS {
            STRONG_CONFIDENCE
        } else {
            WEAK_CONFIDENCE
        };
        return IntentClassification {
            intent: Intent::Farewell,
            confidence,
        };
    }

    IntentClassification {
        intent: Intent::Unknown,
        confidence: 0.0,
    }
}

/// Detects which service category a message refers to, if any.
#[must_use]
pub fn detect_need(text: &str) -> Option<ServiceCategory> {
    let lowered = text.to_lowercase();
    // E-commerce before websites: "loja virtual com site próprio" is a store.
    if has_any_keyword(&lowered, ECOMMERCE_KEYWORDS) {
        return Some(ServiceCategory::Ecommerce);
    }
    if has_any_keyword(&lowered, WEBSITE_KEYWORDS) {
        return Some(ServiceCategory::Websites);
    }
    if has_any_keyword(&lowered, APP_KEYWORDS) {
        return Some(ServiceCategory::MobileApps);
    }
    if has_any_keyword(&lowered, MARKETING_KEYWORDS) {
        return Some(ServiceCategory::Marketing);
    }
    if has_any_keyword(&lowered, SYSTEM_KEYWORDS) {
        return Some(ServiceCategory::Systems);
    }
    None
}

/// Derives the conversation topic from the most recent user messages,
/// newest first.
#[must_use]
pub fn detect_topic(recent_user_texts: &[&str]) -> Option<String> {
    for text in recent_user_texts {
        let lowered = text.to_lowercase();
        if has_any_keyword(&lowered, SCHEDULE_KEYWORDS) {
            return Some("agendamento".to_string());
        }
        if has_any_keyword(&lowered, PRICE_KEYWORDS) {
            return Some("preços e orçamento".to_string());
        }
        if let Some(need) = detect_need(&lowered) {
            return Some(need.label().to_string());
        }
    }
    None
}

//! Locally-sourced canned answers for when the backend is unusable
//!
//! Selected by keyword match against the original utterance. Fallbacks
//! never carry a directive.

use super::AiResult;

/// Returned when a command arrives while offline or in offline mode
pub const OFFLINE_NOTICE: &str =
    "That command needs an internet connection. I'm currently in offline mode.";

/// Marker the coordinator watches for to flag degraded operation
pub const LIMITED_MODE_MARKER: &str = "limited mode";

/// Marker a degraded backend answer carries
pub const SERVICE_UNAVAILABLE_MARKER: &str = "cannot reach the online service";

const DEFAULT_ANSWER: &str =
    "I'm sorry, I cannot reach the online service right now. I'm running in limited mode.";

const HELP_ANSWER: &str = "Even offline I can help you navigate the site, browse the \
     available products, and answer simple questions.";

const PRODUCTS_ANSWER: &str = "There are 6 products available, priced from 79.99 to 199.99. \
     Would you like details on a specific one?";

const HELP_TERMS: &[&str] = &["help", "aide"];

const PRODUCT_TERMS: &[&str] = &["product", "produit", "article", "price", "prix"];

/// Pick the canned answer matching the utterance
pub fn for_utterance(utterance: &str) -> AiResult {
    let lower = utterance.to_lowercase();

    let text = if HELP_TERMS.iter().any(|t| lower.contains(t)) {
        HELP_ANSWER
    } else if PRODUCT_TERMS.iter().any(|t| lower.contains(t)) {
        PRODUCTS_ANSWER
    } else {
        DEFAULT_ANSWER
    };

    // A locally-sourced answer is a degraded answer regardless of its
    // wording; it must never look like a live backend result.
    AiResult {
        text: text.to_string(),
        directive: None,
        degraded: true,
    }
}

/// The canned offline notice, returned without touching the network
pub fn offline_notice() -> AiResult {
    AiResult {
        text: OFFLINE_NOTICE.to_string(),
        directive: None,
        degraded: true,
    }
}

/// True when the text signals backend-side degradation
pub fn is_degraded(text: &str) -> bool {
    text.contains(LIMITED_MODE_MARKER) || mentions_service_unavailable(text)
}

/// True when the text carries the service-degraded marker phrase
pub fn mentions_service_unavailable(text: &str) -> bool {
    text.contains(SERVICE_UNAVAILABLE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_terms_select_help_answer() {
        assert_eq!(for_utterance("j'ai besoin d'aide").text, HELP_ANSWER);
        assert_eq!(for_utterance("can you HELP me").text, HELP_ANSWER);
    }

    #[test]
    fn test_product_terms_select_product_summary() {
        assert_eq!(for_utterance("combien coûte ce produit").text, PRODUCTS_ANSWER);
        assert_eq!(for_utterance("what is the price").text, PRODUCTS_ANSWER);
    }

    #[test]
    fn test_anything_else_gets_generic_apology() {
        let result = for_utterance("tell me a story");
        assert_eq!(result.text, DEFAULT_ANSWER);
        assert!(result.degraded);
    }

    #[test]
    fn test_fallbacks_never_carry_a_directive_and_are_degraded() {
        for utterance in ["aide", "prix", "hello"] {
            let result = for_utterance(utterance);
            assert_eq!(result.directive, None);
            assert!(result.degraded);
        }
    }

    #[test]
    fn test_degraded_markers() {
        assert!(is_degraded(DEFAULT_ANSWER));
        assert!(is_degraded("running in limited mode today"));
        assert!(!is_degraded(HELP_ANSWER));
        assert!(mentions_service_unavailable(DEFAULT_ANSWER));
    }
}

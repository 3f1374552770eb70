//! Canonical entity management: normalisation, registry, blocklist,
//! LLM validation, and the relationship graph.
//!
//! Two candidates with the same `(entity_type, normalised_value)` are
//! the same entity. Normalisation is the load-bearing piece: lowercase,
//! whitespace squeeze, diacritic fold, phones towards E.164, emails
//! lowercased.

pub mod graph;
pub mod registry;
pub mod validate;

pub use graph::EntityGraph;
pub use registry::{EntityRegistry, RegisterOutcome};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::EntityType;

/// Normalise a name-like value: lowercase, diacritic fold, whitespace
/// squeeze.
pub fn normalise_name(raw: &str) -> String {
    let folded: String = raw
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise a phone number towards E.164 where possible.
///
/// Keeps a leading `+`; otherwise strips formatting and, for 11-digit
/// numbers with a leading country digit, restores the `+`. Numbers that
/// cannot be resolved to a country keep their bare digit form.
pub fn normalise_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if raw.trim_start().starts_with('+') {
        format!("+{digits}")
    } else if digits.len() == 11 && digits.starts_with('1') {
        // NANP number written with its country digit
        format!("+{digits}")
    } else {
        digits
    }
}

/// Normalise an email: trim and lowercase.
pub fn normalise_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalise a raw value according to its entity type.
pub fn normalise_value(entity_type: EntityType, raw: &str) -> String {
    match entity_type {
        EntityType::Phone => normalise_phone(raw),
        EntityType::Email => normalise_email(raw),
        _ => normalise_name(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_folds_diacritics_and_squeezes() {
        assert_eq!(normalise_name("  José   GARCÍA "), "jose garcia");
        assert_eq!(normalise_name("Zoë Müller"), "zoe muller");
    }

    #[test]
    fn name_identity_is_stable() {
        assert_eq!(normalise_name("Sarah Smith"), normalise_name("sarah  SMITH"));
    }

    #[test]
    fn phone_keeps_plus_prefix() {
        assert_eq!(normalise_phone("+44 20 7946 0958"), "+442079460958");
    }

    #[test]
    fn phone_restores_nanp_country_code() {
        assert_eq!(normalise_phone("1 (555) 867-5309"), "+15558675309");
    }

    #[test]
    fn phone_without_country_stays_bare() {
        assert_eq!(normalise_phone("555-867-5309"), "5558675309");
    }

    #[test]
    fn email_lowercased() {
        assert_eq!(normalise_email("  Jane.Doe@Example.COM "), "jane.doe@example.com");
    }

    #[test]
    fn normalise_value_dispatches_by_type() {
        assert_eq!(
            normalise_value(EntityType::Email, "A@B.COM"),
            "a@b.com"
        );
        assert_eq!(
            normalise_value(EntityType::Person, "André  Gide"),
            "andre gide"
        );
        assert_eq!(
            normalise_value(EntityType::Phone, "+1 555 000 1111"),
            "+15550001111"
        );
    }
}

//! Regex entity extraction for Tier 0.
//!
//! Deterministic, zero-I/O candidate extraction: people (full-name
//! patterns with a confidence band), phones, emails, street addresses,
//! organisations, and currency mentions. Candidates are raw material for
//! the entity registry, which applies normalisation and the blocklist.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::lexicons::is_common_non_name;
use crate::model::{ConfidenceBand, EntityType};

/// An entity candidate spotted in raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub entity_type: EntityType,
    pub value: String,
    pub confidence_band: ConfidenceBand,
}

fn person_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:(Dr|Mr|Mrs|Ms|Prof)\.?\s+)?([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})\b",
        )
        .expect("person regex")
    })
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s().-]{6,}\d").expect("phone regex"))
}

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b\d+\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\s+(?:Street|St|Road|Rd|Avenue|Ave|Lane|Ln|Drive|Dr|Boulevard|Blvd|Court|Ct|Place|Pl)\b",
        )
        .expect("address regex")
    })
}

fn organisation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b[A-Z][A-Za-z&]+(?:\s+[A-Z][A-Za-z&]+)*\s+(?:Inc|Ltd|LLC|Corp|Corporation|Foundation|Institute|University|Hospital|Agency|Company)\b\.?",
        )
        .expect("organisation regex")
    })
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[$€£¥]\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s?(?:dollars|euros|pounds|USD|EUR|GBP|AUD|CAD)\b",
        )
        .expect("currency regex")
    })
}

/// Extract all entity candidates from text, deduplicated by
/// `(type, value)` in first-seen order.
pub fn extract(text: &str) -> Vec<EntityCandidate> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = Vec::new();

    let mut push = |entity_type: EntityType, value: String, band: ConfidenceBand| {
        let key = (entity_type.as_str().to_string(), value.clone());
        if seen.insert(key) {
            out.push(EntityCandidate {
                entity_type,
                value,
                confidence_band: band,
            });
        }
    };

    // Emails and phones first: their matches must not double as people.
    for m in email_re().find_iter(text) {
        push(EntityType::Email, m.as_str().to_string(), ConfidenceBand::High);
    }
    for m in phone_re().find_iter(text) {
        let digits = m.as_str().chars().filter(char::is_ascii_digit).count();
        if (8..=15).contains(&digits) {
            push(
                EntityType::Phone,
                m.as_str().trim().to_string(),
                ConfidenceBand::High,
            );
        }
    }

    for m in address_re().find_iter(text) {
        push(
            EntityType::Location,
            m.as_str().to_string(),
            ConfidenceBand::Medium,
        );
    }

    for m in organisation_re().find_iter(text) {
        push(
            EntityType::Organisation,
            m.as_str().trim_end_matches('.').to_string(),
            ConfidenceBand::Medium,
        );
    }

    for m in currency_re().find_iter(text) {
        push(
            EntityType::Currency,
            m.as_str().trim().to_string(),
            ConfidenceBand::Medium,
        );
    }

    for caps in person_re().captures_iter(text) {
        let Some(name) = caps.get(2) else { continue };
        let honorific = caps.get(1).is_some();

        // Skip names whose every word is a known non-name
        let words: Vec<&str> = name.as_str().split_whitespace().collect();
        if words.iter().any(|w| is_common_non_name(w)) {
            continue;
        }

        let band = if honorific {
            ConfidenceBand::High
        } else if at_sentence_start(text, name.start()) {
            // Sentence-leading capitals are often just sentence case
            ConfidenceBand::Low
        } else {
            ConfidenceBand::Medium
        };

        let value = if honorific {
            // Keep the honorific in the surface form
            caps.get(0).map_or_else(
                || name.as_str().to_string(),
                |m| m.as_str().to_string(),
            )
        } else {
            name.as_str().to_string()
        };
        push(EntityType::Person, value, band);
    }

    out
}

/// Whether the byte offset sits at the start of the text or right after
/// sentence-ending punctuation.
fn at_sentence_start(text: &str, offset: usize) -> bool {
    if offset == 0 {
        return true;
    }
    text[..offset]
        .trim_end()
        .chars()
        .next_back()
        .map_or(true, |c| matches!(c, '.' | '!' | '?' | '\n'))
}

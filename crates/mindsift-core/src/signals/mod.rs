//! Tier 0: deterministic, zero-cost signal extraction from raw text.
//!
//! Runs on every document at ingest to flag emotion markers, intensity,
//! entities, temporal references, and question patterns. No LLM calls,
//! no I/O; the same text always produces the same signals, and the
//! output is attached to the document exactly once.

pub mod entities;
pub mod lexicons;
pub mod temporal;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use entities::EntityCandidate;
pub use temporal::TemporalSignals;

use crate::config::SignalsConfig;

/// Derived document-level flags, each a threshold on the raw counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFlags {
    pub high_emotion: bool,
    pub self_reflective: bool,
    pub narrative: bool,
    pub analytical: bool,
}

/// Tier 0 output for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub word_count: u32,
    pub char_count: u32,
    pub sentence_count: u32,
    pub exclamation_count: u32,
    pub all_caps_count: u32,
    pub repeated_punctuation_count: u32,

    pub intensifier_count: u32,
    pub hedge_count: u32,
    pub absolute_count: u32,
    /// Emotion keyword hits by category; zero-hit categories are omitted.
    pub emotion_hits: BTreeMap<String, u32>,

    pub question_count: u32,
    pub self_inquiry_count: u32,
    pub rhetorical_count: u32,

    pub temporal: TemporalSignals,
    pub entities: Vec<EntityCandidate>,
    pub flags: SignalFlags,
}

impl Signals {
    /// Total emotion keyword hits across all categories.
    pub fn total_emotion_hits(&self) -> u32 {
        self.emotion_hits.values().sum()
    }

    /// Compact one-paragraph summary for inclusion in LLM prompts.
    pub fn summarise_for_prompt(&self) -> String {
        let mut parts = vec![format!(
            "{} words, {} sentences, {} questions ({} self-inquiry)",
            self.word_count, self.sentence_count, self.question_count, self.self_inquiry_count
        )];

        if !self.emotion_hits.is_empty() {
            let emotions: Vec<String> = self
                .emotion_hits
                .iter()
                .map(|(category, hits)| format!("{category}x{hits}"))
                .collect();
            parts.push(format!("emotion markers: {}", emotions.join(", ")));
        }

        parts.push(format!(
            "temporal refs: past {} / present {} / future {} / habitual {}",
            self.temporal.past, self.temporal.present, self.temporal.future, self.temporal.habitual
        ));

        if !self.entities.is_empty() {
            let names: Vec<&str> = self
                .entities
                .iter()
                .take(8)
                .map(|e| e.value.as_str())
                .collect();
            parts.push(format!("entities: {}", names.join(", ")));
        }

        let mut flags = Vec::new();
        if self.flags.high_emotion {
            flags.push("high-emotion");
        }
        if self.flags.self_reflective {
            flags.push("self-reflective");
        }
        if self.flags.narrative {
            flags.push("narrative");
        }
        if self.flags.analytical {
            flags.push("analytical");
        }
        if !flags.is_empty() {
            parts.push(format!("tone flags: {}", flags.join(", ")));
        }

        parts.join(". ")
    }
}

fn repeated_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[!?]{2,}|\.{3,}").expect("punct regex"))
}

/// Sentence openers that look like the start of an answer. A question
/// not followed by one of these is counted as rhetorical.
const ANSWER_OPENERS: &[&str] = &[
    "yes", "no", "because", "well", "maybe", "probably", "definitely", "i", "it", "he", "she",
    "they", "we", "that", "there",
];

/// The Tier 0 signal processor.
///
/// Pure and deterministic: `analyze` does no I/O and the same input
/// always produces bit-identical output.
#[derive(Debug, Clone, Default)]
pub struct SignalProcessor {
    config: SignalsConfig,
}

impl SignalProcessor {
    /// Create a processor with the given flag thresholds.
    pub fn new(config: SignalsConfig) -> Self {
        Self { config }
    }

    /// Extract all Tier 0 signals from raw text.
    pub fn analyze(&self, text: &str) -> Signals {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .collect();

        let word_count = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
        let char_count = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);

        let sentences: Vec<&str> = text
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let all_caps_count = u32::try_from(
            text.split_whitespace()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
                .filter(|t| {
                    t.chars().filter(|c| c.is_alphabetic()).count() >= 2
                        && t.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
                })
                .count(),
        )
        .unwrap_or(0);

        let mut emotion_hits = BTreeMap::new();
        for (category, words) in lexicons::EMOTION_LEXICON {
            let hits = lexicons::count_hits(&lower, &tokens, words);
            if hits > 0 {
                emotion_hits.insert((*category).to_string(), hits);
            }
        }

        let (question_count, self_inquiry_count, rhetorical_count) = count_questions(text);

        let signals = Signals {
            word_count,
            char_count,
            sentence_count: u32::try_from(sentences.len()).unwrap_or(0),
            exclamation_count: u32::try_from(text.matches('!').count()).unwrap_or(0),
            all_caps_count,
            repeated_punctuation_count: u32::try_from(
                repeated_punct_re().find_iter(text).count(),
            )
            .unwrap_or(0),
            intensifier_count: lexicons::count_hits(&lower, &tokens, lexicons::INTENSIFIERS),
            hedge_count: lexicons::count_hits(&lower, &tokens, lexicons::HEDGES),
            absolute_count: lexicons::count_hits(&lower, &tokens, lexicons::ABSOLUTES),
            emotion_hits,
            question_count,
            self_inquiry_count,
            rhetorical_count,
            temporal: temporal::extract(text, &lower),
            entities: entities::extract(text),
            flags: SignalFlags::default(),
        };

        let flags = self.derive_flags(&signals);
        Signals { flags, ..signals }
    }

    fn derive_flags(&self, signals: &Signals) -> SignalFlags {
        let per_100 = |count: u32| {
            if signals.word_count == 0 {
                0.0
            } else {
                f64::from(count) * 100.0 / f64::from(signals.word_count)
            }
        };

        SignalFlags {
            high_emotion: per_100(
                signals.exclamation_count + signals.all_caps_count + signals.total_emotion_hits(),
            ) >= self.config.high_emotion_per_100_words,
            self_reflective: signals.self_inquiry_count
                >= self.config.self_reflective_min_questions,
            narrative: per_100(signals.temporal.past) >= self.config.narrative_past_per_100_words,
            analytical: per_100(signals.hedge_count + signals.absolute_count)
                >= self.config.analytical_per_100_words,
        }
    }
}

/// Count questions: total, self-inquiry (first person), and rhetorical
/// (not followed by an answer-shaped continuation).
fn count_questions(text: &str) -> (u32, u32, u32) {
    // Split into sentences keeping the terminator, so questions are
    // identifiable and the follow-up sentence is available.
    let mut sentences: Vec<(String, bool)> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let is_question = c == '?';
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push((trimmed, is_question));
            }
            current = String::new();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push((tail.to_string(), false));
    }

    let mut total = 0u32;
    let mut self_inquiry = 0u32;
    let mut rhetorical = 0u32;

    for (index, (sentence, is_question)) in sentences.iter().enumerate() {
        if !is_question {
            continue;
        }
        total += 1;

        let lower = sentence.to_lowercase();
        let first_person = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .any(|t| matches!(t, "i" | "me" | "my" | "myself"));
        if first_person {
            self_inquiry += 1;
        }

        let answered = sentences.get(index + 1).is_some_and(|(next, next_q)| {
            if *next_q {
                return false;
            }
            next.split_whitespace()
                .next()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
                .is_some_and(|t| ANSWER_OPENERS.contains(&t.as_str()))
        });
        if !answered {
            rhetorical += 1;
        }
    }

    (total, self_inquiry, rhetorical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> Signals {
        SignalProcessor::default().analyze(text)
    }

    #[test]
    fn idempotent_bit_exact() {
        let text = "Why do I ALWAYS do this?? I was so angry yesterday... Dr. Sarah Smith said it would pass. Maybe she was right.";
        let first = analyze(text);
        let second = analyze(text);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json"),
        );
    }

    #[test]
    fn basic_counts() {
        let signals = analyze("This is great! Really great. Is it though?");
        assert_eq!(signals.sentence_count, 3);
        assert_eq!(signals.exclamation_count, 1);
        assert_eq!(signals.question_count, 1);
        assert_eq!(signals.word_count, 8);
    }

    #[test]
    fn all_caps_and_repeated_punctuation() {
        let signals = analyze("I HATE this!! It NEVER works... ok");
        assert_eq!(signals.all_caps_count, 2);
        assert_eq!(signals.repeated_punctuation_count, 2);
    }

    #[test]
    fn emotion_categories_counted() {
        let signals = analyze("I was so happy, then suddenly scared and lonely.");
        assert_eq!(signals.emotion_hits.get("joy"), Some(&1));
        assert_eq!(signals.emotion_hits.get("fear"), Some(&1));
        assert_eq!(signals.emotion_hits.get("loneliness"), Some(&1));
        assert_eq!(signals.emotion_hits.get("surprise"), Some(&1));
        assert!(!signals.emotion_hits.contains_key("anger"));
    }

    #[test]
    fn lexicon_counts() {
        let signals = analyze("Maybe it was really bad. It always is, probably.");
        assert_eq!(signals.intensifier_count, 1); // really
        assert_eq!(signals.hedge_count, 2); // maybe, probably
        assert_eq!(signals.absolute_count, 1); // always
    }

    #[test]
    fn self_inquiry_detected() {
        let signals = analyze("Why do I keep doing this? What was she thinking?");
        assert_eq!(signals.question_count, 2);
        assert_eq!(signals.self_inquiry_count, 1);
    }

    #[test]
    fn rhetorical_vs_answered_questions() {
        // First question answered ("Because..."), second question dangling.
        let signals = analyze("Why does it matter? Because it shapes everything. What's the point of asking?");
        assert_eq!(signals.question_count, 2);
        assert_eq!(signals.rhetorical_count, 1);
    }

    #[test]
    fn flags_high_emotion() {
        let signals = analyze("I HATE this!! I was furious, scared, and heartbroken!");
        assert!(signals.flags.high_emotion);
    }

    #[test]
    fn flags_self_reflective() {
        let signals =
            analyze("Why do I avoid this? What am I afraid of? Should I just call them?");
        assert!(signals.flags.self_reflective);
    }

    #[test]
    fn flags_absent_on_neutral_text() {
        let text = "The quarterly report covers revenue, staffing, and the upcoming product release schedule for the organisation across all regional offices without notable deviations from projections and prior guidance figures overall.";
        let signals = analyze(text);
        assert!(!signals.flags.high_emotion);
        assert!(!signals.flags.self_reflective);
        assert!(!signals.flags.narrative);
    }

    #[test]
    fn empty_text_yields_zeroes() {
        let signals = analyze("");
        assert_eq!(signals.word_count, 0);
        assert_eq!(signals.sentence_count, 0);
        assert!(signals.entities.is_empty());
        assert!(!signals.flags.high_emotion);
    }

    #[test]
    fn mixed_language_does_not_crash() {
        let signals = analyze("今日は雨。 C'était naïf — мне было грустно. Why me?");
        assert!(signals.word_count > 0);
        assert_eq!(signals.question_count, 1);
    }

    #[test]
    fn prompt_summary_mentions_key_signals() {
        let signals = analyze("Why do I always ruin things? I was so ashamed yesterday. Dr. Sarah Smith disagreed.");
        let summary = signals.summarise_for_prompt();
        assert!(summary.contains("words"));
        assert!(summary.contains("shame"));
        assert!(summary.contains("Sarah Smith"));
    }
}

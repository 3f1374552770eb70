//! Temporal reference bucketing and date literal extraction for Tier 0.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Temporal reference counts bucketed by orientation, plus extracted
/// date/time literals in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalSignals {
    pub past: u32,
    pub present: u32,
    pub future: u32,
    pub habitual: u32,
    pub date_literals: Vec<String>,
}

const PAST_MARKERS: &[&str] = &[
    "yesterday",
    "last week",
    "last month",
    "last year",
    "ago",
    "used to",
    "back then",
    "previously",
    "when i was",
    "at the time",
];

const PRESENT_MARKERS: &[&str] = &[
    "today",
    "right now",
    "currently",
    "at the moment",
    "these days",
    "this week",
    "nowadays",
];

const FUTURE_MARKERS: &[&str] = &[
    "tomorrow",
    "next week",
    "next month",
    "next year",
    "going to",
    "will be",
    "someday",
    "soon",
    "plan to",
    "one day",
];

const HABITUAL_MARKERS: &[&str] = &[
    "always",
    "usually",
    "often",
    "every day",
    "every week",
    "every morning",
    "every time",
    "whenever",
    "each time",
];

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \b\d{4}-\d{2}-\d{2}\b
            | \b\d{1,2}/\d{1,2}/\d{2,4}\b
            | \b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}(?:,\s*\d{4})?\b
            | \b\d{1,2}\s+(?:January|February|March|April|May|June|July|August|September|October|November|December)(?:\s+\d{4})?\b
            | \b\d{1,2}:\d{2}\s?(?:am|pm|AM|PM)?\b
            ",
        )
        .expect("date regex")
    })
}

fn count_markers(lower_text: &str, markers: &[&str]) -> u32 {
    markers
        .iter()
        .map(|m| u32::try_from(lower_text.matches(m).count()).unwrap_or(0))
        .sum()
}

/// Extract temporal signals from text. The `lower_text` parameter is the
/// pre-lowercased form of `text` (the caller already has it).
pub fn extract(text: &str, lower_text: &str) -> TemporalSignals {
    TemporalSignals {
        past: count_markers(lower_text, PAST_MARKERS),
        present: count_markers(lower_text, PRESENT_MARKERS),
        future: count_markers(lower_text, FUTURE_MARKERS),
        habitual: count_markers(lower_text, HABITUAL_MARKERS),
        date_literals: date_re()
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> TemporalSignals {
        extract(text, &text.to_lowercase())
    }

    #[test]
    fn buckets_past_present_future() {
        let signals = run("Yesterday was rough. Right now I feel fine. Tomorrow will be better.");
        assert_eq!(signals.past, 1);
        assert_eq!(signals.present, 1);
        // "tomorrow" and "will be"
        assert_eq!(signals.future, 2);
    }

    #[test]
    fn habitual_markers_counted() {
        let signals = run("I always check twice, usually every morning.");
        assert_eq!(signals.habitual, 3);
    }

    #[test]
    fn date_literals_multiple_formats() {
        let signals = run("We met on 2021-03-14, then again 3/14/2022, around 5:30 pm on March 14, 2023.");
        assert_eq!(signals.date_literals.len(), 4);
        assert!(signals.date_literals.contains(&"2021-03-14".to_string()));
        assert!(signals.date_literals.iter().any(|d| d.starts_with("March 14")));
    }

    #[test]
    fn empty_text_is_empty() {
        assert_eq!(run(""), TemporalSignals::default());
    }
}

//! Closed lexicons for Tier 0 signal extraction.
//!
//! All matching is lowercase whole-word. The emotion lexicon covers 14
//! categories; category names are stable identifiers that flow into
//! `emotional_tags` downstream.

/// Words that amplify intensity.
pub const INTENSIFIERS: &[&str] = &[
    "very",
    "really",
    "extremely",
    "incredibly",
    "absolutely",
    "totally",
    "completely",
    "utterly",
    "deeply",
    "so",
    "such",
    "insanely",
    "massively",
    "seriously",
];

/// Words that soften or qualify a claim.
pub const HEDGES: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "probably",
    "somewhat",
    "kind",
    "sort",
    "roughly",
    "apparently",
    "seemingly",
    "arguably",
    "presumably",
    "likely",
];

/// All-or-nothing words.
pub const ABSOLUTES: &[&str] = &[
    "always",
    "never",
    "everyone",
    "nobody",
    "everything",
    "nothing",
    "all",
    "none",
    "every",
    "impossible",
    "certainly",
    "definitely",
    "forever",
];

/// The 14 emotion categories with their keyword sets.
pub const EMOTION_LEXICON: &[(&str, &[&str])] = &[
    (
        "joy",
        &["happy", "joy", "delighted", "thrilled", "glad", "wonderful", "elated", "cheerful"],
    ),
    (
        "sadness",
        &["sad", "unhappy", "depressed", "miserable", "down", "heartbroken", "crying", "grief"],
    ),
    (
        "anger",
        &["angry", "furious", "mad", "rage", "irritated", "annoyed", "resent", "livid"],
    ),
    (
        "fear",
        &["afraid", "scared", "terrified", "anxious", "worried", "panic", "dread", "nervous"],
    ),
    (
        "surprise",
        &["surprised", "shocked", "astonished", "stunned", "unexpected", "suddenly"],
    ),
    (
        "disgust",
        &["disgusted", "gross", "revolting", "sickening", "repulsed", "awful"],
    ),
    (
        "trust",
        &["trust", "rely", "depend", "faith", "confide", "loyal", "honest"],
    ),
    (
        "anticipation",
        &["looking forward", "excited", "eager", "anticipate", "expect", "hope to", "cant wait"],
    ),
    (
        "love",
        &["love", "adore", "cherish", "affection", "devoted", "fond", "care about"],
    ),
    (
        "shame",
        &["ashamed", "embarrassed", "humiliated", "mortified", "shame"],
    ),
    (
        "guilt",
        &["guilty", "guilt", "regret", "remorse", "sorry", "fault"],
    ),
    (
        "pride",
        &["proud", "pride", "accomplished", "achievement", "triumph"],
    ),
    (
        "loneliness",
        &["lonely", "alone", "isolated", "abandoned", "left out", "solitude"],
    ),
    (
        "hope",
        &["hope", "hopeful", "optimistic", "better days", "silver lining", "faith that"],
    ),
];

/// Capitalised tokens that look like names but never are.
///
/// Filters days, months, sentence-leading function words, and common
/// false positives out of person extraction.
pub const COMMON_NON_NAMES: &[&str] = &[
    "the", "this", "that", "these", "those", "there", "then", "they", "when", "where", "what",
    "which", "while", "after", "before", "because", "but", "and", "not", "yes", "no", "okay",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "january",
    "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "today", "tomorrow", "yesterday", "christmas", "easter", "new",
    "dear", "hello", "thanks", "thank", "regards", "sincerely",
];

/// Whole-word count of lexicon hits in pre-lowercased text.
///
/// Multi-word lexicon entries are matched as substrings; single words
/// must match a whole token.
pub fn count_hits(lower_text: &str, tokens: &[&str], lexicon: &[&str]) -> u32 {
    let mut hits = 0;
    for entry in lexicon {
        if entry.contains(' ') {
            hits += u32::try_from(lower_text.matches(entry).count()).unwrap_or(0);
        } else {
            hits += u32::try_from(tokens.iter().filter(|t| *t == entry).count()).unwrap_or(0);
        }
    }
    hits
}

/// Whether a capitalised token is a known non-name.
pub fn is_common_non_name(word: &str) -> bool {
    let lower = word.to_lowercase();
    COMMON_NON_NAMES.contains(&lower.as_str())
}

//! Near-duplicate scoring and insight merging.
//!
//! The merge scorer is a weighted blend of theme Jaccard, pattern
//! Jaccard, and TF-IDF cosine over summaries. Weights are tunable
//! (defaults 0.4 / 0.2 / 0.4) and must sum to 1. The score is symmetric:
//! `score(a, b) == score(b, a)`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{Insight, InsightStatus};

/// Weighted components of the similarity score.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityWeights {
    pub themes: f64,
    pub patterns: f64,
    pub summary: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            themes: 0.4,
            patterns: 0.2,
            summary: 0.4,
        }
    }
}

/// Jaccard similarity between two string sets.
///
/// Two empty sets are considered identical (1.0).
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// TF-IDF vectoriser over a small corpus of summaries.
///
/// Built once per merge decision from the incoming summary plus all
/// candidate summaries, so document frequencies reflect the comparison
/// set rather than global state.
pub struct TfidfScorer {
    doc_frequency: HashMap<String, f64>,
    corpus_size: f64,
}

impl TfidfScorer {
    /// Build document frequencies from a corpus of texts.
    pub fn new<S: AsRef<str>>(corpus: &[S]) -> Self {
        let mut doc_frequency: HashMap<String, f64> = HashMap::new();
        for text in corpus {
            let unique: HashSet<String> = tokenize(text.as_ref()).into_iter().collect();
            for token in unique {
                *doc_frequency.entry(token).or_default() += 1.0;
            }
        }
        Self {
            doc_frequency,
            corpus_size: corpus.len() as f64,
        }
    }

    fn vector(&self, text: &str) -> HashMap<String, f64> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return HashMap::new();
        }
        let mut term_frequency: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            *term_frequency.entry(token.clone()).or_default() += 1.0;
        }
        let count = tokens.len() as f64;
        term_frequency
            .into_iter()
            .map(|(token, tf)| {
                let df = self.doc_frequency.get(&token).copied().unwrap_or(0.0);
                let idf = ((self.corpus_size + 1.0) / (df + 1.0)).ln() + 1.0;
                (token, (tf / count) * idf)
            })
            .collect()
    }

    /// Cosine similarity between two texts under this corpus's IDF.
    pub fn cosine(&self, a: &str, b: &str) -> f64 {
        let va = self.vector(a);
        let vb = self.vector(b);
        if va.is_empty() || vb.is_empty() {
            return 0.0;
        }

        let dot: f64 = va
            .iter()
            .filter_map(|(token, weight)| vb.get(token).map(|other| weight * other))
            .sum();
        let norm_a: f64 = va.values().map(|w| w * w).sum::<f64>().sqrt();
        let norm_b: f64 = vb.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

/// The blended similarity score between two insights.
pub fn score(
    a: &Insight,
    b: &Insight,
    weights: SimilarityWeights,
    tfidf: &TfidfScorer,
) -> f64 {
    weights.themes * jaccard(&a.themes, &b.themes)
        + weights.patterns * jaccard(&a.patterns, &b.patterns)
        + weights.summary * tfidf.cosine(&a.summary, &b.summary)
}

/// Find the best merge target for an incoming insight.
///
/// Returns the index of the highest-scoring candidate at or above the
/// threshold, with its score.
pub fn find_best_match(
    incoming: &Insight,
    candidates: &[Insight],
    weights: SimilarityWeights,
    threshold: f64,
) -> Option<(usize, f64)> {
    if candidates.is_empty() {
        return None;
    }

    let mut corpus: Vec<&str> = vec![incoming.summary.as_str()];
    corpus.extend(candidates.iter().map(|c| c.summary.as_str()));
    let tfidf = TfidfScorer::new(&corpus);

    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let s = score(incoming, candidate, weights, &tfidf);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((index, s));
        }
    }
    best.filter(|(_, s)| *s >= threshold)
}

/// Merge an incoming insight into a target, returning the updated target.
///
/// Appends sources, unions tag sets and excerpts, takes the max
/// significance and the mean confidence, bumps the pass count, and
/// widens the source date range.
pub fn merge_insights(target: &Insight, incoming: &Insight) -> Insight {
    let mut merged = target.clone();

    merged.source_ids.extend(incoming.source_ids.iter().cloned());
    merged.themes.extend(incoming.themes.iter().cloned());
    merged.patterns.extend(incoming.patterns.iter().cloned());
    merged
        .emotional_tags
        .extend(incoming.emotional_tags.iter().cloned());
    for excerpt in &incoming.excerpts {
        if !merged.excerpts.contains(excerpt) {
            merged.excerpts.push(excerpt.clone());
        }
    }

    merged.significance = target.significance.max(incoming.significance);
    merged.confidence = (target.confidence + incoming.confidence) / 2.0;
    merged.pass_count = target.pass_count + 1;

    merged.earliest_source_date = match (target.earliest_source_date, incoming.earliest_source_date)
    {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    merged.latest_source_date = match (target.latest_source_date, incoming.latest_source_date) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    debug_assert!(merged.status != InsightStatus::Merged);
    merged
}

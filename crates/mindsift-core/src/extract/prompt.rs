//! Prompt assembly for Tier 1 extraction.
//!
//! The prompt concatenates optional domain context, the existing theme
//! vocabulary (for naming consistency across runs), the Tier 0 signal
//! summary, the document content, and the strict output schema.

/// System prompt for the first extraction attempt.
pub const EXTRACTION_SYSTEM: &str = "You extract discrete, well-grounded insights from personal \
documents. Each insight is one observation with themes, emotional tags, and an exact supporting \
excerpt from the text. Respond with JSON matching the requested schema and nothing else.";

/// Stricter system prompt for the retry after malformed output.
pub const STRICT_SYSTEM: &str = "You extract insights from personal documents. Your previous \
response was not valid JSON. Respond with ONLY a JSON object matching the requested schema: no \
prose, no code fences, no commentary. Invalid JSON is a failure.";

/// System prompt for a reflexion (refinement) pass.
pub const REFINE_SYSTEM: &str = "You are refining insights that failed validation. Address every \
critique note: ground each claim in an exact excerpt from the text, and calibrate significance \
and confidence honestly. Respond with JSON matching the requested schema and nothing else.";

/// The output schema block appended to every extraction prompt.
const SCHEMA_BLOCK: &str = r#"Respond with JSON in exactly this shape:
{
  "insights": [
    {
      "summary": "one-sentence observation",
      "themes": ["lowercase-theme"],
      "emotional_tags": ["emotion"],
      "patterns": ["behavioural-pattern"],
      "significance": 0.0,
      "confidence": 0.0,
      "insight_type": "observation | realisation | opinion | relational | other",
      "excerpt": "exact supporting quote from the content"
    }
  ],
  "meta": {"content_quality": "high | medium | low"}
}"#;

/// Assemble the extraction prompt.
pub fn build_extraction_prompt(
    domain_context: Option<&str>,
    existing_themes: &[String],
    signals_summary: Option<&str>,
    content: &str,
    max_insights: usize,
) -> String {
    let mut prompt = String::new();

    if let Some(context) = domain_context.filter(|c| !c.is_empty()) {
        prompt.push_str("Background context:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }

    if !existing_themes.is_empty() {
        prompt.push_str("Known themes (reuse these names where they fit): ");
        prompt.push_str(&existing_themes.join(", "));
        prompt.push_str("\n\n");
    }

    if let Some(summary) = signals_summary.filter(|s| !s.is_empty()) {
        prompt.push_str("Signal summary: ");
        prompt.push_str(summary);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "Extract up to {max_insights} distinct insights from the content below. \
         Skip trivia; keep only observations worth remembering.\n\nContent:\n---\n{content}\n---\n\n"
    ));
    prompt.push_str(SCHEMA_BLOCK);
    prompt
}

/// Assemble a reflexion prompt: the original content plus critique notes.
pub fn build_refine_prompt(
    critique_notes: &str,
    content: &str,
    max_insights: usize,
) -> String {
    format!(
        "A previous extraction from this content failed validation.\n\nCritique notes:\n{critique_notes}\n\n\
         Re-extract up to {max_insights} insights, fixing every problem noted.\n\nContent:\n---\n{content}\n---\n\n{SCHEMA_BLOCK}"
    )
}

/// Truncate content to at most `max_chars`, cutting on a sentence
/// boundary where one exists in the back half of the budget.
pub fn truncate_content(content: &str, max_chars: usize) -> &str {
    if content.chars().count() <= max_chars {
        return content;
    }

    // Find the byte index of the max_chars-th character
    let hard_cut = content
        .char_indices()
        .nth(max_chars)
        .map_or(content.len(), |(index, _)| index);
    let window = &content[..hard_cut];

    let sentence_cut = window
        .rfind(['.', '!', '?'])
        .map(|index| index + 1)
        .filter(|index| *index >= hard_cut / 2);

    &content[..sentence_cut.unwrap_or(hard_cut)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_all_sections() {
        let prompt = build_extraction_prompt(
            Some("A decade of personal journals."),
            &["work".to_string(), "family".to_string()],
            Some("120 words, 2 questions"),
            "The document text.",
            5,
        );
        assert!(prompt.contains("Background context"));
        assert!(prompt.contains("work, family"));
        assert!(prompt.contains("Signal summary"));
        assert!(prompt.contains("The document text."));
        assert!(prompt.contains("\"insights\""));
        assert!(prompt.contains("up to 5"));
    }

    #[test]
    fn optional_sections_omitted() {
        let prompt = build_extraction_prompt(None, &[], None, "text", 5);
        assert!(!prompt.contains("Background context"));
        assert!(!prompt.contains("Known themes"));
        assert!(!prompt.contains("Signal summary"));
    }

    #[test]
    fn refine_prompt_carries_notes() {
        let prompt = build_refine_prompt("excerpt not found in source", "text", 3);
        assert!(prompt.contains("excerpt not found in source"));
        assert!(prompt.contains("\"insights\""));
    }

    #[test]
    fn truncate_short_content_unchanged() {
        assert_eq!(truncate_content("short text", 100), "short text");
    }

    #[test]
    fn truncate_prefers_sentence_boundary() {
        let content = "First sentence. Second sentence. Third sentence that runs long.";
        let truncated = truncate_content(content, 40);
        assert_eq!(truncated, "First sentence. Second sentence.");
    }

    #[test]
    fn truncate_falls_back_to_hard_cut() {
        let content = "no sentence boundaries here just one very long run of words";
        let truncated = truncate_content(content, 20);
        assert_eq!(truncated.chars().count(), 20);
    }

    #[test]
    fn truncate_is_unicode_safe() {
        let content = "émotions — très forte. Encore des émotions ici pour dépasser la limite.";
        let truncated = truncate_content(content, 30);
        assert!(truncated.chars().count() <= 30);
        assert!(content.starts_with(truncated));
    }
}

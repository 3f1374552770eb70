//! Core domain types shared across the pipeline tiers.
//!
//! Everything here is a plain data struct, JSON-serialisable, with string
//! enums that round-trip through their database TEXT representation.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a fresh opaque id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Documents ───────────────────────────────────────────────────────

/// An ingested piece of source material. Immutable after creation,
/// except for the one-time `signals` annotation and `processed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    /// Origin kind, e.g. "chat_export", "pdf", "email".
    pub source_type: String,
    /// Adapter-specific reference back to the original (path, message id).
    pub source_ref: String,
    pub metadata: serde_json::Value,
    /// Tier 0 output. Present iff Tier 0 has run.
    pub signals: Option<crate::signals::Signals>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a new unprocessed document.
    pub fn new(content: impl Into<String>, source_type: &str, source_ref: &str) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            source_type: source_type.to_string(),
            source_ref: source_ref.to_string(),
            metadata: serde_json::json!({}),
            signals: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

// ── Insights ────────────────────────────────────────────────────────

/// Lifecycle of an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    Raw,
    Refined,
    Surfaced,
    Rejected,
    Merged,
}

impl InsightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightStatus::Raw => "raw",
            InsightStatus::Refined => "refined",
            InsightStatus::Surfaced => "surfaced",
            InsightStatus::Rejected => "rejected",
            InsightStatus::Merged => "merged",
        }
    }

    /// Parse from the database TEXT column. Unknown values map to `Raw`.
    pub fn parse(s: &str) -> Self {
        match s {
            "refined" => InsightStatus::Refined,
            "surfaced" => InsightStatus::Surfaced,
            "rejected" => InsightStatus::Rejected,
            "merged" => InsightStatus::Merged,
            _ => InsightStatus::Raw,
        }
    }
}

impl fmt::Display for InsightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of observation an insight represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Observation,
    Realisation,
    Opinion,
    Relational,
    Other,
}

impl InsightType {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightType::Observation => "observation",
            InsightType::Realisation => "realisation",
            InsightType::Opinion => "opinion",
            InsightType::Relational => "relational",
            InsightType::Other => "other",
        }
    }

    /// Parse from text, defaulting to `Other` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "observation" => InsightType::Observation,
            "realisation" | "realization" => InsightType::Realisation,
            "opinion" => InsightType::Opinion,
            "relational" => InsightType::Relational,
            _ => InsightType::Other,
        }
    }
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tagged observation extracted by Tier 1.
///
/// Mutable only through merge (appending sources) and critique
/// (status/score adjustments). Tag sets use `BTreeSet` so serialised
/// JSON is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub summary: String,
    pub themes: BTreeSet<String>,
    pub emotional_tags: BTreeSet<String>,
    pub patterns: BTreeSet<String>,
    pub significance: f64,
    pub confidence: f64,
    pub insight_type: InsightType,
    pub status: InsightStatus,
    /// Documents this insight is grounded in. Never empty.
    pub source_ids: BTreeSet<String>,
    pub excerpts: Vec<String>,
    /// Number of extraction passes that contributed to this insight.
    pub pass_count: u32,
    pub earliest_source_date: Option<DateTime<Utc>>,
    pub latest_source_date: Option<DateTime<Utc>>,
    pub case_id: Option<String>,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Patterns ────────────────────────────────────────────────────────

/// Category of a Tier 2 pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Cognitive,
    Emotional,
    Relational,
    Transitional,
    Other,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Cognitive => "cognitive",
            PatternType::Emotional => "emotional",
            PatternType::Relational => "relational",
            PatternType::Transitional => "transitional",
            PatternType::Other => "other",
        }
    }

    /// Parse from text, defaulting to `Other` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "cognitive" => PatternType::Cognitive,
            "emotional" => PatternType::Emotional,
            "relational" => PatternType::Relational,
            "transitional" => PatternType::Transitional,
            _ => PatternType::Other,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named aggregate over related insights, produced by Tier 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub pattern_type: PatternType,
    pub insight_ids: BTreeSet<String>,
    pub strength: f64,
    pub metadata: serde_json::Value,
    pub case_id: Option<String>,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A higher-order narrative over patterns, produced by Tier 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub id: String,
    pub summary: String,
    pub synthesis_type: String,
    pub pattern_ids: BTreeSet<String>,
    pub significance: f64,
    pub confidence: f64,
    pub metadata: serde_json::Value,
    pub case_id: Option<String>,
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Entities ────────────────────────────────────────────────────────

/// Kind of canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Location,
    Organisation,
    Phone,
    Email,
    Currency,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Location => "location",
            EntityType::Organisation => "organisation",
            EntityType::Phone => "phone",
            EntityType::Email => "email",
            EntityType::Currency => "currency",
        }
    }

    /// Parse from text. Returns `None` for unknown kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(EntityType::Person),
            "location" | "place" => Some(EntityType::Location),
            "organisation" | "organization" | "org" => Some(EntityType::Organisation),
            "phone" => Some(EntityType::Phone),
            "email" => Some(EntityType::Email),
            "currency" => Some(EntityType::Currency),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How certain Tier 0 was that a candidate is a real entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceBand::Low => "low",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::High => "high",
        }
    }

    /// Parse from text, defaulting to `Medium`.
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => ConfidenceBand::Low,
            "high" => ConfidenceBand::High,
            _ => ConfidenceBand::Medium,
        }
    }
}

/// A canonical identity for a person, place, organisation, phone, or email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    pub raw_value: String,
    pub normalised_value: String,
    pub display_name: String,
    /// When set, this entity has been merged; lookups dereference to the root.
    pub merged_into_id: Option<String>,
    pub confidence_band: ConfidenceBand,
    pub mention_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A directed edge between two entities (or two insights, for
/// critique-detected contradictions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ── Cases ───────────────────────────────────────────────────────────

/// Lifecycle state of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseState {
    Uploading,
    Scanning,
    Clarifying,
    Processing,
    Complete,
    Watching,
}

impl CaseState {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseState::Uploading => "uploading",
            CaseState::Scanning => "scanning",
            CaseState::Clarifying => "clarifying",
            CaseState::Processing => "processing",
            CaseState::Complete => "complete",
            CaseState::Watching => "watching",
        }
    }

    /// Parse from the database TEXT column. Unknown values map to `Uploading`.
    pub fn parse(s: &str) -> Self {
        match s {
            "scanning" => CaseState::Scanning,
            "clarifying" => CaseState::Clarifying,
            "processing" => CaseState::Processing,
            "complete" => CaseState::Complete,
            "watching" => CaseState::Watching,
            _ => CaseState::Uploading,
        }
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-visible container grouping documents, insights, patterns,
/// syntheses, and a timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub title: String,
    pub description: String,
    pub state: CaseState,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A journaled state transition on a case timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: i64,
    pub case_id: String,
    pub from_state: CaseState,
    pub to_state: CaseState,
    pub cause: String,
    pub created_at: DateTime<Utc>,
}

// ── Queue ───────────────────────────────────────────────────────────

/// Kind of work a queue item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Extract,
    Critique,
    Correlate,
    Synthesize,
}

impl QueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueKind::Extract => "extract",
            QueueKind::Critique => "critique",
            QueueKind::Correlate => "correlate",
            QueueKind::Synthesize => "synthesize",
        }
    }

    /// Parse from text. Returns `None` for unknown kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extract" => Some(QueueKind::Extract),
            "critique" => Some(QueueKind::Critique),
            "correlate" => Some(QueueKind::Correlate),
            "synthesize" => Some(QueueKind::Synthesize),
            _ => None,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Leased,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Leased => "leased",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    /// Parse from the database TEXT column. Unknown values map to `Queued`.
    pub fn parse(s: &str) -> Self {
        match s {
            "leased" => QueueStatus::Leased,
            "done" => QueueStatus::Done,
            "failed" => QueueStatus::Failed,
            _ => QueueStatus::Queued,
        }
    }
}

/// A durable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub case_id: Option<String>,
    pub kind: QueueKind,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub status: QueueStatus,
    pub lease_token: Option<String>,
    pub leased_until: Option<DateTime<Utc>>,
    pub next_visible_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

// ── Runs ────────────────────────────────────────────────────────────

/// Per-run progress snapshot, persisted for resumability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingState {
    pub run_id: String,
    pub case_id: Option<String>,
    pub current_tier: u32,
    pub documents_processed: u32,
    pub documents_total: u32,
    pub insights_extracted: u32,
    pub patterns_found: u32,
    pub passes_completed: u32,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

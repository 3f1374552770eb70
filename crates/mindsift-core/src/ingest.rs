//! Document ingestion: the boundary between file parsers and the core.
//!
//! Parsers hand over `ParsedContent`; ingestion creates the immutable
//! document, runs Tier 0, registers entity candidates, and enqueues the
//! extract work item that starts the pipeline for that document.

use serde::{Deserialize, Serialize};

use crate::model::{Document, EntityType, QueueKind};
use crate::pipeline::{Engine, PipelineError};
use crate::storage::{documents, queue};

/// What a file parser produces for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedContent {
    /// Full extracted text.
    pub text: String,
    /// Per-page text, when the source format has pages.
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Source date as RFC 3339, when the parser could recover one.
    #[serde(default)]
    pub date: Option<String>,
    /// Parser-specific metadata, passed through to the document.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}

impl ParsedContent {
    /// Wrap bare text (plaintext files, watcher pickups).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    fn full_text(&self) -> String {
        if !self.text.is_empty() {
            return self.text.clone();
        }
        self.pages
            .as_ref()
            .map(|pages| pages.join("\n\n"))
            .unwrap_or_default()
    }
}

impl Engine {
    /// Ingest parsed content into a case.
    ///
    /// Creates the document, attaches it, runs Tier 0 once (signals plus
    /// entity registration), enqueues the extract item, and nudges the
    /// case out of `uploading` if this was its first file.
    pub async fn ingest_content(
        &self,
        case_id: &str,
        parsed: ParsedContent,
        source_type: &str,
        source_ref: &str,
    ) -> Result<Document, PipelineError> {
        let mut document = Document::new(parsed.full_text(), source_type, source_ref);

        let mut metadata = parsed.metadata.clone();
        if let Some(title) = &parsed.title {
            metadata.insert("title".to_string(), serde_json::json!(title));
        }
        if let Some(author) = &parsed.author {
            metadata.insert("author".to_string(), serde_json::json!(author));
        }
        if let Some(date) = &parsed.date {
            metadata.insert("date".to_string(), serde_json::json!(date));
        }
        if let Some(recipients) = &parsed.recipients {
            metadata.insert("recipients".to_string(), serde_json::json!(recipients));
        }
        document.metadata = serde_json::Value::Object(metadata);

        if self.config.signals.enabled {
            let processor =
                crate::signals::SignalProcessor::new(self.config.signals.clone());
            document.signals = Some(processor.analyze(&document.content));
        }

        documents::insert(&self.pool, &document).await?;
        documents::attach_to_case(&self.pool, case_id, &document.id).await?;

        // First file moves the case out of uploading; losing the CAS
        // just means another ingest got there first.
        let _ = self.machine.on_first_file(case_id).await?;

        if let Some(signals) = &document.signals {
            self.register_entities(signals).await?;
        }

        queue::enqueue(
            &self.pool,
            Some(case_id),
            QueueKind::Extract,
            &serde_json::json!({ "document_id": document.id }),
        )
        .await?;

        tracing::info!(
            case_id,
            document = %document.id,
            source_type,
            chars = document.content.len(),
            "document ingested"
        );
        Ok(document)
    }

    /// Register Tier 0 entity candidates and their co-occurrence edges.
    async fn register_entities(
        &self,
        signals: &crate::signals::Signals,
    ) -> Result<(), PipelineError> {
        let mut registered = Vec::new();
        for candidate in &signals.entities {
            // Currency mentions are signals, not registry entities
            if candidate.entity_type == EntityType::Currency {
                continue;
            }
            match self.registry.register(candidate).await? {
                crate::entity::RegisterOutcome::Created(entity)
                | crate::entity::RegisterOutcome::Updated(entity) => registered.push(entity.id),
                crate::entity::RegisterOutcome::Rejected => {}
            }
        }
        if registered.len() > 1 {
            self.graph.record_co_occurrence(&registered).await?;
        }
        Ok(())
    }
}

//! The auto-progression worker.
//!
//! A long-running loop: claim a visible queue item, dispatch it to the
//! matching tier, persist results, mark the item done (compare-and-set
//! on the lease token), and enqueue successors. Failures requeue with
//! exponential backoff until the attempt budget runs out; the case still
//! drives to `complete` on partial results.

use std::sync::Arc;
use std::time::Duration;

use crate::extract::ExtractOutcome;
use crate::model::{QueueItem, QueueKind};
use crate::storage::{cases, documents, insights, queue};

use super::scheduler::{retry_backoff, ConsecutiveErrorTracker, PollScheduler};
use super::{Engine, PipelineError};

/// What a dispatched item produced, for successor scheduling.
enum DispatchResult {
    Extracted(ExtractOutcome),
    Critiqued { re_extracted: Vec<String> },
    Correlated,
    Synthesized,
    /// Work was skipped (already done, or the case was cancelled).
    Skipped,
}

/// One worker in the pool.
pub struct Worker {
    engine: Arc<Engine>,
    index: usize,
    scheduler: PollScheduler,
}

impl Worker {
    /// Create a worker over the shared engine.
    pub fn new(engine: Arc<Engine>, index: usize) -> Self {
        let scheduler = PollScheduler::new(
            Duration::from_secs(engine.config.queue.poll_interval_seconds),
            Duration::from_secs(engine.config.queue.poll_jitter_seconds),
        );
        Self {
            engine,
            index,
            scheduler,
        }
    }

    /// The worker loop. Exits when the engine is shut down.
    pub async fn run(&self) {
        tracing::info!(worker = self.index, "worker started");
        let mut errors = ConsecutiveErrorTracker::new(5, Duration::from_secs(30));
        let cancel = self.engine.cancel_token();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.tick().await {
                Ok(true) => errors.record_success(),
                Ok(false) => {
                    // Queue empty: idle with jitter, but leave promptly on shutdown
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.scheduler.tick() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(worker = self.index, error = %err, "worker tick failed");
                    if errors.record_error() {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(errors.pause_duration()) => {}
                        }
                    }
                }
            }
        }
        tracing::info!(worker = self.index, "worker stopped");
    }

    /// Claim and process one item. Returns `false` when nothing was
    /// visible.
    pub async fn tick(&self) -> Result<bool, PipelineError> {
        let pool = &self.engine.pool;
        let Some(item) =
            queue::claim_next(pool, None, self.engine.config.queue.lease_ms).await?
        else {
            return Ok(false);
        };
        let lease_token = item.lease_token.clone().unwrap_or_default();

        tracing::debug!(
            worker = self.index,
            item = %item.id,
            kind = %item.kind,
            attempt = item.attempts,
            "claimed queue item"
        );

        match self.dispatch(&item).await {
            Ok(result) => {
                let completed = queue::complete(pool, &item.id, &lease_token).await?;
                if !completed {
                    // Lease expired mid-work; another worker owns the item now
                    tracing::warn!(item = %item.id, "lease lost before completion");
                    return Ok(true);
                }
                if let Some(case_id) = &item.case_id {
                    self.schedule_successors(&item, case_id, &result).await?;
                    self.maybe_complete_case(case_id).await?;
                }
            }
            Err(err) => {
                tracing::warn!(item = %item.id, error = %err, "queue item failed");
                let status = queue::fail(
                    pool,
                    &item.id,
                    &lease_token,
                    &err.to_string(),
                    retry_backoff(item.attempts),
                    self.engine.config.queue.max_attempts,
                )
                .await?;
                // Permanently failed items still let the case finish
                if matches!(status, Some(crate::model::QueueStatus::Failed)) {
                    if let Some(case_id) = &item.case_id {
                        self.maybe_complete_case(case_id).await?;
                    }
                }
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, item: &QueueItem) -> Result<DispatchResult, PipelineError> {
        // Cancellation check between claim and any tier work
        if let Some(case_id) = &item.case_id {
            if cases::is_cancel_requested(&self.engine.pool, case_id).await? {
                tracing::debug!(case_id, "case cancelled, dropping work item");
                return Ok(DispatchResult::Skipped);
            }
        }

        let run_id = item.payload.get("run_id").and_then(|v| v.as_str());

        match item.kind {
            QueueKind::Extract => {
                let Some(document_id) = item.payload.get("document_id").and_then(|v| v.as_str())
                else {
                    tracing::warn!(item = %item.id, "extract item without document_id");
                    return Ok(DispatchResult::Skipped);
                };
                let Some(document) = documents::get(&self.engine.pool, document_id).await? else {
                    tracing::warn!(document_id, "extract item for missing document");
                    return Ok(DispatchResult::Skipped);
                };
                if document.processed_at.is_some() {
                    // Crash-retry of an already-finished extract
                    return Ok(DispatchResult::Skipped);
                }

                let outcome = self
                    .engine
                    .extractor
                    .extract_document(&document, item.case_id.as_deref(), run_id)
                    .await?;
                Ok(DispatchResult::Extracted(outcome))
            }

            QueueKind::Critique => {
                let Some(insight_id) = item.payload.get("insight_id").and_then(|v| v.as_str())
                else {
                    return Ok(DispatchResult::Skipped);
                };
                if !self.engine.config.critique.enabled {
                    return Ok(DispatchResult::Skipped);
                }

                let report = self.engine.critique.critique_insight(insight_id).await?;
                let mut re_extracted = Vec::new();
                if report.outcome == crate::critique::CritiqueOutcome::Rejected {
                    if let Some(outcome) = self
                        .engine
                        .critique
                        .refine_rejected(insight_id, &self.engine.extractor)
                        .await?
                    {
                        re_extracted = outcome.created;
                    }
                }
                Ok(DispatchResult::Critiqued { re_extracted })
            }

            QueueKind::Correlate => {
                self.engine
                    .synth
                    .run_correlation(item.case_id.as_deref(), run_id)
                    .await?;
                Ok(DispatchResult::Correlated)
            }

            QueueKind::Synthesize => {
                self.engine
                    .synthesizer
                    .run_synthesis(item.case_id.as_deref(), run_id)
                    .await?;
                Ok(DispatchResult::Synthesized)
            }
        }
    }

    /// Enqueue follow-on work: extract schedules critique per insight,
    /// the last extract schedules correlate, correlate schedules
    /// synthesize.
    async fn schedule_successors(
        &self,
        item: &QueueItem,
        case_id: &str,
        result: &DispatchResult,
    ) -> Result<(), PipelineError> {
        let pool = &self.engine.pool;

        match result {
            DispatchResult::Extracted(outcome) => {
                for insight_id in &outcome.created {
                    queue::enqueue(
                        pool,
                        Some(case_id),
                        QueueKind::Critique,
                        &serde_json::json!({ "insight_id": insight_id }),
                    )
                    .await?;
                }

                let unprocessed = documents::unprocessed_count(pool, case_id).await?;
                if unprocessed == 0 && !queue::has_pending(pool, case_id, QueueKind::Correlate).await? {
                    queue::enqueue(
                        pool,
                        Some(case_id),
                        QueueKind::Correlate,
                        &item.payload.get("run_id").map_or_else(
                            || serde_json::json!({}),
                            |run_id| serde_json::json!({ "run_id": run_id }),
                        ),
                    )
                    .await?;
                }
            }
            DispatchResult::Critiqued { re_extracted } => {
                for insight_id in re_extracted {
                    queue::enqueue(
                        pool,
                        Some(case_id),
                        QueueKind::Critique,
                        &serde_json::json!({ "insight_id": insight_id }),
                    )
                    .await?;
                }
            }
            DispatchResult::Correlated => {
                if !queue::has_pending(pool, case_id, QueueKind::Synthesize).await? {
                    queue::enqueue(pool, Some(case_id), QueueKind::Synthesize, &item.payload)
                        .await?;
                }
            }
            DispatchResult::Synthesized | DispatchResult::Skipped => {}
        }
        Ok(())
    }

    /// Transition `processing -> complete` once the case queue drains.
    async fn maybe_complete_case(&self, case_id: &str) -> Result<(), PipelineError> {
        let pool = &self.engine.pool;
        if queue::pending_count(pool, case_id).await? > 0 {
            return Ok(());
        }

        let unprocessed = documents::unprocessed_count(pool, case_id).await?;
        let cause = if unprocessed == 0 {
            "queue drained".to_string()
        } else {
            format!("queue drained with {unprocessed} unprocessed document(s)")
        };

        // Only fires from `processing`; the CAS makes the race harmless
        if self.engine.machine.on_queue_drained(case_id, &cause).await? {
            self.close_run(case_id, unprocessed).await?;
            let stats = insights::stats(pool, Some(case_id)).await?;
            tracing::info!(case_id, total_insights = stats.total, "case complete");
        }
        Ok(())
    }

    /// Stamp the current run's processing state with its final counts.
    async fn close_run(&self, case_id: &str, unprocessed: i64) -> Result<(), PipelineError> {
        let pool = &self.engine.pool;
        let Some(mut run) = crate::storage::runs::latest_for_case(pool, case_id).await? else {
            return Ok(());
        };

        let stats = insights::stats(pool, Some(case_id)).await?;
        let patterns = crate::storage::patterns::list(pool, Some(case_id)).await?;

        run.documents_processed = run
            .documents_total
            .saturating_sub(u32::try_from(unprocessed).unwrap_or(0));
        run.insights_extracted = u32::try_from(stats.total).unwrap_or(0);
        run.patterns_found = u32::try_from(patterns.len()).unwrap_or(0);
        run.current_tier = 3;
        run.status = "completed".to_string();
        run.completed_at = Some(chrono::Utc::now());
        crate::storage::runs::save(pool, &run).await?;
        Ok(())
    }
}

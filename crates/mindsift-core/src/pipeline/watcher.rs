//! Inbox watcher for the `watching` case state.
//!
//! Watches a directory for new files; each arrival wakes the case
//! (`watching -> scanning`), ingests the file as plaintext, and hands the
//! case back to the pipeline. Parsers for richer formats sit outside the
//! core; the watcher only handles text it can read directly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer, notify::RecursiveMode, DebounceEventResult, Debouncer, RecommendedCache,
};
use tokio_util::sync::CancellationToken;

use crate::ingest::ParsedContent;
use crate::model::CaseState;
use crate::storage::cases;

use super::Engine;

/// Watches one case's inbox directory.
pub struct InboxWatcher {
    engine: Arc<Engine>,
    case_id: String,
    inbox: PathBuf,
    debounce: Duration,
}

impl InboxWatcher {
    /// Create a watcher for a case and directory.
    pub fn new(engine: Arc<Engine>, case_id: &str, inbox: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            case_id: case_id.to_string(),
            inbox: inbox.into(),
            debounce: Duration::from_secs(2),
        }
    }

    /// Run until cancelled. Moves the case `complete -> watching` on
    /// start, then ingests every new file the debouncer reports.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(err) = self.engine.machine.on_watch_started(&self.case_id).await {
            tracing::warn!(case_id = %self.case_id, error = %err, "could not enter watching state");
        }

        // Bridge notify's sync callback to an async-friendly tokio channel.
        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<DebounceEventResult>(64);
        let handler = move |result: DebounceEventResult| {
            let _ = async_tx.blocking_send(result);
        };

        let debouncer_result = new_debouncer(self.debounce, None, handler);
        let mut debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache> =
            match debouncer_result {
                Ok(d) => d,
                Err(err) => {
                    tracing::error!(error = %err, "failed to create inbox watcher");
                    return;
                }
            };

        if let Err(err) = debouncer.watch(&self.inbox, RecursiveMode::NonRecursive) {
            tracing::error!(
                path = %self.inbox.display(),
                error = %err,
                "failed to watch inbox directory"
            );
            return;
        }

        tracing::info!(
            case_id = %self.case_id,
            inbox = %self.inbox.display(),
            "inbox watch started"
        );

        let mut seen: HashSet<PathBuf> = HashSet::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = async_rx.recv() => {
                    match result {
                        Some(Ok(events)) => {
                            for event in events {
                                for path in &event.paths {
                                    if seen.insert(path.clone()) {
                                        self.handle_new_file(path).await;
                                    }
                                }
                            }
                        }
                        Some(Err(errors)) => {
                            for err in errors {
                                tracing::warn!(error = %err, "inbox watcher error");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        drop(debouncer);
        tracing::info!(case_id = %self.case_id, "inbox watch stopped");
    }

    async fn handle_new_file(&self, path: &Path) {
        if !path.is_file() {
            return;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            tracing::debug!(path = %path.display(), "skipping unreadable inbox file");
            return;
        };
        if text.trim().is_empty() {
            return;
        }

        // Wake the case; a file arriving mid-scan just joins the batch
        match self
            .engine
            .machine
            .on_new_file(&self.case_id, &path.display().to_string())
            .await
        {
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "inbox transition failed");
                return;
            }
        }

        let source_ref = path.display().to_string();
        match self
            .engine
            .ingest_content(
                &self.case_id,
                ParsedContent::from_text(text),
                "inbox",
                &source_ref,
            )
            .await
        {
            Ok(document) => {
                // Back into the pipeline for the new batch
                if let Ok(state) = self.engine.machine.on_scan_complete(&self.case_id).await {
                    tracing::info!(
                        case_id = %self.case_id,
                        document = %document.id,
                        state = %state,
                        "inbox file ingested"
                    );
                }
            }
            Err(err) => {
                tracing::error!(path = %source_ref, error = %err, "inbox ingest failed");
            }
        }
    }
}

/// Whether a case is in a state the watcher may feed.
pub async fn is_watchable(
    pool: &crate::storage::DbPool,
    case_id: &str,
) -> Result<bool, crate::error::StorageError> {
    Ok(cases::get(pool, case_id)
        .await?
        .is_some_and(|c| matches!(c.state, CaseState::Complete | CaseState::Watching)))
}

//! The case state machine.
//!
//! Cases progress `uploading -> scanning -> (clarifying ->) processing ->
//! complete`, with an optional `watching` loop back to `scanning` when an
//! inbox monitor picks up new files. Every transition is legality-checked
//! and journaled to the case timeline atomically; concurrent workers race
//! safely on the compare-and-set.

use crate::model::{CaseState, ConfidenceBand};
use crate::storage::{cases, documents, entities, runs, DbPool};

use super::PipelineError;

/// Whether a transition is in the legal set.
pub fn is_legal(from: CaseState, to: CaseState) -> bool {
    matches!(
        (from, to),
        (CaseState::Uploading, CaseState::Scanning)
            | (CaseState::Scanning, CaseState::Clarifying)
            | (CaseState::Scanning, CaseState::Processing)
            | (CaseState::Clarifying, CaseState::Processing)
            | (CaseState::Processing, CaseState::Complete)
            | (CaseState::Complete, CaseState::Watching)
            | (CaseState::Watching, CaseState::Scanning)
    )
}

/// Drives legality-checked case transitions.
pub struct CaseMachine {
    pool: DbPool,
}

impl CaseMachine {
    /// Create a state machine over the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Attempt a transition. Returns `false` when another worker already
    /// moved the case (the compare-and-set missed); errors when the
    /// transition is not in the legal set.
    pub async fn advance(
        &self,
        case_id: &str,
        from: CaseState,
        to: CaseState,
        cause: &str,
    ) -> Result<bool, PipelineError> {
        if !is_legal(from, to) {
            return Err(PipelineError::IllegalTransition { from, to });
        }
        Ok(cases::transition(&self.pool, case_id, from, to, cause).await?)
    }

    /// First file ingested: `uploading -> scanning`.
    pub async fn on_first_file(&self, case_id: &str) -> Result<bool, PipelineError> {
        self.advance(
            case_id,
            CaseState::Uploading,
            CaseState::Scanning,
            "first file ingested",
        )
        .await
    }

    /// Tier 0 finished for the current batch: decide between
    /// `clarifying` (low-confidence entities need the user) and
    /// `processing`.
    pub async fn on_scan_complete(&self, case_id: &str) -> Result<CaseState, PipelineError> {
        let ambiguous = entities::count_by_band(&self.pool, ConfidenceBand::Low).await?;
        let target = if ambiguous > 0 {
            CaseState::Clarifying
        } else {
            CaseState::Processing
        };
        let cause = if ambiguous > 0 {
            format!("{ambiguous} entities need disambiguation")
        } else {
            "signals extracted".to_string()
        };
        self.advance(case_id, CaseState::Scanning, target, &cause).await?;
        if target == CaseState::Processing {
            self.start_run(case_id).await?;
        }
        Ok(target)
    }

    /// User resolved entity questions: `clarifying -> processing`.
    pub async fn on_clarification_resolved(&self, case_id: &str) -> Result<bool, PipelineError> {
        let moved = self
            .advance(
                case_id,
                CaseState::Clarifying,
                CaseState::Processing,
                "user resolved entities",
            )
            .await?;
        if moved {
            self.start_run(case_id).await?;
        }
        Ok(moved)
    }

    /// Open a processing-state row for the run that just started.
    async fn start_run(&self, case_id: &str) -> Result<(), PipelineError> {
        let total = documents::count_for_case(&self.pool, case_id).await?;
        let run_id = runs::start(&self.pool, Some(case_id), u32::try_from(total).unwrap_or(0))
            .await?;
        tracing::debug!(case_id, run_id = %run_id, documents = total, "run started");
        Ok(())
    }

    /// Queue drained with all documents processed: `processing -> complete`.
    pub async fn on_queue_drained(&self, case_id: &str, cause: &str) -> Result<bool, PipelineError> {
        self.advance(case_id, CaseState::Processing, CaseState::Complete, cause)
            .await
    }

    /// Start watching an inbox: `complete -> watching`.
    pub async fn on_watch_started(&self, case_id: &str) -> Result<bool, PipelineError> {
        self.advance(
            case_id,
            CaseState::Complete,
            CaseState::Watching,
            "inbox watch started",
        )
        .await
    }

    /// A watched file arrived: `watching -> scanning`.
    pub async fn on_new_file(&self, case_id: &str, path: &str) -> Result<bool, PipelineError> {
        self.advance(
            case_id,
            CaseState::Watching,
            CaseState::Scanning,
            &format!("new file arrived: {path}"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[test]
    fn legal_set_is_exact() {
        use CaseState::*;
        let states = [Uploading, Scanning, Clarifying, Processing, Complete, Watching];
        let legal = [
            (Uploading, Scanning),
            (Scanning, Clarifying),
            (Scanning, Processing),
            (Clarifying, Processing),
            (Processing, Complete),
            (Complete, Watching),
            (Watching, Scanning),
        ];

        for from in states {
            for to in states {
                assert_eq!(
                    is_legal(from, to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[tokio::test]
    async fn illegal_transition_is_an_error() {
        let pool = init_test_db().await.expect("init db");
        let machine = CaseMachine::new(pool.clone());
        let case = cases::create(&pool, "c", "").await.expect("case");

        let err = machine
            .advance(&case.id, CaseState::Uploading, CaseState::Complete, "shortcut")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));

        // Nothing journaled
        assert!(cases::timeline(&pool, &case.id).await.expect("timeline").is_empty());
    }

    #[tokio::test]
    async fn happy_path_transitions_journal() {
        let pool = init_test_db().await.expect("init db");
        let machine = CaseMachine::new(pool.clone());
        let case = cases::create(&pool, "c", "").await.expect("case");

        assert!(machine.on_first_file(&case.id).await.expect("scan"));
        assert_eq!(
            machine.on_scan_complete(&case.id).await.expect("decide"),
            CaseState::Processing
        );
        assert!(machine.on_queue_drained(&case.id, "queue drained").await.expect("complete"));
        assert!(machine.on_watch_started(&case.id).await.expect("watch"));
        assert!(machine.on_new_file(&case.id, "inbox/new.txt").await.expect("rescan"));

        let events = cases::timeline(&pool, &case.id).await.expect("timeline");
        assert_eq!(events.len(), 5);
        // Every journaled transition is legal
        assert!(events.iter().all(|e| is_legal(e.from_state, e.to_state)));
    }

    #[tokio::test]
    async fn scan_complete_detours_via_clarifying() {
        let pool = init_test_db().await.expect("init db");
        let machine = CaseMachine::new(pool.clone());
        let case = cases::create(&pool, "c", "").await.expect("case");
        machine.on_first_file(&case.id).await.expect("scan");

        // A low-confidence person entity forces clarification
        let registry = crate::entity::EntityRegistry::new(pool.clone());
        registry
            .register(&crate::signals::EntityCandidate {
                entity_type: crate::model::EntityType::Person,
                value: "River Phoenix".to_string(),
                confidence_band: ConfidenceBand::Low,
            })
            .await
            .expect("register");

        assert_eq!(
            machine.on_scan_complete(&case.id).await.expect("decide"),
            CaseState::Clarifying
        );
        assert!(machine.on_clarification_resolved(&case.id).await.expect("resolve"));
    }

    #[tokio::test]
    async fn cas_race_returns_false() {
        let pool = init_test_db().await.expect("init db");
        let machine = CaseMachine::new(pool.clone());
        let case = cases::create(&pool, "c", "").await.expect("case");

        assert!(machine.on_first_file(&case.id).await.expect("first"));
        // A second worker tries the same transition and loses the race
        assert!(!machine.on_first_file(&case.id).await.expect("second"));
    }
}

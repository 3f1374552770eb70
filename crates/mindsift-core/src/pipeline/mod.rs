//! The processing pipeline: case state machine, work queue dispatch, and
//! the worker pool that drives documents through the tiers.
//!
//! A parsed document attaches to a case; the state machine schedules
//! work items; workers claim items, run the matching tier, persist
//! through the store, and advance case state. Every LLM-bearing step
//! routes through the router and response cache.

pub mod scheduler;
pub mod state_machine;
pub mod watcher;
pub mod worker;


pub use state_machine::CaseMachine;
pub use watcher::InboxWatcher;
pub use worker::Worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::critique::{CritiqueEngine, CritiqueError};
use crate::entity::{EntityGraph, EntityRegistry};
use crate::error::{CacheError, EntityError, RouterError, StorageError};
use crate::extract::{ExtractError, Extractor};
use crate::llm::{factory, router::ProviderRouter, LlmProvider};
use crate::model::CaseState;
use crate::storage::{cases, queue, DbPool};
use crate::synth::{SynthEngine, SynthError, Synthesizer};

/// Errors from pipeline orchestration.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A transition outside the legal set was attempted.
    #[error("illegal case transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: CaseState,
        /// Requested state.
        to: CaseState,
    },

    /// Storage-layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Router construction or exhaustion.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Cache backend construction failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Tier 1 error.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Critique error.
    #[error(transparent)]
    Critique(#[from] CritiqueError),

    /// Tier 2/3 error.
    #[error(transparent)]
    Synth(#[from] SynthError),

    /// Entity registry error.
    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// User-visible case status: state, per-tier progress, failures.
#[derive(Debug, serde::Serialize)]
pub struct CaseStatus {
    pub state: CaseState,
    pub tiers: Vec<queue::TierCounters>,
    pub failures: Vec<(String, String)>,
}

/// The assembled engine: every tier wired to the shared store, router,
/// and cache. Cloneable by `Arc`; workers borrow it.
pub struct Engine {
    pub pool: DbPool,
    pub config: Config,
    pub llm: Arc<ResponseCache>,
    pub extractor: Arc<Extractor>,
    pub critique: Arc<CritiqueEngine>,
    pub synth: Arc<SynthEngine>,
    pub synthesizer: Arc<Synthesizer>,
    pub machine: CaseMachine,
    pub registry: EntityRegistry,
    pub graph: EntityGraph,
    cancel: CancellationToken,
}

impl Engine {
    /// Assemble an engine from config, building providers from the
    /// configured preference chain.
    pub fn from_config(pool: DbPool, config: Config) -> Result<Arc<Self>, PipelineError> {
        let router = factory::build_router(&config.router, pool.clone())?;
        Self::with_router(pool, config, Arc::new(router))
    }

    /// Assemble an engine over an explicit provider chain (tests inject
    /// mock providers this way).
    pub fn with_providers(
        pool: DbPool,
        config: Config,
        providers: Vec<Arc<dyn LlmProvider>>,
    ) -> Result<Arc<Self>, PipelineError> {
        let router = ProviderRouter::new(
            providers,
            config.router.max_retries,
            config.router.timeout_ms,
            pool.clone(),
        )?;
        Self::with_router(pool, config, Arc::new(router))
    }

    fn with_router(
        pool: DbPool,
        config: Config,
        router: Arc<ProviderRouter>,
    ) -> Result<Arc<Self>, PipelineError> {
        let llm = Arc::new(ResponseCache::from_config(
            &config.cache,
            router,
            pool.clone(),
        )?);

        let extractor = Arc::new(Extractor::new(
            pool.clone(),
            llm.clone(),
            config.extraction.clone(),
        ));
        let critique = Arc::new(CritiqueEngine::new(
            pool.clone(),
            llm.clone(),
            config.critique.clone(),
            config.extraction.clone(),
        ));
        let synth = Arc::new(SynthEngine::new(
            pool.clone(),
            llm.clone(),
            config.correlation.clone(),
        ));
        let synthesizer = Arc::new(Synthesizer::new(
            pool.clone(),
            llm.clone(),
            config.synthesis.clone(),
        ));

        Ok(Arc::new(Self {
            machine: CaseMachine::new(pool.clone()),
            registry: EntityRegistry::new(pool.clone()),
            graph: EntityGraph::new(pool.clone()),
            pool,
            config,
            llm,
            extractor,
            critique,
            synth,
            synthesizer,
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawn the worker pool. `worker_count` of 0 uses the CPU count.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let count = if self.config.queue.worker_count == 0 {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        } else {
            self.config.queue.worker_count
        };

        (0..count)
            .map(|index| {
                let worker = Worker::new(self.clone(), index);
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }

    /// Request shutdown: workers stop after their current item.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The shutdown token workers watch.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// User-visible status for a case.
    pub async fn case_status(&self, case_id: &str) -> Result<Option<CaseStatus>, PipelineError> {
        let Some(case) = cases::get(&self.pool, case_id).await? else {
            return Ok(None);
        };
        Ok(Some(CaseStatus {
            state: case.state,
            tiers: queue::tier_counters(&self.pool, case_id).await?,
            failures: queue::failures(&self.pool, case_id).await?,
        }))
    }

    /// Flag a case for cancellation. In-flight LLM calls finish (their
    /// results stay cached); workers drop further effects.
    pub async fn cancel_case(&self, case_id: &str) -> Result<(), PipelineError> {
        cases::request_cancel(&self.pool, case_id).await?;
        Ok(())
    }
}

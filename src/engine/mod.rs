//! Recursive batch-deletion engine.
//!
//! A run is a bounded sequence of passes. Each pass discovers a bounded
//! candidate list, deletes every candidate in parallel, summarizes the
//! results and either schedules the next pass or finishes the run:
//!
//! ```text
//! Discovery -> DeletionExecutor -> PassSummarizer -> RunController (loop + 1)
//!                                               \-> finalize + notify
//! ```
//!
//! `Engine` wires the pieces together and is the entry point for callers.

pub mod controller;
pub mod discovery;
pub mod executor;
pub mod pass;
pub mod state;
pub mod summarizer;

pub use controller::{PASS_JOB_DEFINITION, RunController, RunRequest, Submission};
pub use discovery::{Candidate, Discovery, DiscoveryLimits};
pub use executor::{DeletionExecutor, ItemResult, ItemStatus};
pub use pass::{PassDisposition, PassRunner};
pub use state::{DEFAULT_LOOP_BUDGET, RunMode, RunState, RunTarget, RunTotals};
pub use summarizer::{PassReport, PassSummarizer, RunOutcome, Summary};

use crate::catalog::{self, RecordPreview};
use crate::chain::ChainRegistry;
use crate::errors::EngineError;
use crate::ledger::Ledger;
use crate::notify::Notifier;
use crate::scheduler::{Job, JobId, JobQueue, JobScheduler};
use crate::store::{RecordStore, RecordType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events emitted while a pass runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PassEvent {
    PassStarted {
        run_id: Uuid,
        target: String,
        loop_index: u32,
        loop_budget: u32,
    },
    Discovered {
        candidates: usize,
    },
    ItemCompleted {
        result: ItemResult,
    },
    PassCompleted {
        report: PassReport,
    },
}

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub loop_budget: u32,
    pub max_parallel: usize,
    pub limits: DiscoveryLimits,
    pub preview_limit: usize,
    pub notify_recipient: Option<String>,
    /// Record types offered in addition to the built-in catalog
    pub extra_record_types: Vec<RecordType>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            loop_budget: DEFAULT_LOOP_BUDGET,
            max_parallel: 8,
            limits: DiscoveryLimits::default(),
            preview_limit: 5000,
            notify_recipient: None,
            extra_record_types: Vec::new(),
        }
    }
}

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EngineParts {
    pub store: Arc<dyn RecordStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<Ledger>,
    pub registry: Arc<ChainRegistry>,
}

/// Outcome of one job taken from the queue.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: JobId,
    pub result: Result<PassDisposition, EngineError>,
}

pub struct Engine {
    parts: EngineParts,
    settings: EngineSettings,
    controller: Arc<RunController>,
    runner: PassRunner,
}

impl Engine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        let controller = Arc::new(RunController::new(
            parts.scheduler.clone(),
            parts.ledger.clone(),
            parts.store.clone(),
            parts.registry.clone(),
            settings.loop_budget,
        ));
        let runner = Self::build_runner(&parts, &settings, controller.clone(), None);
        Self {
            parts,
            settings,
            controller,
            runner,
        }
    }

    /// Route pass and item progress events to `tx`.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PassEvent>) -> Self {
        self.runner =
            Self::build_runner(&self.parts, &self.settings, self.controller.clone(), Some(tx));
        self
    }

    fn build_runner(
        parts: &EngineParts,
        settings: &EngineSettings,
        controller: Arc<RunController>,
        event_tx: Option<mpsc::Sender<PassEvent>>,
    ) -> PassRunner {
        let discovery = Discovery::new(parts.store.clone(), parts.registry.clone())
            .with_limits(settings.limits);
        let mut executor = DeletionExecutor::new(parts.store.clone(), settings.max_parallel);
        let summarizer = PassSummarizer::new(
            parts.store.clone(),
            parts.registry.clone(),
            parts.notifier.clone(),
            settings.notify_recipient.clone(),
        );
        if let Some(tx) = &event_tx {
            executor = executor.with_event_channel(tx.clone());
        }
        let runner = PassRunner::new(
            discovery,
            executor,
            summarizer,
            controller,
            parts.ledger.clone(),
        );
        match event_tx {
            Some(tx) => runner.with_event_channel(tx),
            None => runner,
        }
    }

    /// Start a run and return the job id of its first pass.
    pub async fn start_run(&self, request: RunRequest) -> Result<JobId, EngineError> {
        self.controller.start_run(request).await
    }

    /// Execute one scheduled pass.
    pub async fn run_job(&self, job: &Job) -> Result<PassDisposition, EngineError> {
        self.runner.run_job(job).await
    }

    /// Run queued jobs until the queue is empty. Passes resubmitted while
    /// draining are picked up in the same call.
    pub async fn drain(&self, queue: &mut JobQueue) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(job) = queue.try_next() {
            let result = self.runner.run_job(&job).await;
            outcomes.push(JobOutcome {
                job: job.id,
                result,
            });
        }
        outcomes
    }

    pub async fn list_eligible_record_types(&self) -> Vec<RecordType> {
        catalog::list_eligible_record_types(
            self.parts.store.as_ref(),
            &self.settings.extra_record_types,
        )
        .await
    }

    pub async fn preview_records(&self, category: &str) -> Result<Vec<RecordPreview>, EngineError> {
        catalog::preview_records(
            self.parts.store.as_ref(),
            category,
            self.settings.preview_limit,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::order_to_cash;
    use crate::notify::RecordingNotifier;
    use crate::scheduler::local_queue;
    use crate::store::InMemoryStore;

    fn engine(store: Arc<InMemoryStore>, notifier: Arc<RecordingNotifier>) -> (Engine, JobQueue) {
        let (scheduler, queue) = local_queue(16);
        let parts = EngineParts {
            store,
            scheduler: Arc::new(scheduler),
            notifier,
            ledger: Arc::new(Ledger::in_memory()),
            registry: Arc::new(ChainRegistry::builtin()),
        };
        let settings = EngineSettings {
            notify_recipient: Some("ops@example.com".to_string()),
            ..EngineSettings::default()
        };
        (Engine::new(parts, settings), queue)
    }

    #[tokio::test]
    async fn test_drain_runs_linked_chain_to_clean() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_chain(&order_to_cash(), 1);
        let notifier = Arc::new(RecordingNotifier::default());
        let (engine, mut queue) = engine(store.clone(), notifier.clone());

        engine
            .start_run(RunRequest::chain_sweep("O2C"))
            .await
            .unwrap();
        let outcomes = engine.drain(&mut queue).await;

        let last = outcomes.last().unwrap().result.as_ref().unwrap();
        assert_eq!(last.report().outcome, Some(RunOutcome::Clean));
        assert!(outcomes.len() <= DEFAULT_LOOP_BUDGET as usize);
        assert!(store.is_empty());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_events_cover_pass_lifecycle() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(crate::store::StoredRecord::of_type("customer"));
        let notifier = Arc::new(RecordingNotifier::default());
        let (engine, mut queue) = engine(store, notifier);
        let (tx, mut rx) = mpsc::channel(64);
        let engine = engine.with_event_channel(tx);

        engine
            .start_run(RunRequest::delete_all("customer"))
            .await
            .unwrap();
        engine.drain(&mut queue).await;
        drop(engine);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                PassEvent::PassStarted { .. } => "started",
                PassEvent::Discovered { .. } => "discovered",
                PassEvent::ItemCompleted { .. } => "item",
                PassEvent::PassCompleted { .. } => "completed",
            });
        }
        assert_eq!(kinds, vec!["started", "discovered", "item", "completed"]);
    }

    #[tokio::test]
    async fn test_pass_event_serializes_with_type_tag() {
        let event = PassEvent::Discovered { candidates: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "discovered");
        assert_eq!(json["candidates"], 3);
    }
}

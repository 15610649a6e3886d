//! Run controller: the only component that schedules work.
//!
//! Each pass is submitted under one job definition; only its parameters
//! change between loops. Every `(run, target, loop)` key is claimed in the
//! ledger before submission, so a pass is submitted at most once. A failed
//! submission halts the run: it is logged at error level, recorded as
//! `halted` and never retried automatically.

use crate::chain::ChainRegistry;
use crate::engine::discovery::sanitize_category;
use crate::engine::state::{PARAM_CHAIN, PARAM_RECORD_TYPE, RunMode, RunState, RunTarget};
use crate::errors::{DiscoveryError, EngineError};
use crate::ledger::{Ledger, LedgerStatus};
use crate::scheduler::{JobId, JobScheduler};
use crate::store::{RecordQuery, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Job definition every pass is submitted under.
pub const PASS_JOB_DEFINITION: &str = "reaper.pass";

/// Caller-supplied parameters of a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub mode: RunMode,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub ids: Option<Vec<i64>>,
}

impl RunRequest {
    pub fn explicit_ids(category: &str, ids: Vec<i64>) -> Self {
        Self {
            mode: RunMode::ExplicitIds,
            category: Some(category.to_string()),
            chain: None,
            ids: Some(ids),
        }
    }

    pub fn delete_all(category: &str) -> Self {
        Self {
            mode: RunMode::DeleteAll,
            category: Some(category.to_string()),
            chain: None,
            ids: None,
        }
    }

    pub fn chain_sweep(chain: &str) -> Self {
        Self {
            mode: RunMode::ChainSweep,
            category: None,
            chain: Some(chain.to_string()),
            ids: None,
        }
    }

    fn category(&self) -> Result<&str, EngineError> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(EngineError::MissingParameter(PARAM_RECORD_TYPE))
    }
}

/// Result of a resubmission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Submitted(JobId),
    /// The key was already submitted; nothing was scheduled
    Duplicate,
}

pub struct RunController {
    scheduler: Arc<dyn JobScheduler>,
    ledger: Arc<Ledger>,
    store: Arc<dyn RecordStore>,
    registry: Arc<ChainRegistry>,
    loop_budget: u32,
}

impl RunController {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        ledger: Arc<Ledger>,
        store: Arc<dyn RecordStore>,
        registry: Arc<ChainRegistry>,
        loop_budget: u32,
    ) -> Self {
        Self {
            scheduler,
            ledger,
            store,
            registry,
            loop_budget: loop_budget.max(1),
        }
    }

    /// Validate `request`, run pre-flight checks and submit the first pass.
    pub async fn start_run(&self, request: RunRequest) -> Result<JobId, EngineError> {
        let target = self.resolve_target(&request)?;
        if let RunTarget::DeleteAll { category } = &target {
            self.preflight(category).await?;
        }

        let state = RunState::new(target, self.loop_budget);
        info!(
            run_id = %state.run_id,
            mode = %state.mode(),
            target = state.target.label(),
            loop_budget = state.loop_budget,
            "Starting run"
        );

        match self.resubmit(&state).await? {
            Submission::Submitted(job) => Ok(job),
            Submission::Duplicate => Err(EngineError::InvalidParameters(format!(
                "run {} was already submitted",
                state.run_id
            ))),
        }
    }

    /// Submit the pass described by `state` unless it exceeds the budget or
    /// its key was already submitted.
    pub async fn resubmit(&self, state: &RunState) -> Result<Submission, EngineError> {
        if state.loop_index > state.loop_budget {
            error!(
                run_id = %state.run_id,
                loop_index = state.loop_index,
                loop_budget = state.loop_budget,
                "Refusing to submit a pass beyond the loop budget"
            );
            return Err(EngineError::LoopBudgetExceeded {
                loop_index: state.loop_index,
                budget: state.loop_budget,
            });
        }

        let key = state.key();
        if !self.ledger.claim(&key) {
            warn!(key = %key, "Pass already submitted, not submitting again");
            return Ok(Submission::Duplicate);
        }

        match self
            .scheduler
            .submit(PASS_JOB_DEFINITION, state.to_params())
            .await
        {
            Ok(job) => {
                if let Err(e) = self.ledger.record(&key, LedgerStatus::Submitted, Some(job)) {
                    warn!(key = %key, error = %e, "Could not record submission in ledger");
                }
                info!(key = %key, job = %job, "Pass submitted");
                Ok(Submission::Submitted(job))
            }
            Err(e) => {
                error!(
                    key = %key,
                    error = %e,
                    "Pass submission failed, run halted and must be restarted manually"
                );
                if let Err(le) = self.ledger.record(&key, LedgerStatus::Halted, None) {
                    error!(key = %key, error = %le, "Could not record halted run in ledger");
                }
                Err(EngineError::Submit(e))
            }
        }
    }

    fn resolve_target(&self, request: &RunRequest) -> Result<RunTarget, EngineError> {
        match request.mode {
            RunMode::ExplicitIds => {
                let category = request.category()?;
                let ids = request
                    .ids
                    .as_ref()
                    .filter(|ids| !ids.is_empty())
                    .ok_or_else(|| {
                        EngineError::InvalidParameters("no record ids supplied".to_string())
                    })?;
                let ids = serde_json::to_string(ids).map_err(anyhow::Error::from)?;
                Ok(RunTarget::ExplicitIds {
                    category: category.to_string(),
                    ids,
                })
            }
            RunMode::DeleteAll => {
                let category = request.category()?;
                let table = sanitize_category(category);
                if table.is_empty() {
                    return Err(DiscoveryError::InvalidCategory(category.to_string()).into());
                }
                Ok(RunTarget::DeleteAll { category: table })
            }
            RunMode::ChainSweep => {
                let chain = request
                    .chain
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or(EngineError::MissingParameter(PARAM_CHAIN))?;
                let chain = self.registry.resolve(chain)?;
                Ok(RunTarget::ChainSweep {
                    chain: chain.name.clone(),
                })
            }
        }
    }

    /// Probe the delete-all table so a broken query fails the caller
    /// synchronously instead of inside a scheduled pass.
    async fn preflight(&self, category: &str) -> Result<(), EngineError> {
        self.store
            .query(&RecordQuery::page(category, 1, 0))
            .await
            .map_err(|source| {
                error!(category, error = %source, "Delete-all pre-flight query failed");
                DiscoveryError::DeleteAllQuery {
                    category: category.to_string(),
                    source,
                }
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::RunTotals;
    use crate::errors::SubmitError;
    use crate::scheduler::local_queue;
    use crate::store::InMemoryStore;

    struct Harness {
        controller: RunController,
        ledger: Arc<Ledger>,
        store: Arc<InMemoryStore>,
        queue: crate::scheduler::JobQueue,
    }

    fn harness(capacity: usize, budget: u32) -> Harness {
        let (scheduler, queue) = local_queue(capacity);
        let ledger = Arc::new(Ledger::in_memory());
        let store = Arc::new(InMemoryStore::new());
        let controller = RunController::new(
            Arc::new(scheduler),
            ledger.clone(),
            store.clone(),
            Arc::new(ChainRegistry::builtin()),
            budget,
        );
        Harness {
            controller,
            ledger,
            store,
            queue,
        }
    }

    #[tokio::test]
    async fn test_start_chain_sweep_submits_loop_one() {
        let mut h = harness(4, 5);
        let job = h
            .controller
            .start_run(RunRequest::chain_sweep("O2C"))
            .await
            .unwrap();

        let queued = h.queue.try_next().unwrap();
        assert_eq!(queued.id, job);
        assert_eq!(queued.definition, PASS_JOB_DEFINITION);
        assert_eq!(queued.params["reaper_loop"], "1");
        assert_eq!(queued.params["reaper_chain_mode"], "T");
        assert_eq!(queued.params["reaper_chain"], "O2C");
    }

    #[tokio::test]
    async fn test_start_unknown_chain_fails() {
        let mut h = harness(4, 5);
        let err = h
            .controller
            .start_run(RunRequest::chain_sweep("R2R"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Chain(_)));
        assert!(h.queue.try_next().is_none());
    }

    #[tokio::test]
    async fn test_explicit_ids_require_category_and_ids() {
        let h = harness(4, 5);
        let mut request = RunRequest::explicit_ids("invoice", vec![]);
        assert!(matches!(
            h.controller.start_run(request.clone()).await,
            Err(EngineError::InvalidParameters(_))
        ));

        request.ids = Some(vec![1]);
        request.category = None;
        assert!(matches!(
            h.controller.start_run(request).await,
            Err(EngineError::MissingParameter(PARAM_RECORD_TYPE))
        ));
    }

    #[tokio::test]
    async fn test_explicit_ids_are_json_encoded() {
        let mut h = harness(4, 5);
        h.controller
            .start_run(RunRequest::explicit_ids("invoice", vec![101, 102]))
            .await
            .unwrap();
        let job = h.queue.try_next().unwrap();
        assert_eq!(job.params["reaper_record_ids"], "[101,102]");
        assert_eq!(job.params["reaper_record_type"], "invoice");
    }

    #[tokio::test]
    async fn test_delete_all_preflight_failure_submits_nothing() {
        let mut h = harness(4, 5);
        h.store.fail_queries_for("vendorbill");
        let err = h
            .controller
            .start_run(RunRequest::delete_all("vendorbill"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Discovery(DiscoveryError::DeleteAllQuery { .. })
        ));
        assert!(h.queue.try_next().is_none());
        assert!(h.ledger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_resubmit_refuses_loop_beyond_budget() {
        let mut h = harness(8, 5);
        let mut state = RunState::new(
            RunTarget::ChainSweep {
                chain: "O2C".to_string(),
            },
            5,
        );
        state.loop_index = 6;
        let err = h.controller.resubmit(&state).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::LoopBudgetExceeded {
                loop_index: 6,
                budget: 5
            }
        ));
        assert!(h.queue.try_next().is_none());
    }

    #[tokio::test]
    async fn test_resubmit_same_key_is_duplicate() {
        let mut h = harness(8, 5);
        let state = RunState::new(
            RunTarget::ChainSweep {
                chain: "P2P".to_string(),
            },
            5,
        )
        .next_loop(RunTotals::default());

        let first = h.controller.resubmit(&state).await.unwrap();
        assert!(matches!(first, Submission::Submitted(_)));
        let second = h.controller.resubmit(&state).await.unwrap();
        assert_eq!(second, Submission::Duplicate);

        assert!(h.queue.try_next().is_some());
        assert!(h.queue.try_next().is_none());
    }

    #[tokio::test]
    async fn test_submit_failure_halts_run() {
        let h = harness(1, 5);
        h.controller
            .start_run(RunRequest::chain_sweep("O2C"))
            .await
            .unwrap();

        let err = h
            .controller
            .start_run(RunRequest::chain_sweep("P2P"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Submit(SubmitError::QueueFull { capacity: 1 })
        ));

        let halted: Vec<_> = h
            .ledger
            .entries()
            .into_iter()
            .filter(|e| e.status == LedgerStatus::Halted)
            .collect();
        assert_eq!(halted.len(), 1);
        assert_eq!(halted[0].target, "P2P");
    }
}

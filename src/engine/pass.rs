//! Pass runner: one discovery → execute → summarize cycle.
//!
//! `run_pass` has no scheduling side effects: it maps a `RunState` to a
//! `Summary` (report plus optional next state). `run_job` is the scheduled
//! entry point and hands the summary either to the controller (next loop) or
//! to the summarizer (finalize and notify).

use crate::engine::PassEvent;
use crate::engine::controller::{PASS_JOB_DEFINITION, RunController, Submission};
use crate::engine::discovery::Discovery;
use crate::engine::executor::DeletionExecutor;
use crate::engine::state::RunState;
use crate::engine::summarizer::{PassReport, PassSummarizer, RunOutcome, Summary};
use crate::errors::EngineError;
use crate::ledger::{Ledger, LedgerStatus};
use crate::scheduler::{Job, JobId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// What happened to a run after one of its passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassDisposition {
    /// The next loop was submitted
    Resubmitted {
        report: PassReport,
        next: Box<RunState>,
        job: JobId,
    },
    /// The next loop had already been submitted, or the run already
    /// finished, by an earlier execution
    Duplicate { report: PassReport },
    /// The run ended and the requester was notified
    Finished { report: PassReport },
    /// The next loop could not be submitted; the run stops without notice
    Halted { report: PassReport, error: String },
}

impl PassDisposition {
    pub fn report(&self) -> &PassReport {
        match self {
            PassDisposition::Resubmitted { report, .. }
            | PassDisposition::Duplicate { report }
            | PassDisposition::Finished { report }
            | PassDisposition::Halted { report, .. } => report,
        }
    }
}

pub struct PassRunner {
    discovery: Discovery,
    executor: DeletionExecutor,
    summarizer: PassSummarizer,
    controller: Arc<RunController>,
    ledger: Arc<Ledger>,
    event_tx: Option<mpsc::Sender<PassEvent>>,
}

impl PassRunner {
    pub fn new(
        discovery: Discovery,
        executor: DeletionExecutor,
        summarizer: PassSummarizer,
        controller: Arc<RunController>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            discovery,
            executor,
            summarizer,
            controller,
            ledger,
            event_tx: None,
        }
    }

    /// Set the event channel for pass-level progress.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PassEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run one pass for `state`.
    ///
    /// Summarization starts only after every candidate has been classified.
    pub async fn run_pass(&self, state: &RunState) -> Result<Summary, EngineError> {
        self.emit(PassEvent::PassStarted {
            run_id: state.run_id,
            target: state.target.label().to_string(),
            loop_index: state.loop_index,
            loop_budget: state.loop_budget,
        })
        .await;

        let candidates = self.discovery.discover(state).await?;
        self.emit(PassEvent::Discovered {
            candidates: candidates.len(),
        })
        .await;

        let results = self.executor.execute(candidates).await;
        let summary = self.summarizer.summarize(&results, state).await;

        self.emit(PassEvent::PassCompleted {
            report: summary.report.clone(),
        })
        .await;
        Ok(summary)
    }

    /// Execute a scheduled pass job and advance or finish its run.
    pub async fn run_job(&self, job: &Job) -> Result<PassDisposition, EngineError> {
        if job.definition != PASS_JOB_DEFINITION {
            return Err(EngineError::InvalidParameters(format!(
                "unknown job definition '{}'",
                job.definition
            )));
        }
        let state = RunState::from_params(&job.params)?;

        let summary = match self.run_pass(&state).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(key = %state.key(), error = %e, "Pass aborted, run halted");
                self.record(&state, LedgerStatus::Halted);
                return Err(e);
            }
        };

        let Summary { report, next } = summary;
        match next {
            Some(next) => match self.controller.resubmit(&next).await {
                Ok(Submission::Submitted(job)) => Ok(PassDisposition::Resubmitted {
                    report,
                    next: Box::new(next),
                    job,
                }),
                Ok(Submission::Duplicate) => Ok(PassDisposition::Duplicate { report }),
                Err(e) => Ok(PassDisposition::Halted {
                    report,
                    error: e.to_string(),
                }),
            },
            None => {
                if !self.ledger.claim_finish(state.run_id) {
                    warn!(
                        key = %state.key(),
                        "Run already finished, not reporting completion again"
                    );
                    return Ok(PassDisposition::Duplicate { report });
                }
                let status = match report.outcome {
                    Some(RunOutcome::Clean) => LedgerStatus::Clean,
                    Some(RunOutcome::MaxLoops) => LedgerStatus::MaxLoops,
                    _ => LedgerStatus::Done,
                };
                self.record(&state, status);
                self.summarizer.finalize(&report).await;
                Ok(PassDisposition::Finished { report })
            }
        }
    }

    fn record(&self, state: &RunState, status: LedgerStatus) {
        if let Err(e) = self.ledger.record(&state.key(), status, None) {
            warn!(key = %state.key(), error = %e, "Could not record run status in ledger");
        }
    }

    async fn emit(&self, event: PassEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

//! Pass summarizer: tallies item results and decides what happens next.

use crate::chain::{Chain, ChainRegistry};
use crate::engine::executor::{ItemResult, ItemStatus};
use crate::engine::state::{RunMode, RunState, RunTotals};
use crate::notify::Notifier;
use crate::store::{RecordQuery, RecordStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Chain sweep found nothing left to delete
    Clean,
    /// Loop budget spent with records remaining
    MaxLoops,
    /// Single-pass mode finished
    Done,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Clean => "CLEAN EXIT",
            RunOutcome::MaxLoops => "MAX LOOPS",
            RunOutcome::Done => "DONE",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate result of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub run_id: Uuid,
    pub loop_index: u32,
    pub loop_budget: u32,
    pub mode: RunMode,
    /// Chain name or record category
    pub target: String,
    pub succeeded: u64,
    pub failed: u64,
    /// Informational only
    pub skipped: u64,
    /// Totals including this pass
    pub totals: RunTotals,
    /// Set when the run ends with this pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl PassReport {
    /// Count results for `state`, leaving the outcome undecided.
    pub fn tally(results: &[ItemResult], state: &RunState) -> Self {
        let count = |status: ItemStatus| results.iter().filter(|r| r.status == status).count() as u64;
        let succeeded = count(ItemStatus::Success);
        let failed = count(ItemStatus::Failure);

        Self {
            run_id: state.run_id,
            loop_index: state.loop_index,
            loop_budget: state.loop_budget,
            mode: state.mode(),
            target: state.target.label().to_string(),
            succeeded,
            failed,
            skipped: count(ItemStatus::Skipped),
            totals: state.totals.add(succeeded, failed),
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Subject and body of the completion notification.
    pub fn completion_message(&self) -> (String, String) {
        let outcome = self.outcome.map(|o| o.label()).unwrap_or("INCOMPLETE");
        let subject = format!("Bulk delete complete: {}", outcome);
        let body = format!(
            "Run: {}\nTarget: {} {}\nDeleted: {}\nFailed: {}\nSkipped: {}\nLoops Run: {}\nTotal Deleted: {}\nTotal Failed: {}",
            self.run_id,
            self.mode,
            self.target,
            self.succeeded,
            self.failed,
            self.skipped,
            self.loop_index,
            self.totals.deleted,
            self.totals.failed,
        );
        (subject, body)
    }
}

/// Report of a pass plus the state of the pass to submit next, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub report: PassReport,
    pub next: Option<RunState>,
}

pub struct PassSummarizer {
    store: Arc<dyn RecordStore>,
    registry: Arc<ChainRegistry>,
    notifier: Arc<dyn Notifier>,
    recipient: Option<String>,
}

impl PassSummarizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<ChainRegistry>,
        notifier: Arc<dyn Notifier>,
        recipient: Option<String>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            recipient: recipient.filter(|r| !r.trim().is_empty()),
        }
    }

    /// Tally `results` and decide between another pass and termination.
    ///
    /// Only chain sweeps loop, and only while the residue probe still finds
    /// eligible records and the budget allows another pass.
    pub async fn summarize(&self, results: &[ItemResult], state: &RunState) -> Summary {
        let mut report = PassReport::tally(results, state);

        let Some(chain_name) = state.target.chain() else {
            report.outcome = Some(RunOutcome::Done);
            return Summary { report, next: None };
        };

        let chain = match self.registry.resolve(chain_name) {
            Ok(chain) => chain,
            Err(e) => {
                error!(chain = chain_name, error = %e, "Cannot probe unknown chain");
                report.outcome = Some(RunOutcome::Done);
                return Summary { report, next: None };
            }
        };

        if !self.has_residue(chain).await {
            report.outcome = Some(RunOutcome::Clean);
            return Summary { report, next: None };
        }

        if state.budget_exhausted() {
            warn!(
                run_id = %state.run_id,
                chain = chain_name,
                loop_index = state.loop_index,
                "Loop budget exhausted with records remaining"
            );
            report.outcome = Some(RunOutcome::MaxLoops);
            return Summary { report, next: None };
        }

        let next = state.next_loop(report.totals);
        Summary {
            report,
            next: Some(next),
        }
    }

    /// Cheap existence probe: one row per stage, stopping at the first hit.
    /// A failing probe counts as no hit for that stage.
    pub async fn has_residue(&self, chain: &Chain) -> bool {
        for stage in &chain.stages {
            let probe = RecordQuery::top(&stage.source, Some(stage.filter.clone()), 1);
            match self.store.query(&probe).await {
                Ok(ids) if !ids.is_empty() => return true,
                Ok(_) => {}
                Err(e) => {
                    warn!(chain = %chain.name, stage = %stage.category, error = %e, "Residue probe failed");
                }
            }
        }
        false
    }

    /// Report a terminated run to its requester, once.
    pub async fn finalize(&self, report: &PassReport) {
        info!(
            run_id = %report.run_id,
            target = %report.target,
            outcome = ?report.outcome,
            loops = report.loop_index,
            deleted = report.totals.deleted,
            failed = report.totals.failed,
            "Run finished"
        );

        let Some(recipient) = &self.recipient else {
            return;
        };
        let (subject, body) = report.completion_message();
        if let Err(e) = self.notifier.notify(recipient, &subject, &body).await {
            error!(run_id = %report.run_id, recipient = %recipient, error = %e, "Completion notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::RunTarget;
    use crate::notify::RecordingNotifier;
    use crate::store::{InMemoryStore, StoredRecord};

    fn summarizer(store: Arc<InMemoryStore>, notifier: Arc<RecordingNotifier>) -> PassSummarizer {
        PassSummarizer::new(
            store,
            Arc::new(ChainRegistry::builtin()),
            notifier,
            Some("ops@example.com".to_string()),
        )
    }

    fn o2c_state(budget: u32) -> RunState {
        RunState::new(
            RunTarget::ChainSweep {
                chain: "O2C".to_string(),
            },
            budget,
        )
    }

    fn results(statuses: &[ItemStatus]) -> Vec<ItemResult> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| ItemResult {
                id: Some(i as i64 + 1),
                category: "invoice".to_string(),
                status: *status,
                detail: None,
            })
            .collect()
    }

    #[test]
    fn test_tally_excludes_skipped() {
        let state = o2c_state(5);
        let report = PassReport::tally(
            &results(&[ItemStatus::Success, ItemStatus::Skipped, ItemStatus::Failure]),
            &state,
        );
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.totals, RunTotals { deleted: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_non_chain_mode_is_done() {
        let store = Arc::new(InMemoryStore::new());
        let s = summarizer(store, Arc::new(RecordingNotifier::default()));
        let state = RunState::new(
            RunTarget::DeleteAll {
                category: "invoice".to_string(),
            },
            5,
        );
        let summary = s.summarize(&[], &state).await;
        assert_eq!(summary.report.outcome, Some(RunOutcome::Done));
        assert!(summary.next.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_is_clean() {
        let store = Arc::new(InMemoryStore::new());
        let s = summarizer(store, Arc::new(RecordingNotifier::default()));
        let summary = s.summarize(&[], &o2c_state(5)).await;
        assert_eq!(summary.report.outcome, Some(RunOutcome::Clean));
    }

    #[tokio::test]
    async fn test_residue_within_budget_schedules_next_loop() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(StoredRecord::transaction("salesorder", "SalesOrd"));
        let s = summarizer(store, Arc::new(RecordingNotifier::default()));
        let state = o2c_state(5);

        let summary = s.summarize(&results(&[ItemStatus::Success]), &state).await;
        assert!(summary.report.outcome.is_none());
        let next = summary.next.unwrap();
        assert_eq!(next.loop_index, 2);
        assert_eq!(next.totals.deleted, 1);
    }

    #[tokio::test]
    async fn test_residue_at_budget_is_max_loops() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(StoredRecord::transaction("salesorder", "SalesOrd"));
        let s = summarizer(store, Arc::new(RecordingNotifier::default()));
        let state = o2c_state(1);

        let summary = s.summarize(&[], &state).await;
        assert_eq!(summary.report.outcome, Some(RunOutcome::MaxLoops));
        assert!(summary.next.is_none());
    }

    #[tokio::test]
    async fn test_residue_probe_short_circuits_and_tolerates_errors() {
        let store = Arc::new(InMemoryStore::new());
        store.insert(StoredRecord::transaction("customerpayment", "CustPymt"));
        let s = summarizer(store.clone(), Arc::new(RecordingNotifier::default()));
        let chain = crate::chain::order_to_cash();

        assert!(s.has_residue(&chain).await);
        assert_eq!(store.queries().len(), 1);
        assert_eq!(store.queries()[0].limit, 1);

        store.clear_log();
        store.fail_queries_for("transaction");
        assert!(!s.has_residue(&chain).await);
        assert_eq!(store.queries().len(), chain.stages.len());
    }

    #[tokio::test]
    async fn test_finalize_notifies_once_with_outcome_subject() {
        let notifier = Arc::new(RecordingNotifier::default());
        let s = summarizer(Arc::new(InMemoryStore::new()), notifier.clone());
        let mut report = PassReport::tally(&[], &o2c_state(5));
        report.outcome = Some(RunOutcome::Clean);

        s.finalize(&report).await;
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Bulk delete complete: CLEAN EXIT");
        assert!(sent[0].body.contains("Loops Run: 1"));
    }

    #[tokio::test]
    async fn test_finalize_without_recipient_sends_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let s = PassSummarizer::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ChainRegistry::builtin()),
            notifier.clone(),
            Some("  ".to_string()),
        );
        let mut report = PassReport::tally(&[], &o2c_state(5));
        report.outcome = Some(RunOutcome::Done);
        s.finalize(&report).await;
        assert!(notifier.sent().is_empty());
    }
}

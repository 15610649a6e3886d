//! Deletion executor: the map phase of a pass.
//!
//! Every candidate is attempted exactly once on its own tokio task, with
//! parallelism bounded by a semaphore. A task that panics is reported as a
//! failure for its candidate; `execute` returns only after every candidate
//! has been classified.

use crate::engine::PassEvent;
use crate::engine::discovery::Candidate;
use crate::errors::DeleteError;
use crate::store::RecordStore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Classification of one deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failure,
    /// Record already gone or concurrently modified; counted as neither
    Skipped,
}

/// Outcome of one deletion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: Option<i64>,
    pub category: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemResult {
    pub fn success(candidate: &Candidate) -> Self {
        Self::with_status(candidate, ItemStatus::Success, None)
    }

    pub fn skipped(candidate: &Candidate, detail: &str) -> Self {
        Self::with_status(candidate, ItemStatus::Skipped, Some(detail.to_string()))
    }

    pub fn failure(candidate: &Candidate, detail: &str) -> Self {
        Self::with_status(candidate, ItemStatus::Failure, Some(detail.to_string()))
    }

    fn with_status(candidate: &Candidate, status: ItemStatus, detail: Option<String>) -> Self {
        Self {
            id: candidate.id,
            category: candidate.category.clone(),
            status,
            detail,
        }
    }
}

pub struct DeletionExecutor {
    store: Arc<dyn RecordStore>,
    max_parallel: usize,
    event_tx: Option<mpsc::Sender<PassEvent>>,
}

impl DeletionExecutor {
    pub fn new(store: Arc<dyn RecordStore>, max_parallel: usize) -> Self {
        Self {
            store,
            max_parallel: max_parallel.max(1),
            event_tx: None,
        }
    }

    /// Set the event channel for per-item progress.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<PassEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Attempt every candidate and return one result per candidate, in
    /// candidate order.
    pub async fn execute(&self, candidates: Vec<Candidate>) -> Vec<ItemResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles: Vec<(Candidate, JoinHandle<ItemResult>)> =
            Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let event_tx = self.event_tx.clone();
            let task_candidate = candidate.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = execute_one(store.as_ref(), &task_candidate).await;
                if let Some(tx) = event_tx {
                    tx.send(PassEvent::ItemCompleted {
                        result: result.clone(),
                    })
                    .await
                    .ok();
                }
                result
            });
            handles.push((candidate, handle));
        }

        let (candidates, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        candidates
            .iter()
            .zip(joined)
            .map(|(candidate, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        category = %candidate.category,
                        id = ?candidate.id,
                        error = %e,
                        "Deletion worker did not complete"
                    );
                    ItemResult::failure(candidate, &format!("worker panicked: {}", e))
                }
            })
            .collect()
    }
}

/// Attempt a single deletion and classify the outcome.
pub async fn execute_one(store: &dyn RecordStore, candidate: &Candidate) -> ItemResult {
    let id = match candidate.id {
        Some(id) if !candidate.category.is_empty() => id,
        _ => {
            error!(
                category = %candidate.category,
                id = ?candidate.id,
                "Malformed candidate, delete not attempted"
            );
            return ItemResult::failure(candidate, "malformed candidate");
        }
    };

    match store.delete(&candidate.category, id).await {
        Ok(()) => {
            debug!(category = %candidate.category, id, "Deleted");
            ItemResult::success(candidate)
        }
        Err(e @ (DeleteError::NotFound | DeleteError::ConcurrentModification)) => {
            debug!(category = %candidate.category, id, reason = %e, "Skipped");
            ItemResult::skipped(candidate, &e.to_string())
        }
        Err(DeleteError::Other(detail)) => {
            error!(category = %candidate.category, id, error = %detail, "Delete failed");
            ItemResult::failure(candidate, &detail)
        }
    }
}

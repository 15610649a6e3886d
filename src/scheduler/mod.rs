//! Job scheduler boundary.
//!
//! A pass is submitted as a `(definition, params)` pair and runs later as an
//! independent unit of work. `LocalScheduler` is a bounded in-process queue:
//! submission never blocks, a full queue is a `SubmitError::QueueFull`.

use crate::errors::SubmitError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Flat parameters carried by a job.
pub type JobParams = BTreeMap<String, String>;

/// Identifier assigned to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub definition: String,
    pub params: JobParams,
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Submit `definition` with `params` for later execution.
    async fn submit(&self, definition: &str, params: JobParams) -> Result<JobId, SubmitError>;
}

/// Sending half of the in-process job queue.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    tx: mpsc::Sender<Job>,
    capacity: usize,
}

/// Receiving half of the in-process job queue.
#[derive(Debug)]
pub struct JobQueue {
    rx: mpsc::Receiver<Job>,
}

/// Create a scheduler and the queue its jobs land in.
pub fn local_queue(capacity: usize) -> (LocalScheduler, JobQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (LocalScheduler { tx, capacity }, JobQueue { rx })
}

#[async_trait]
impl JobScheduler for LocalScheduler {
    async fn submit(&self, definition: &str, params: JobParams) -> Result<JobId, SubmitError> {
        let job = Job {
            id: JobId::new(),
            definition: definition.to_string(),
            params,
        };
        let id = job.id;
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        Ok(id)
    }
}

impl JobQueue {
    /// Next queued job, without waiting.
    pub fn try_next(&mut self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_receive() {
        let (scheduler, mut queue) = local_queue(2);
        let mut params = JobParams::new();
        params.insert("reaper_loop".to_string(), "1".to_string());

        let id = scheduler.submit("reaper.pass", params.clone()).await.unwrap();
        let job = queue.try_next().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.definition, "reaper.pass");
        assert_eq!(job.params, params);
        assert!(queue.is_empty());
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_submission() {
        let (scheduler, _queue) = local_queue(1);
        scheduler.submit("reaper.pass", JobParams::new()).await.unwrap();
        let err = scheduler
            .submit("reaper.pass", JobParams::new())
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::QueueFull { capacity: 1 });
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_submission() {
        let (scheduler, queue) = local_queue(1);
        drop(queue);
        let err = scheduler
            .submit("reaper.pass", JobParams::new())
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::Closed);
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}

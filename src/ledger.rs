//! Append-only run ledger.
//!
//! One line per event: `run|target|loop|status|job|timestamp`. The ledger is
//! the controller's memory of which `(run, target, loop)` keys were already
//! submitted, so a re-executed summarize step or a restarted process never
//! submits the same pass twice.

use crate::engine::state::RunKey;
use crate::scheduler::JobId;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Pass handed to the scheduler
    Submitted,
    /// Submission failed; the run will not advance
    Halted,
    Clean,
    MaxLoops,
    Done,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Submitted => "submitted",
            LedgerStatus::Halted => "halted",
            LedgerStatus::Clean => "clean",
            LedgerStatus::MaxLoops => "max_loops",
            LedgerStatus::Done => "done",
        }
    }

    /// Whether this entry marks a submission attempt for its key.
    pub fn claims_key(&self) -> bool {
        matches!(self, LedgerStatus::Submitted | LedgerStatus::Halted)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LedgerStatus::Submitted)
    }

    /// Whether this entry records a run that ended and was reported.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Clean | LedgerStatus::MaxLoops | LedgerStatus::Done
        )
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(LedgerStatus::Submitted),
            "halted" => Ok(LedgerStatus::Halted),
            "clean" => Ok(LedgerStatus::Clean),
            "max_loops" => Ok(LedgerStatus::MaxLoops),
            "done" => Ok(LedgerStatus::Done),
            other => Err(format!("unknown ledger status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: Uuid,
    pub target: String,
    pub loop_index: u32,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn key(&self) -> RunKey {
        RunKey {
            run_id: self.run_id,
            target: self.target.clone(),
            loop_index: self.loop_index,
        }
    }

    fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}\n",
            self.run_id,
            self.target.replace('|', "_"),
            self.loop_index,
            self.status.as_str(),
            self.job.as_deref().unwrap_or("-"),
            self.timestamp.to_rfc3339()
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 6 {
            return None;
        }
        Some(Self {
            run_id: Uuid::parse_str(parts[0]).ok()?,
            target: parts[1].to_string(),
            loop_index: parts[2].parse().ok()?,
            status: parts[3].parse().ok()?,
            job: (parts[4] != "-").then(|| parts[4].to_string()),
            timestamp: DateTime::parse_from_rfc3339(parts[5])
                .ok()?
                .with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    claimed: HashSet<RunKey>,
    finished: HashSet<Uuid>,
    entries: Vec<LedgerEntry>,
}

/// Submission ledger, optionally backed by a file.
#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl Ledger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the ledger file at `path`, loading every recorded entry.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = Self::read(&path)?;
        let claimed = entries
            .iter()
            .filter(|e| e.status.claims_key())
            .map(LedgerEntry::key)
            .collect();
        let finished = entries
            .iter()
            .filter(|e| e.status.is_finished())
            .map(|e| e.run_id)
            .collect();
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                claimed,
                finished,
                entries,
            }),
        })
    }

    /// Parse the ledger file at `path`. Unreadable lines are ignored.
    pub fn read(path: &Path) -> Result<Vec<LedgerEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).context("Failed to read ledger")?;
        Ok(content.lines().filter_map(LedgerEntry::parse).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `key` for submission. Returns false if it was already taken.
    pub fn claim(&self, key: &RunKey) -> bool {
        self.lock().claimed.insert(key.clone())
    }

    pub fn contains(&self, key: &RunKey) -> bool {
        self.lock().claimed.contains(key)
    }

    /// Reserve the end of run `run_id`. Returns false if the run already
    /// finished, so completion is reported at most once.
    pub fn claim_finish(&self, run_id: Uuid) -> bool {
        self.lock().finished.insert(run_id)
    }

    /// Append an entry for `key`.
    pub fn record(&self, key: &RunKey, status: LedgerStatus, job: Option<JobId>) -> Result<()> {
        let entry = LedgerEntry {
            run_id: key.run_id,
            target: key.target.clone(),
            loop_index: key.loop_index,
            status,
            job: job.map(|j| j.to_string()),
            timestamp: Utc::now(),
        };

        if let Some(path) = &self.path {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("Failed to open ledger")?
                .write_all(entry.to_line().as_bytes())
                .context("Failed to write ledger entry")?;
        }

        let mut inner = self.lock();
        if status.claims_key() {
            inner.claimed.insert(key.clone());
        }
        if status.is_finished() {
            inner.finished.insert(key.run_id);
        }
        inner.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    /// Entries of one run, in recording order.
    pub fn run_entries(&self, run_id: Uuid) -> Vec<LedgerEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }
}

/// Latest entry of every run in `entries`, most recent first.
pub fn latest_per_run(entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
    let mut latest: BTreeMap<Uuid, &LedgerEntry> = BTreeMap::new();
    for entry in entries {
        latest.insert(entry.run_id, entry);
    }
    let mut runs: Vec<LedgerEntry> = latest.into_values().cloned().collect();
    runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    runs
}

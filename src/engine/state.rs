//! Run state threaded across passes and its flat wire encoding.
//!
//! A `RunState` is built for exactly one pass. The scheduler boundary only
//! carries `String -> String` parameters, so the state round-trips through
//! `to_params` / `from_params`: flags are `T`/`F`, the loop index is a decimal
//! string and explicit ids stay a JSON array string.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Default maximum number of passes per run.
pub const DEFAULT_LOOP_BUDGET: u32 = 5;

pub const PARAM_RUN_ID: &str = "reaper_run_id";
pub const PARAM_CHAIN_MODE: &str = "reaper_chain_mode";
pub const PARAM_CHAIN: &str = "reaper_chain";
pub const PARAM_DELETE_ALL: &str = "reaper_delete_all";
pub const PARAM_RECORD_TYPE: &str = "reaper_record_type";
pub const PARAM_RECORD_IDS: &str = "reaper_record_ids";
pub const PARAM_LOOP: &str = "reaper_loop";
pub const PARAM_LOOP_BUDGET: &str = "reaper_loop_budget";
pub const PARAM_DELETED_TOTAL: &str = "reaper_deleted_total";
pub const PARAM_FAILED_TOTAL: &str = "reaper_failed_total";

/// How a run selects its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    ExplicitIds,
    DeleteAll,
    ChainSweep,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::ExplicitIds => "explicit-ids",
            RunMode::DeleteAll => "delete-all",
            RunMode::ChainSweep => "chain-sweep",
        };
        f.write_str(s)
    }
}

/// What a run deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RunTarget {
    /// A caller-supplied id list for one category, kept as the raw JSON array
    /// string so malformed input surfaces during discovery, not decoding.
    ExplicitIds { category: String, ids: String },
    DeleteAll { category: String },
    ChainSweep { chain: String },
}

impl RunTarget {
    pub fn mode(&self) -> RunMode {
        match self {
            RunTarget::ExplicitIds { .. } => RunMode::ExplicitIds,
            RunTarget::DeleteAll { .. } => RunMode::DeleteAll,
            RunTarget::ChainSweep { .. } => RunMode::ChainSweep,
        }
    }

    /// Record category for non-chain modes, chain name for chain sweeps.
    pub fn label(&self) -> &str {
        match self {
            RunTarget::ExplicitIds { category, .. } | RunTarget::DeleteAll { category } => category,
            RunTarget::ChainSweep { chain } => chain,
        }
    }

    pub fn chain(&self) -> Option<&str> {
        match self {
            RunTarget::ChainSweep { chain } => Some(chain),
            _ => None,
        }
    }
}

/// Deletions and failures accumulated over every pass of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub deleted: u64,
    pub failed: u64,
}

impl RunTotals {
    pub fn add(self, deleted: u64, failed: u64) -> Self {
        Self {
            deleted: self.deleted + deleted,
            failed: self.failed + failed,
        }
    }
}

/// Identity of one submitted pass. A key is never submitted twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub run_id: Uuid,
    pub target: String,
    pub loop_index: u32,
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.run_id, self.target, self.loop_index)
    }
}

/// Parameters of a single pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub target: RunTarget,
    /// 1-based pass number
    pub loop_index: u32,
    pub loop_budget: u32,
    /// Totals of all earlier passes
    pub totals: RunTotals,
}

impl RunState {
    /// State of the first pass of a new run.
    pub fn new(target: RunTarget, loop_budget: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            loop_index: 1,
            loop_budget: loop_budget.max(1),
            totals: RunTotals::default(),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.target.mode()
    }

    pub fn key(&self) -> RunKey {
        RunKey {
            run_id: self.run_id,
            target: self.target.label().to_string(),
            loop_index: self.loop_index,
        }
    }

    /// True once this pass is the last one the budget allows.
    pub fn budget_exhausted(&self) -> bool {
        self.loop_index >= self.loop_budget
    }

    /// State of the following pass: same run and target, loop index + 1.
    pub fn next_loop(&self, totals: RunTotals) -> RunState {
        RunState {
            run_id: self.run_id,
            target: self.target.clone(),
            loop_index: self.loop_index + 1,
            loop_budget: self.loop_budget,
            totals,
        }
    }

    /// Encode as flat scheduler parameters.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let flag = |on: bool| String::from(if on { "T" } else { "F" });

        let mut params = BTreeMap::new();
        params.insert(PARAM_RUN_ID.to_string(), self.run_id.to_string());
        params.insert(
            PARAM_CHAIN_MODE.to_string(),
            flag(self.mode() == RunMode::ChainSweep),
        );
        params.insert(
            PARAM_DELETE_ALL.to_string(),
            flag(self.mode() == RunMode::DeleteAll),
        );
        match &self.target {
            RunTarget::ExplicitIds { category, ids } => {
                params.insert(PARAM_RECORD_TYPE.to_string(), category.clone());
                params.insert(PARAM_RECORD_IDS.to_string(), ids.clone());
            }
            RunTarget::DeleteAll { category } => {
                params.insert(PARAM_RECORD_TYPE.to_string(), category.clone());
            }
            RunTarget::ChainSweep { chain } => {
                params.insert(PARAM_CHAIN.to_string(), chain.clone());
            }
        }
        params.insert(PARAM_LOOP.to_string(), self.loop_index.to_string());
        params.insert(PARAM_LOOP_BUDGET.to_string(), self.loop_budget.to_string());
        params.insert(
            PARAM_DELETED_TOTAL.to_string(),
            self.totals.deleted.to_string(),
        );
        params.insert(PARAM_FAILED_TOTAL.to_string(), self.totals.failed.to_string());
        params
    }

    /// Decode scheduler parameters.
    ///
    /// Mode precedence is record ids, then chain mode, then delete-all. A
    /// missing or unparsable loop index means the first pass.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, EngineError> {
        let get = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| get(key).is_some_and(|v| v.eq_ignore_ascii_case("T"));

        let run_id = get(PARAM_RUN_ID).ok_or(EngineError::MissingParameter(PARAM_RUN_ID))?;
        let run_id = Uuid::parse_str(run_id)
            .map_err(|e| EngineError::InvalidParameters(format!("{}: {}", PARAM_RUN_ID, e)))?;

        let target = if let Some(ids) = get(PARAM_RECORD_IDS) {
            let category = get(PARAM_RECORD_TYPE)
                .ok_or(EngineError::MissingParameter(PARAM_RECORD_TYPE))?;
            RunTarget::ExplicitIds {
                category: category.to_string(),
                ids: ids.to_string(),
            }
        } else if flag(PARAM_CHAIN_MODE) {
            let chain = get(PARAM_CHAIN).ok_or(EngineError::MissingParameter(PARAM_CHAIN))?;
            RunTarget::ChainSweep {
                chain: chain.to_string(),
            }
        } else if flag(PARAM_DELETE_ALL) {
            let category = get(PARAM_RECORD_TYPE)
                .ok_or(EngineError::MissingParameter(PARAM_RECORD_TYPE))?;
            RunTarget::DeleteAll {
                category: category.to_string(),
            }
        } else {
            return Err(EngineError::InvalidParameters(
                "no record ids, chain or delete-all flag supplied".to_string(),
            ));
        };

        let loop_index = get(PARAM_LOOP)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(1);
        let loop_budget = get(PARAM_LOOP_BUDGET)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LOOP_BUDGET);
        let totals = RunTotals {
            deleted: get(PARAM_DELETED_TOTAL)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            failed: get(PARAM_FAILED_TOTAL)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        };

        Ok(Self {
            run_id,
            target,
            loop_index,
            loop_budget,
            totals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(chain: &str) -> RunState {
        RunState::new(
            RunTarget::ChainSweep {
                chain: chain.to_string(),
            },
            DEFAULT_LOOP_BUDGET,
        )
    }

    #[test]
    fn test_new_state_starts_at_loop_one() {
        let state = sweep("O2C");
        assert_eq!(state.loop_index, 1);
        assert_eq!(state.loop_budget, 5);
        assert_eq!(state.totals, RunTotals::default());
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        let state = RunState::new(
            RunTarget::DeleteAll {
                category: "invoice".to_string(),
            },
            0,
        );
        assert_eq!(state.loop_budget, 1);
        assert!(state.budget_exhausted());
    }

    #[test]
    fn test_next_loop_increments_by_one_and_keeps_identity() {
        let state = sweep("P2P");
        let next = state.next_loop(RunTotals {
            deleted: 3,
            failed: 1,
        });
        assert_eq!(next.loop_index, 2);
        assert_eq!(next.run_id, state.run_id);
        assert_eq!(next.target, state.target);
        assert_eq!(next.totals.deleted, 3);
        assert_ne!(next.key(), state.key());
    }

    #[test]
    fn test_params_encoding_uses_flat_strings() {
        let state = RunState::new(
            RunTarget::ExplicitIds {
                category: "invoice".to_string(),
                ids: "[101,102]".to_string(),
            },
            5,
        );
        let params = state.to_params();
        assert_eq!(params[PARAM_CHAIN_MODE], "F");
        assert_eq!(params[PARAM_DELETE_ALL], "F");
        assert_eq!(params[PARAM_RECORD_IDS], "[101,102]");
        assert_eq!(params[PARAM_LOOP], "1");
        assert!(!params.contains_key(PARAM_CHAIN));

        let decoded = RunState::from_params(&params).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_record_ids_take_precedence_over_chain_mode() {
        let mut params = sweep("O2C").to_params();
        params.insert(PARAM_RECORD_IDS.to_string(), "[7]".to_string());
        params.insert(PARAM_RECORD_TYPE.to_string(), "invoice".to_string());

        let decoded = RunState::from_params(&params).unwrap();
        assert_eq!(decoded.mode(), RunMode::ExplicitIds);
    }

    #[test]
    fn test_chain_mode_takes_precedence_over_delete_all() {
        let mut params = sweep("O2C").to_params();
        params.insert(PARAM_DELETE_ALL.to_string(), "T".to_string());
        params.insert(PARAM_RECORD_TYPE.to_string(), "invoice".to_string());

        let decoded = RunState::from_params(&params).unwrap();
        assert_eq!(decoded.target.chain(), Some("O2C"));
    }

    #[test]
    fn test_missing_or_invalid_loop_defaults_to_one() {
        let mut params = sweep("O2C").to_params();
        params.insert(PARAM_LOOP.to_string(), "abc".to_string());
        assert_eq!(RunState::from_params(&params).unwrap().loop_index, 1);

        params.remove(PARAM_LOOP);
        assert_eq!(RunState::from_params(&params).unwrap().loop_index, 1);
    }

    #[test]
    fn test_no_mode_is_invalid() {
        let mut params = BTreeMap::new();
        params.insert(PARAM_RUN_ID.to_string(), Uuid::new_v4().to_string());
        params.insert(PARAM_CHAIN_MODE.to_string(), "F".to_string());
        let err = RunState::from_params(&params).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameters(_)));
    }

    #[test]
    fn test_chain_mode_without_chain_is_missing_parameter() {
        let mut params = sweep("O2C").to_params();
        params.remove(PARAM_CHAIN);
        match RunState::from_params(&params) {
            Err(EngineError::MissingParameter(name)) => assert_eq!(name, PARAM_CHAIN),
            other => panic!("Expected MissingParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_run_key_display() {
        let state = sweep("O2C");
        let key = state.key().to_string();
        assert!(key.ends_with("|O2C|1"));
        assert!(key.starts_with(&state.run_id.to_string()));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(RunMode::ChainSweep.to_string(), "chain-sweep");
        assert_eq!(RunMode::ExplicitIds.to_string(), "explicit-ids");
    }
}

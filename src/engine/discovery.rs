//! Candidate discovery: the bounded work list of one pass.

use crate::chain::ChainRegistry;
use crate::engine::state::{RunState, RunTarget};
use crate::errors::DiscoveryError;
use crate::store::{RecordQuery, RecordStore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

static NON_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("sanitizer pattern is valid"));

/// Strip everything but letters, digits and '_' from a record type name.
pub fn sanitize_category(category: &str) -> String {
    NON_IDENTIFIER.replace_all(category, "").into_owned()
}

/// One deletion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub category: String,
    /// `None` when the caller supplied something that is not a record id
    pub id: Option<i64>,
}

impl Candidate {
    pub fn new(category: &str, id: i64) -> Self {
        Self {
            category: category.to_string(),
            id: Some(id),
        }
    }

    pub fn malformed(category: &str) -> Self {
        Self {
            category: category.to_string(),
            id: None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.id.is_some() && !self.category.is_empty()
    }
}

/// Per-query bounds keeping a single pass finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryLimits {
    /// Top-N per chain stage
    pub chain_page_size: usize,
    /// Page size of the delete-all scan
    pub delete_all_page_size: usize,
    /// Cap on candidates from one delete-all scan
    pub max_flat_candidates: usize,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            chain_page_size: 500,
            delete_all_page_size: 1000,
            max_flat_candidates: 5000,
        }
    }
}

pub struct Discovery {
    store: Arc<dyn RecordStore>,
    registry: Arc<ChainRegistry>,
    limits: DiscoveryLimits,
}

impl Discovery {
    pub fn new(store: Arc<dyn RecordStore>, registry: Arc<ChainRegistry>) -> Self {
        Self {
            store,
            registry,
            limits: DiscoveryLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: DiscoveryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Produce the candidates for one pass.
    ///
    /// Only a failed delete-all scan is an error; malformed id lists and
    /// failing chain stages degrade to fewer candidates.
    pub async fn discover(&self, state: &RunState) -> Result<Vec<Candidate>, DiscoveryError> {
        let candidates = match &state.target {
            RunTarget::ExplicitIds { category, ids } => parse_explicit_ids(category, ids),
            RunTarget::DeleteAll { category } => self.scan_all(category).await?,
            RunTarget::ChainSweep { chain } => self.sweep_chain(chain).await,
        };

        info!(
            run_id = %state.run_id,
            mode = %state.mode(),
            target = state.target.label(),
            loop_index = state.loop_index,
            candidates = candidates.len(),
            "Discovery complete"
        );
        Ok(candidates)
    }

    async fn scan_all(&self, category: &str) -> Result<Vec<Candidate>, DiscoveryError> {
        let table = sanitize_category(category);
        if table.is_empty() {
            return Err(DiscoveryError::InvalidCategory(category.to_string()));
        }

        let page_size = self.limits.delete_all_page_size.max(1);
        let cap = self.limits.max_flat_candidates;
        let mut candidates = Vec::new();
        let mut offset = 0;

        while candidates.len() < cap {
            let limit = page_size.min(cap - candidates.len());
            let ids = self
                .store
                .query(&RecordQuery::page(&table, limit, offset))
                .await
                .map_err(|source| {
                    error!(category = %table, offset, error = %source, "Delete-all query failed");
                    DiscoveryError::DeleteAllQuery {
                        category: table.clone(),
                        source,
                    }
                })?;

            let fetched = ids.len();
            candidates.extend(ids.into_iter().map(|id| Candidate::new(&table, id)));
            if fetched < limit {
                break;
            }
            offset += fetched;
        }

        if cap > 0 && candidates.len() >= cap {
            warn!(
                category = %table,
                cap,
                "Delete-all scan stopped at the candidate cap; more records may remain"
            );
        }
        Ok(candidates)
    }

    async fn sweep_chain(&self, name: &str) -> Vec<Candidate> {
        let chain = match self.registry.resolve(name) {
            Ok(chain) => chain,
            Err(e) => {
                error!(chain = name, error = %e, "Cannot sweep unknown chain");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for stage in &chain.stages {
            let query = RecordQuery::top(
                &stage.source,
                Some(stage.filter.clone()),
                self.limits.chain_page_size,
            );
            match self.store.query(&query).await {
                Ok(ids) => {
                    debug!(
                        chain = name,
                        stage = %stage.category,
                        found = ids.len(),
                        "Stage queried"
                    );
                    for id in ids {
                        let candidate = Candidate::new(&stage.category, id);
                        if seen.insert(candidate.clone()) {
                            candidates.push(candidate);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        chain = name,
                        stage = %stage.category,
                        error = %e,
                        "Stage query failed, stage contributes no candidates this pass"
                    );
                }
            }
        }
        candidates
    }
}

/// Parse a JSON array of record ids.
///
/// Integers (including whole floats such as `2.0`) and integer strings
/// become candidates. Any other element becomes
/// a malformed candidate so the executor reports it. Input that is not a JSON
/// array yields no candidates at all.
pub fn parse_explicit_ids(category: &str, raw: &str) -> Vec<Candidate> {
    let values = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(values)) => values,
        Ok(_) => {
            warn!(category, input = raw, "Record id list is not a JSON array");
            return Vec::new();
        }
        Err(e) => {
            warn!(category, input = raw, error = %e, "Could not parse record id list");
            return Vec::new();
        }
    };

    if values.is_empty() {
        warn!(category, "Record id list is empty");
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::with_capacity(values.len());
    for value in values {
        let id = match &value {
            serde_json::Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match id {
            Some(id) if seen.insert(id) => candidates.push(Candidate::new(category, id)),
            Some(_) => {}
            None => candidates.push(Candidate::malformed(category)),
        }
    }
    candidates
}

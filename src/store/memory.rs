//! Instrumented in-memory record store.
//!
//! Every query is recorded in call order so tests can assert discovery
//! ordering, and failures can be injected per source or per record.
//! Records may reference other records; deleting a referenced record fails
//! the same way a foreign-key violation would in a real store.

use super::{seed_chain_with, PreviewQuery, PreviewRow, RecordQuery, RecordStore, RecordType};
use crate::chain::Chain;
use crate::errors::{DeleteError, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A record held by `InMemoryStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: i64,
    pub source: String,
    pub category: String,
    pub type_code: Option<String>,
    pub doc_id: Option<String>,
    pub name: Option<String>,
    /// Records this one references; they cannot be deleted while it exists
    pub depends_on: Vec<i64>,
}

impl StoredRecord {
    pub fn transaction(category: &str, type_code: &str) -> Self {
        Self {
            id: 0,
            source: "transaction".to_string(),
            category: category.to_string(),
            type_code: Some(type_code.to_string()),
            doc_id: None,
            name: None,
            depends_on: Vec::new(),
        }
    }

    pub fn of_type(category: &str) -> Self {
        Self {
            id: 0,
            source: category.to_string(),
            category: category.to_string(),
            type_code: None,
            doc_id: None,
            name: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_label(mut self, doc_id: &str, name: &str) -> Self {
        self.doc_id = Some(doc_id.to_string());
        self.name = Some(name.to_string());
        self
    }

    pub fn depending_on(mut self, ids: &[i64]) -> Self {
        self.depends_on = ids.to_vec();
        self
    }

    fn field(&self, field: &str) -> Result<Option<&str>, String> {
        match field {
            "type" => Ok(self.type_code.as_deref()),
            "category" => Ok(Some(self.category.as_str())),
            "source" => Ok(Some(self.source.as_str())),
            "tranid" | "doc_id" => Ok(self.doc_id.as_deref()),
            "name" | "memo" => Ok(self.name.as_deref()),
            other => Err(format!("unknown column '{}'", other)),
        }
    }

    fn matches_source(&self, source: &str) -> bool {
        self.source == source || self.category == source
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<i64, StoredRecord>,
    next_id: i64,
    queries: Vec<RecordQuery>,
    deletes: Vec<(String, i64)>,
    failing_sources: HashSet<String>,
    failing_deletes: HashMap<i64, DeleteError>,
    custom_types: Vec<RecordType>,
    custom_types_fail: bool,
}

/// Thread-safe, instrumented record store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record, assigning the next id when `record.id` is 0.
    pub fn insert(&self, mut record: StoredRecord) -> i64 {
        let mut inner = self.lock();
        if record.id == 0 {
            inner.next_id += 1;
            record.id = inner.next_id;
        } else {
            inner.next_id = inner.next_id.max(record.id);
        }
        let id = record.id;
        inner.records.insert(id, record);
        id
    }

    /// Populate every stage of `chain` with `per_stage` linked records.
    pub fn seed_chain(&self, chain: &Chain, per_stage: usize) -> usize {
        let seeded: Result<usize, Infallible> =
            seed_chain_with(chain, per_stage, |record| Ok(self.insert(record)));
        match seeded {
            Ok(count) => count,
            Err(never) => match never {},
        }
    }

    /// Make every query against `source` fail.
    pub fn fail_queries_for(&self, source: &str) {
        self.lock().failing_sources.insert(source.to_string());
    }

    /// Make every delete of `id` fail with `error`.
    pub fn fail_delete(&self, id: i64, error: DeleteError) {
        self.lock().failing_deletes.insert(id, error);
    }

    pub fn add_custom_type(&self, record_type: RecordType) {
        self.lock().custom_types.push(record_type);
    }

    pub fn fail_custom_types(&self) {
        self.lock().custom_types_fail = true;
    }

    /// Queries received so far, in call order.
    pub fn queries(&self) -> Vec<RecordQuery> {
        self.lock().queries.clone()
    }

    /// Deletes that removed a record, in completion order.
    pub fn deletes(&self) -> Vec<(String, i64)> {
        self.lock().deletes.clone()
    }

    pub fn clear_log(&self) {
        let mut inner = self.lock();
        inner.queries.clear();
        inner.deletes.clear();
    }

    pub fn contains(&self, id: i64) -> bool {
        self.lock().records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn query(&self, query: &RecordQuery) -> Result<Vec<i64>, StoreError> {
        let mut inner = self.lock();
        inner.queries.push(query.clone());

        if inner.failing_sources.contains(&query.source) {
            return Err(StoreError::Query {
                source_name: query.source.clone(),
                message: "injected query failure".to_string(),
            });
        }

        let mut ids = Vec::new();
        for record in inner.records.values() {
            if !record.matches_source(&query.source) {
                continue;
            }
            if let Some(filter) = &query.filter {
                let value = record.field(&filter.field).map_err(|message| StoreError::Query {
                    source_name: query.source.clone(),
                    message,
                })?;
                if value != Some(filter.value.as_str()) {
                    continue;
                }
            }
            ids.push(record.id);
        }

        Ok(ids.into_iter().skip(query.offset).take(query.limit).collect())
    }

    async fn delete(&self, category: &str, id: i64) -> Result<(), DeleteError> {
        let mut inner = self.lock();

        if let Some(error) = inner.failing_deletes.get(&id) {
            return Err(error.clone());
        }

        match inner.records.get(&id) {
            Some(record) if record.category == category => {}
            _ => return Err(DeleteError::NotFound),
        }

        let dependents = inner
            .records
            .values()
            .filter(|r| r.depends_on.contains(&id))
            .count();
        if dependents > 0 {
            return Err(DeleteError::Other(format!(
                "record {} is referenced by {} dependent record(s)",
                id, dependents
            )));
        }

        inner.records.remove(&id);
        inner.deletes.push((category.to_string(), id));
        Ok(())
    }

    async fn preview(&self, query: &PreviewQuery) -> Result<Vec<PreviewRow>, StoreError> {
        let inner = self.lock();
        if inner.failing_sources.contains(&query.source) {
            return Err(StoreError::Query {
                source_name: query.source.clone(),
                message: "injected query failure".to_string(),
            });
        }

        Ok(inner
            .records
            .values()
            .rev()
            .filter(|r| r.matches_source(&query.source))
            .take(query.limit)
            .map(|r| PreviewRow {
                id: r.id,
                doc_id: r.doc_id.clone(),
                name: r.name.clone(),
            })
            .collect())
    }

    async fn custom_record_types(&self) -> Result<Vec<RecordType>, StoreError> {
        let inner = self.lock();
        if inner.custom_types_fail {
            return Err(StoreError::Unavailable("custom record types".to_string()));
        }
        Ok(inner.custom_types.clone())
    }
}

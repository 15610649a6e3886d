//! Record store abstraction consumed by the engine.
//!
//! The engine never talks to a database directly. It issues bounded queries
//! (`RecordQuery`) and single-record deletes through `RecordStore`, which keeps
//! discovery and execution testable against `InMemoryStore` and runnable
//! against `SqliteStore`.

mod memory;
mod sqlite;

pub use memory::{InMemoryStore, StoredRecord};
pub use sqlite::{SqliteStore, StoreHandle};

use crate::chain::{Chain, StageFilter};
use crate::errors::{DeleteError, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A bounded query for record identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// Table (or record type) to scan
    pub source: String,
    /// Optional equality predicate
    pub filter: Option<StageFilter>,
    /// Maximum number of rows to return ("top N")
    pub limit: usize,
    /// Rows to skip, for paginated full scans
    pub offset: usize,
}

impl RecordQuery {
    /// Top-N query over `source` restricted by `filter`.
    pub fn top(source: &str, filter: Option<StageFilter>, limit: usize) -> Self {
        Self {
            source: source.to_string(),
            filter,
            limit,
            offset: 0,
        }
    }

    /// One page of a full scan over `source`.
    pub fn page(source: &str, page_size: usize, offset: usize) -> Self {
        Self {
            source: source.to_string(),
            filter: None,
            limit: page_size,
            offset,
        }
    }
}

/// How a record type labels its rows in previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Transactions: document number and memo
    Transaction,
    /// Customers, vendors, employees, contacts: entity id and alternate name
    Entity,
    /// Custom record types: record name only
    Custom,
}

impl RecordKind {
    const ENTITY_TYPES: [&'static str; 4] = ["customer", "vendor", "employee", "contact"];

    /// Classify a record type by its identifier.
    pub fn of(category: &str) -> Self {
        let lower = category.to_lowercase();
        if lower.starts_with("customrecord") {
            RecordKind::Custom
        } else if Self::ENTITY_TYPES.contains(&lower.as_str()) {
            RecordKind::Entity
        } else {
            RecordKind::Transaction
        }
    }
}

/// Preview request for one record type, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewQuery {
    pub source: String,
    pub kind: RecordKind,
    pub limit: usize,
}

/// A raw preview row; labels are assembled by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub id: i64,
    pub doc_id: Option<String>,
    pub name: Option<String>,
}

/// A selectable record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    pub id: String,
    pub display_name: String,
}

impl RecordType {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// Populate every stage of `chain` with `per_stage` records through `insert`.
///
/// Stages are created last to first and each record references the record at
/// the same position in the following stage, so a seeded chain can only be
/// cleared front to back.
pub(crate) fn seed_chain_with<E>(
    chain: &Chain,
    per_stage: usize,
    mut insert: impl FnMut(StoredRecord) -> Result<i64, E>,
) -> Result<usize, E> {
    let mut upstream: Vec<i64> = Vec::new();
    let mut created = 0;
    for stage in chain.stages.iter().rev() {
        let mut ids = Vec::with_capacity(per_stage);
        for n in 0..per_stage {
            let mut record = StoredRecord::of_type(&stage.category);
            record.source = stage.source.clone();
            record.doc_id = Some(format!("{}-{}", stage.filter.value, n + 1));
            if stage.filter.field == "type" {
                record.type_code = Some(stage.filter.value.clone());
            }
            if let Some(parent) = upstream.get(n) {
                record.depends_on = vec![*parent];
            }
            ids.push(insert(record)?);
            created += 1;
        }
        upstream = ids;
    }
    Ok(created)
}

/// Query and delete primitives of the underlying data store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Return identifiers matching `query`, ordered by id, bounded by
    /// `query.limit` and starting at `query.offset`.
    async fn query(&self, query: &RecordQuery) -> Result<Vec<i64>, StoreError>;

    /// Delete one record.
    async fn delete(&self, category: &str, id: i64) -> Result<(), DeleteError>;

    /// Preview rows for a record type, newest first.
    async fn preview(&self, query: &PreviewQuery) -> Result<Vec<PreviewRow>, StoreError>;

    /// Active custom record types known to the store.
    async fn custom_record_types(&self) -> Result<Vec<RecordType>, StoreError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_classification() {
        assert_eq!(RecordKind::of("customrecord_widget"), RecordKind::Custom);
        assert_eq!(RecordKind::of("CustomRecord_Widget"), RecordKind::Custom);
        assert_eq!(RecordKind::of("vendor"), RecordKind::Entity);
        assert_eq!(RecordKind::of("Contact"), RecordKind::Entity);
        assert_eq!(RecordKind::of("invoice"), RecordKind::Transaction);
    }

    #[test]
    fn test_record_query_constructors() {
        let top = RecordQuery::top("transaction", Some(StageFilter::new("type", "CustInvc")), 500);
        assert_eq!(top.limit, 500);
        assert_eq!(top.offset, 0);

        let page = RecordQuery::page("invoice", 1000, 2000);
        assert!(page.filter.is_none());
        assert_eq!(page.offset, 2000);
    }
}

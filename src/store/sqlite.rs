use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use super::{
    PreviewQuery, PreviewRow, RecordQuery, RecordStore, RecordType, StoredRecord, seed_chain_with,
};
use crate::chain::Chain;
use crate::errors::{DeleteError, StoreError};

/// Async-safe handle to the record database.
///
/// Wraps `SqliteStore` behind `Arc<Mutex>` and runs every statement on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<SqliteStore>>,
}

impl StoreHandle {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(SqliteStore::new(path)?))
    }

    /// Run a closure with access to the store on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SqliteStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }

    /// Acquire the store synchronously. Only for seeding and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, SqliteStore>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }
}

#[async_trait]
impl RecordStore for StoreHandle {
    async fn query(&self, query: &RecordQuery) -> Result<Vec<i64>, StoreError> {
        let query = query.clone();
        let source_name = query.source.clone();
        self.call(move |db| Ok(db.query_ids(&query)))
            .await
            .map_err(StoreError::Other)?
            .map_err(|e| StoreError::Query {
                source_name,
                message: e.to_string(),
            })
    }

    async fn delete(&self, category: &str, id: i64) -> Result<(), DeleteError> {
        let category = category.to_string();
        self.call(move |db| Ok(db.delete_record(&category, id)))
            .await
            .map_err(|e| DeleteError::Other(e.to_string()))?
    }

    async fn preview(&self, query: &PreviewQuery) -> Result<Vec<PreviewRow>, StoreError> {
        let query = query.clone();
        self.call(move |db| db.preview_rows(&query))
            .await
            .map_err(StoreError::Other)
    }

    async fn custom_record_types(&self) -> Result<Vec<RecordType>, StoreError> {
        self.call(|db| db.active_custom_types())
            .await
            .map_err(StoreError::Other)
    }
}

/// Local SQLite rendition of the record store.
///
/// All record types share the `records` table. `record_links` models
/// references between records; deleting a record that is still referenced
/// violates the foreign key and is reported as a failed delete.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 2000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                type_code TEXT,
                doc_id TEXT,
                name TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS record_links (
                record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
                depends_on INTEGER NOT NULL REFERENCES records(id),
                PRIMARY KEY (record_id, depends_on)
            );

            CREATE TABLE IF NOT EXISTS custom_record_types (
                scriptid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_inactive INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_records_source ON records(source, type_code);
            CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
            CREATE INDEX IF NOT EXISTS idx_record_links_parent ON record_links(depends_on);
            ",
        )?;
        Ok(())
    }

    fn column_for(field: &str) -> Result<&'static str> {
        match field {
            "type" => Ok("type_code"),
            "category" => Ok("category"),
            "source" => Ok("source"),
            "tranid" | "doc_id" => Ok("doc_id"),
            "name" | "memo" => Ok("name"),
            other => anyhow::bail!("unknown column '{}'", other),
        }
    }

    /// Identifiers matching `query`, ordered by id.
    pub fn query_ids(&self, query: &RecordQuery) -> Result<Vec<i64>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

        let ids = match &query.filter {
            Some(filter) => {
                let column = Self::column_for(&filter.field)?;
                let sql = format!(
                    "SELECT id FROM records WHERE (source = ?1 OR category = ?1) AND {} = ?2
                     ORDER BY id LIMIT ?3 OFFSET ?4",
                    column
                );
                let mut stmt = self.conn.prepare(&sql)?;
                stmt.query_map(
                    params![query.source, filter.value, limit, offset],
                    |row| row.get(0),
                )?
                .collect::<rusqlite::Result<Vec<i64>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id FROM records WHERE source = ?1 OR category = ?1
                     ORDER BY id LIMIT ?2 OFFSET ?3",
                )?;
                stmt.query_map(params![query.source, limit, offset], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?
            }
        };
        Ok(ids)
    }

    /// Delete one record of `category`, mapping SQLite failures onto
    /// `DeleteError`.
    pub fn delete_record(&self, category: &str, id: i64) -> Result<(), DeleteError> {
        let result = self.conn.execute(
            "DELETE FROM records WHERE id = ?1 AND category = ?2",
            params![id, category],
        );
        match result {
            Ok(0) => Err(DeleteError::NotFound),
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, message)) => match err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    Err(DeleteError::ConcurrentModification)
                }
                ErrorCode::ConstraintViolation
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                {
                    Err(DeleteError::Other(
                        "record is referenced by dependent records".to_string(),
                    ))
                }
                _ => Err(DeleteError::Other(
                    message.unwrap_or_else(|| err.to_string()),
                )),
            },
            Err(e) => Err(DeleteError::Other(e.to_string())),
        }
    }

    pub fn preview_rows(&self, query: &PreviewQuery) -> Result<Vec<PreviewRow>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, doc_id, name FROM records WHERE source = ?1 OR category = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![query.source, limit], |row| {
                Ok(PreviewRow {
                    id: row.get(0)?,
                    doc_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn active_custom_types(&self) -> Result<Vec<RecordType>> {
        let mut stmt = self.conn.prepare(
            "SELECT scriptid, name FROM custom_record_types WHERE is_inactive = 0 ORDER BY name",
        )?;
        let types = stmt
            .query_map([], |row| {
                Ok(RecordType {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(types)
    }

    /// Insert a record and its references, returning the new id.
    pub fn insert_record(&self, record: &StoredRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO records (source, category, type_code, doc_id, name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.source,
                record.category,
                record.type_code,
                record.doc_id,
                record.name
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        for parent in &record.depends_on {
            self.conn
                .execute(
                    "INSERT INTO record_links (record_id, depends_on) VALUES (?1, ?2)",
                    params![id, parent],
                )
                .with_context(|| format!("Failed to link record {} to {}", id, parent))?;
        }
        Ok(id)
    }

    /// Populate every stage of `chain` with `per_stage` linked records.
    pub fn seed_chain(&self, chain: &Chain, per_stage: usize) -> Result<usize> {
        seed_chain_with(chain, per_stage, |record| self.insert_record(&record))
    }

    pub fn add_custom_type(&self, scriptid: &str, name: &str, inactive: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO custom_record_types (scriptid, name, is_inactive) VALUES (?1, ?2, ?3)
             ON CONFLICT(scriptid) DO UPDATE SET name = excluded.name, is_inactive = excluded.is_inactive",
            params![scriptid, name, inactive as i64],
        )?;
        Ok(())
    }

    pub fn get_record(&self, id: i64) -> Result<Option<StoredRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, source, category, type_code, doc_id, name FROM records WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredRecord {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        category: row.get(2)?,
                        type_code: row.get(3)?,
                        doc_id: row.get(4)?,
                        name: row.get(5)?,
                        depends_on: Vec::new(),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Number of live records, optionally restricted to one category.
    pub fn count(&self, category: Option<&str>) -> Result<usize> {
        let count: i64 = match category {
            Some(category) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE category = ?1",
                params![category],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{StageFilter, procure_to_pay};
    use crate::store::RecordKind;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        let table_count: i32 = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('records', 'record_links', 'custom_record_types')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3);
        Ok(())
    }

    #[test]
    fn test_query_ids_with_filter_and_limit() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        for _ in 0..3 {
            store.insert_record(&StoredRecord::transaction("vendorbill", "VendBill"))?;
        }
        store.insert_record(&StoredRecord::transaction("purchaseorder", "PurchOrd"))?;

        let ids = store.query_ids(&RecordQuery::top(
            "transaction",
            Some(StageFilter::new("type", "VendBill")),
            2,
        ))?;
        assert_eq!(ids, vec![1, 2]);

        let page = store.query_ids(&RecordQuery::page("vendorbill", 2, 2))?;
        assert_eq!(page, vec![3]);
        Ok(())
    }

    #[test]
    fn test_unknown_filter_column_is_rejected() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        let err = store
            .query_ids(&RecordQuery::top(
                "transaction",
                Some(StageFilter::new("status", "open")),
                1,
            ))
            .unwrap_err();
        assert!(err.to_string().contains("unknown column"));
        Ok(())
    }

    #[test]
    fn test_delete_maps_missing_and_referenced_records() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        let bill = store.insert_record(&StoredRecord::transaction("vendorbill", "VendBill"))?;
        let payment = store.insert_record(
            &StoredRecord::transaction("vendorpayment", "VendPymt").depending_on(&[bill]),
        )?;

        assert_eq!(store.delete_record("vendorbill", 999), Err(DeleteError::NotFound));
        assert_eq!(
            store.delete_record("purchaseorder", bill),
            Err(DeleteError::NotFound)
        );
        assert!(matches!(
            store.delete_record("vendorbill", bill),
            Err(DeleteError::Other(_))
        ));

        store.delete_record("vendorpayment", payment).unwrap();
        store.delete_record("vendorbill", bill).unwrap();
        assert_eq!(store.count(None)?, 0);
        Ok(())
    }

    #[test]
    fn test_seed_chain_counts() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        let created = store.seed_chain(&procure_to_pay(), 3)?;
        assert_eq!(created, 18);
        assert_eq!(store.count(Some("itemreceipt"))?, 3);
        Ok(())
    }

    #[test]
    fn test_custom_types_exclude_inactive() -> Result<()> {
        let store = SqliteStore::new_in_memory()?;
        store.add_custom_type("customrecord_widget", "Widget", false)?;
        store.add_custom_type("customrecord_legacy", "Legacy", true)?;
        let types = store.active_custom_types()?;
        assert_eq!(types, vec![RecordType::new("customrecord_widget", "Widget")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_preview_and_delete() -> Result<()> {
        let handle = StoreHandle::new(SqliteStore::new_in_memory()?);
        {
            let store = handle.lock_sync()?;
            store.insert_record(&StoredRecord::of_type("customer").with_label("CUST-1", "Acme"))?;
            store.insert_record(&StoredRecord::of_type("customer").with_label("CUST-2", "Globex"))?;
        }

        let rows = handle
            .preview(&PreviewQuery {
                source: "customer".to_string(),
                kind: RecordKind::Entity,
                limit: 1,
            })
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc_id.as_deref(), Some("CUST-2"));

        handle.delete("customer", rows[0].id).await.unwrap();
        assert_eq!(
            handle.delete("customer", rows[0].id).await,
            Err(DeleteError::NotFound)
        );
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use lake_core::{DomainRow, RawDataOrigin};

use super::{table_file, Cursor};
use crate::error::StoreError;

/// A row that can be persisted in a [`TableStore`].
///
/// Every tool-layer and domain-layer row carries its [`RawDataOrigin`] so it
/// can be traced back to the raw record that produced it.
pub trait Record: Clone + Send + Sync + Serialize + 'static {
    fn table_name(&self) -> &'static str;

    /// Upsert key, unique within [`Record::table_name`].
    fn primary_key(&self) -> String;

    fn origin(&self) -> &RawDataOrigin;

    fn origin_mut(&mut self) -> &mut RawDataOrigin;
}

impl Record for DomainRow {
    fn table_name(&self) -> &'static str {
        DomainRow::table_name(self)
    }

    fn primary_key(&self) -> String {
        self.id().to_string()
    }

    fn origin(&self) -> &RawDataOrigin {
        DomainRow::origin(self)
    }

    fn origin_mut(&mut self) -> &mut RawDataOrigin {
        DomainRow::origin_mut(self)
    }
}

/// Keyed row storage with upsert and scope-delete semantics.
#[async_trait]
pub trait TableStore<T: Record>: Send + Sync {
    /// Insert or replace rows by `(table_name, primary_key)`. Returns the
    /// number of rows written.
    async fn upsert(&self, rows: Vec<T>) -> Result<usize, StoreError>;

    /// Delete every row whose origin points at `(raw_table, raw_params)`.
    async fn delete_scope(&self, raw_table: &str, raw_params: &str) -> Result<usize, StoreError>;

    /// Rows matching `filter`, ordered by key.
    async fn cursor_where(
        &self,
        filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> Result<Cursor<T>, StoreError>;

    async fn get(&self, table: &str, key: &str) -> Result<Option<T>, StoreError>;

    /// Rows produced from raw records in `(raw_table, raw_params)`.
    async fn cursor_scope(&self, raw_table: &str, raw_params: &str) -> Result<Cursor<T>, StoreError> {
        self.cursor_where(&|row: &T| row.origin().in_scope(raw_table, raw_params))
            .await
    }

    async fn all(&self) -> Result<Cursor<T>, StoreError> {
        self.cursor_where(&|_: &T| true).await
    }
}

/// In-memory [`TableStore`] keyed by `table/primary_key`.
pub struct MemoryTable<T> {
    rows: RwLock<BTreeMap<(String, String), T>>,
}

impl<T: Record> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every row, ordered by key.
    pub fn snapshot(&self) -> Vec<T> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

impl<T: Record> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> TableStore<T> for MemoryTable<T> {
    async fn upsert(&self, rows: Vec<T>) -> Result<usize, StoreError> {
        let mut map = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let written = rows.len();
        for row in rows {
            map.insert((row.table_name().to_string(), row.primary_key()), row);
        }
        Ok(written)
    }

    async fn delete_scope(&self, raw_table: &str, raw_params: &str) -> Result<usize, StoreError> {
        let mut map = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, row| !row.origin().in_scope(raw_table, raw_params));
        Ok(before - map.len())
    }

    async fn cursor_where(
        &self,
        filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> Result<Cursor<T>, StoreError> {
        let map = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let rows = map.values().filter(|row| filter(row)).cloned().collect();
        Ok(Cursor::new(rows))
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<T>, StoreError> {
        let map = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(&(table.to_string(), key.to_string())).cloned())
    }
}

type RowMap<T> = BTreeMap<(String, String), T>;

/// [`TableStore`] persisted to `{dir}/{name}.jsonl`, one row per line.
///
/// Rows live in memory; every write replaces the file through a temp file
/// and rename, so a crash leaves either the old or the new table on disk.
pub struct JsonlTable<T> {
    name: String,
    path: PathBuf,
    rows: tokio::sync::Mutex<RowMap<T>>,
}

impl<T: Record + DeserializeOwned> JsonlTable<T> {
    /// Open (creating `dir` if needed) and load any rows already on disk.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = table_file(dir, name)?;

        let mut rows = RowMap::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for (i, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let row: T = serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                        table: name.to_string(),
                        line: i + 1,
                        message: e.to_string(),
                    })?;
                    rows.insert((row.table_name().to_string(), row.primary_key()), row);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(table = name, rows = rows.len(), "opened table");
        Ok(Self {
            name: name.to_string(),
            path,
            rows: tokio::sync::Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, rows: &RowMap<T>) -> Result<(), StoreError> {
        let mut buf = String::new();
        for row in rows.values() {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, buf.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(table = %self.name, rows = rows.len(), "persisted table");
        Ok(())
    }
}

#[async_trait]
impl<T: Record + DeserializeOwned> TableStore<T> for JsonlTable<T> {
    async fn upsert(&self, rows: Vec<T>) -> Result<usize, StoreError> {
        let mut map = self.rows.lock().await;
        let mut next = map.clone();
        let written = rows.len();
        for row in rows {
            next.insert((row.table_name().to_string(), row.primary_key()), row);
        }
        self.persist(&next).await?;
        *map = next;
        Ok(written)
    }

    async fn delete_scope(&self, raw_table: &str, raw_params: &str) -> Result<usize, StoreError> {
        let mut map = self.rows.lock().await;
        let mut next = map.clone();
        next.retain(|_, row| !row.origin().in_scope(raw_table, raw_params));
        let removed = map.len() - next.len();
        if removed > 0 {
            self.persist(&next).await?;
            *map = next;
        }
        Ok(removed)
    }

    async fn cursor_where(
        &self,
        filter: &(dyn for<'r> Fn(&'r T) -> bool + Send + Sync),
    ) -> Result<Cursor<T>, StoreError> {
        let map = self.rows.lock().await;
        let rows = map.values().filter(|row| filter(row)).cloned().collect();
        Ok(Cursor::new(rows))
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<T>, StoreError> {
        let map = self.rows.lock().await;
        Ok(map.get(&(table.to_string(), key.to_string())).cloned())
    }
}

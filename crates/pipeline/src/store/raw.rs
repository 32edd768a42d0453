use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use lake_core::{NewRawRecord, RawRecord};

use super::{table_file, Cursor};
use crate::error::StoreError;

/// Append-only store of raw API payloads, grouped by table.
///
/// Ids are unique and increase in insertion order across the whole store.
#[async_trait]
pub trait RawDataStore: Send + Sync {
    /// Append records to `table` in the given order. Returns the assigned ids.
    async fn insert(&self, table: &str, records: Vec<NewRawRecord>) -> Result<Vec<u64>, StoreError>;

    /// Records of `table` whose params equal `params` exactly, in id order.
    async fn cursor(&self, table: &str, params: &str) -> Result<Cursor<RawRecord>, StoreError>;

    /// Delete every record of `table`. Returns the number removed.
    async fn flush(&self, table: &str) -> Result<usize, StoreError>;

    /// Number of records currently in `table`.
    async fn count(&self, table: &str) -> Result<usize, StoreError>;
}

fn stamp(id: u64, record: NewRawRecord, created_at: DateTime<Utc>) -> RawRecord {
    RawRecord {
        id,
        params: record.params,
        data: record.data,
        url: record.url,
        input: record.input,
        created_at,
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryRawState {
    next_id: u64,
    tables: HashMap<String, Vec<RawRecord>>,
}

/// Raw store held entirely in memory. Used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryRawStore {
    state: Mutex<MemoryRawState>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawDataStore for MemoryRawStore {
    async fn insert(&self, table: &str, records: Vec<NewRawRecord>) -> Result<Vec<u64>, StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = Vec::with_capacity(records.len());
        let mut stamped = Vec::with_capacity(records.len());
        for record in records {
            state.next_id += 1;
            ids.push(state.next_id);
            stamped.push(stamp(state.next_id, record, now));
        }
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(stamped);
        Ok(ids)
    }

    async fn cursor(&self, table: &str, params: &str) -> Result<Cursor<RawRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let rows = state
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| r.params == params).cloned().collect())
            .unwrap_or_default();
        Ok(Cursor::new(rows))
    }

    async fn flush(&self, table: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.tables.remove(table).map(|rows| rows.len()).unwrap_or(0))
    }

    async fn count(&self, table: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.tables.get(table).map(Vec::len).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// JSON-lines file store
// ---------------------------------------------------------------------------

/// Payload as written to disk: UTF-8 bodies stay readable, anything else
/// falls back to a byte array.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredPayload {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
struct StoredRaw {
    id: u64,
    params: String,
    data: StoredPayload,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RawRecord> for StoredRaw {
    fn from(r: RawRecord) -> Self {
        let data = match String::from_utf8(r.data) {
            Ok(text) => StoredPayload::Text(text),
            Err(e) => StoredPayload::Bytes(e.into_bytes()),
        };
        Self {
            id: r.id,
            params: r.params,
            data,
            url: r.url,
            input: r.input,
            created_at: r.created_at,
        }
    }
}

impl From<StoredRaw> for RawRecord {
    fn from(s: StoredRaw) -> Self {
        let data = match s.data {
            StoredPayload::Text(text) => text.into_bytes(),
            StoredPayload::Bytes(bytes) => bytes,
        };
        Self {
            id: s.id,
            params: s.params,
            data,
            url: s.url,
            input: s.input,
            created_at: s.created_at,
        }
    }
}

/// Raw store persisting each table to `{dir}/{table}.jsonl`.
///
/// All operations are serialized through one async lock. The id counter is
/// recovered from the highest id found on disk when the store is opened.
pub struct JsonlRawStore {
    dir: PathBuf,
    next_id: tokio::sync::Mutex<u64>,
}

impl JsonlRawStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut max_id = 0;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let table = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let mut content = std::fs::read_to_string(&path)?;
            drop_torn_tail(&path, &mut content)?;
            for row in parse_rows(&table, &content)? {
                max_id = max_id.max(row.id);
            }
        }

        info!(dir = %dir.display(), last_id = max_id, "opened raw data store");
        Ok(Self {
            dir,
            next_id: tokio::sync::Mutex::new(max_id),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, StoreError> {
        table_file(&self.dir, table)
    }

    async fn read_table(&self, table: &str) -> Result<Vec<RawRecord>, StoreError> {
        let path = self.table_path(table)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_rows(table, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Every append ends in a newline, so an unterminated last line is the
/// remainder of an interrupted write. Cut it off the file.
fn drop_torn_tail(path: &Path, content: &mut String) -> Result<(), StoreError> {
    if content.is_empty() || content.ends_with('\n') {
        return Ok(());
    }
    let keep = content.rfind('\n').map(|i| i + 1).unwrap_or(0);
    warn!(
        path = %path.display(),
        dropped_bytes = content.len() - keep,
        "truncating torn raw record"
    );
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_len(keep as u64)?;
    content.truncate(keep);
    Ok(())
}

fn parse_rows(table: &str, content: &str) -> Result<Vec<RawRecord>, StoreError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<StoredRaw>(line)
                .map(RawRecord::from)
                .map_err(|e| StoreError::Corrupt {
                    table: table.to_string(),
                    line: i + 1,
                    message: e.to_string(),
                })
        })
        .collect()
}

async fn append_batch(file: &mut tokio::fs::File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await
}

#[async_trait]
impl RawDataStore for JsonlRawStore {
    async fn insert(&self, table: &str, records: Vec<NewRawRecord>) -> Result<Vec<u64>, StoreError> {
        let path = self.table_path(table)?;
        let mut next_id = self.next_id.lock().await;
        let now = Utc::now();

        let mut ids = Vec::with_capacity(records.len());
        let mut buf = String::new();
        let mut id = *next_id;
        for record in records {
            id += 1;
            ids.push(id);
            buf.push_str(&serde_json::to_string(&StoredRaw::from(stamp(id, record, now)))?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let len_before = file.metadata().await?.len();
        if let Err(e) = append_batch(&mut file, buf.as_bytes()).await {
            warn!(table, error = %e, "raw append failed, rolling back");
            file.set_len(len_before).await?;
            return Err(e.into());
        }

        // Only advance once the batch is on disk.
        *next_id = id;
        debug!(table, count = ids.len(), "appended raw records");
        Ok(ids)
    }

    async fn cursor(&self, table: &str, params: &str) -> Result<Cursor<RawRecord>, StoreError> {
        let _guard = self.next_id.lock().await;
        let rows = self
            .read_table(table)
            .await?
            .into_iter()
            .filter(|r| r.params == params)
            .collect();
        Ok(Cursor::new(rows))
    }

    async fn flush(&self, table: &str) -> Result<usize, StoreError> {
        let _guard = self.next_id.lock().await;
        let removed = self.read_table(table).await?.len();
        match tokio::fs::remove_file(self.table_path(table)?).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(table, removed, "flushed raw table");
        Ok(removed)
    }

    async fn count(&self, table: &str) -> Result<usize, StoreError> {
        let _guard = self.next_id.lock().await;
        Ok(self.read_table(table).await?.len())
    }
}

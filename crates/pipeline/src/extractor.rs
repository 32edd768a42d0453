//! Raw → tool-layer extraction.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lake_core::{encode_params, RawDataOrigin, RawRecord};

use crate::error::{BoxError, PipelineError, Stage};
use crate::store::{RawDataStore, Record, TableStore};

/// Maps one raw record to zero or more tool-layer rows.
pub type ExtractFn<T> = Arc<dyn Fn(&RawRecord) -> Result<Vec<T>, BoxError> + Send + Sync>;

/// Identifies the raw scope a subtask reads from: one raw table plus the
/// canonical JSON of the params that selected the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataSubTaskArgs {
    pub table: String,
    pub params: String,
}

impl RawDataSubTaskArgs {
    pub fn new<P: Serialize>(table: impl Into<String>, params: &P) -> Result<Self, PipelineError> {
        Ok(Self {
            table: table.into(),
            params: encode_params(params)?,
        })
    }

    pub(crate) fn mapping_error(&self, stage: Stage, record: impl ToString, source: BoxError) -> PipelineError {
        PipelineError::Mapping {
            stage,
            table: self.table.clone(),
            params: self.params.clone(),
            record: record.to_string(),
            source,
        }
    }
}

/// Counts reported by one extract, convert or collect pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Records read from the input side.
    pub records_in: usize,
    /// Rows written to the output side.
    pub rows_out: usize,
    /// Rows removed before writing.
    pub rows_deleted: usize,
}

impl std::ops::AddAssign for StageStats {
    fn add_assign(&mut self, rhs: Self) {
        self.records_in += rhs.records_in;
        self.rows_out += rhs.rows_out;
        self.rows_deleted += rhs.rows_deleted;
    }
}

/// Replays every raw record of a scope through a mapping function and
/// upserts the result.
///
/// Rows previously extracted from the same scope are deleted first, so
/// re-running an extraction never leaves stale rows behind. Each emitted row
/// is stamped with the origin of the record it came from. A mapping failure
/// stops the pass; rows from earlier records stay committed.
pub struct DataExtractor<T: Record> {
    args: RawDataSubTaskArgs,
    raw: Arc<dyn RawDataStore>,
    output: Arc<dyn TableStore<T>>,
    extract: ExtractFn<T>,
    cancel: Option<CancellationToken>,
}

impl<T: Record> DataExtractor<T> {
    pub fn new(
        args: RawDataSubTaskArgs,
        raw: Arc<dyn RawDataStore>,
        output: Arc<dyn TableStore<T>>,
        extract: ExtractFn<T>,
    ) -> Self {
        Self {
            args,
            raw,
            output,
            extract,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn args(&self) -> &RawDataSubTaskArgs {
        &self.args
    }

    pub async fn execute(&self) -> Result<StageStats, PipelineError> {
        let start = Instant::now();
        let mut stats = StageStats {
            rows_deleted: self
                .output
                .delete_scope(&self.args.table, &self.args.params)
                .await?,
            ..Default::default()
        };

        let cursor = self.raw.cursor(&self.args.table, &self.args.params).await?;
        for record in cursor {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(PipelineError::Cancelled);
            }

            let mut rows = (self.extract)(&record)
                .map_err(|e| self.args.mapping_error(Stage::Extract, record.id, e))?;
            let origin = RawDataOrigin::from_raw(&self.args.table, &record);
            for row in &mut rows {
                *row.origin_mut() = origin.clone();
            }

            stats.records_in += 1;
            stats.rows_out += self.output.upsert(rows).await?;
        }

        info!(
            table = %self.args.table,
            records = stats.records_in,
            rows = stats.rows_out,
            deleted = stats.rows_deleted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRawStore, MemoryTable};
    use lake_core::NewRawRecord;
    use serde_json::Value;

    #[derive(Debug, Clone, Serialize)]
    struct Item {
        id: u64,
        origin: RawDataOrigin,
    }

    impl Record for Item {
        fn table_name(&self) -> &'static str {
            "items"
        }
        fn primary_key(&self) -> String {
            self.id.to_string()
        }
        fn origin(&self) -> &RawDataOrigin {
            &self.origin
        }
        fn origin_mut(&mut self) -> &mut RawDataOrigin {
            &mut self.origin
        }
    }

    fn item_extract() -> ExtractFn<Item> {
        Arc::new(|record: &RawRecord| -> Result<Vec<Item>, BoxError> {
            let body: Value = record.decode()?;
            let id = body["id"].as_u64().ok_or("missing id")?;
            Ok(vec![Item {
                id,
                origin: RawDataOrigin::default(),
            }])
        })
    }

    async fn seeded(bodies: &[&str]) -> (Arc<MemoryRawStore>, RawDataSubTaskArgs) {
        let raw = Arc::new(MemoryRawStore::new());
        let args = RawDataSubTaskArgs::new("_raw_items", &serde_json::json!({"repo": "a"})).unwrap();
        let records = bodies
            .iter()
            .map(|b| NewRawRecord::new(args.params.clone(), b.as_bytes().to_vec()))
            .collect();
        raw.insert(&args.table, records).await.unwrap();
        (raw, args)
    }

    #[tokio::test]
    async fn stamps_origin_on_every_row() {
        let (raw, args) = seeded(&[r#"{"id":1}"#, r#"{"id":2}"#]).await;
        let out = Arc::new(MemoryTable::<Item>::new());
        let stats = DataExtractor::new(args.clone(), raw, out.clone(), item_extract())
            .execute()
            .await
            .unwrap();
        assert_eq!(stats.records_in, 2);
        assert_eq!(stats.rows_out, 2);

        for (i, row) in out.snapshot().iter().enumerate() {
            assert_eq!(row.origin.raw_data_table, "_raw_items");
            assert_eq!(row.origin.raw_data_params, args.params);
            assert_eq!(row.origin.raw_data_id, i as u64 + 1);
        }
    }

    #[tokio::test]
    async fn rerun_replaces_previous_rows() {
        let (raw, args) = seeded(&[r#"{"id":1}"#]).await;
        let out = Arc::new(MemoryTable::<Item>::new());
        let extractor = DataExtractor::new(args, raw, out.clone(), item_extract());
        extractor.execute().await.unwrap();
        let second = extractor.execute().await.unwrap();
        assert_eq!(second.rows_deleted, 1);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn mapping_error_names_record_and_keeps_earlier_rows() {
        let (raw, args) = seeded(&[r#"{"id":1}"#, r#"{"name":"no id"}"#, r#"{"id":3}"#]).await;
        let out = Arc::new(MemoryTable::<Item>::new());
        let err = DataExtractor::new(args, raw, out.clone(), item_extract())
            .execute()
            .await
            .unwrap_err();
        match err {
            PipelineError::Mapping { stage, table, record, .. } => {
                assert_eq!(stage, Stage::Extract);
                assert_eq!(table, "_raw_items");
                assert_eq!(record, "2");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_extraction_stops() {
        let (raw, args) = seeded(&[r#"{"id":1}"#]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = DataExtractor::new(args, raw, Arc::new(MemoryTable::<Item>::new()), item_extract())
            .with_cancellation(cancel)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}

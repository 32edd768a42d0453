//! Tool-layer → domain-layer conversion.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{BoxError, PipelineError, Stage};
use crate::extractor::{RawDataSubTaskArgs, StageStats};
use crate::store::{Cursor, Record, TableStore};

/// Maps one tool-layer row to zero or more domain-layer rows.
pub type ConvertFn<I, O> = Arc<dyn Fn(&I) -> Result<Vec<O>, BoxError> + Send + Sync>;

/// Runs tool-layer rows through a mapping function and upserts the domain
/// rows by id.
///
/// Output rows inherit the origin of the input row. Because ids are derived
/// deterministically, converting the same input twice leaves one row per id.
pub struct DataConverter<I: Record, O: Record> {
    args: RawDataSubTaskArgs,
    output: Arc<dyn TableStore<O>>,
    convert: ConvertFn<I, O>,
    cancel: Option<CancellationToken>,
}

impl<I: Record, O: Record> DataConverter<I, O> {
    pub fn new(
        args: RawDataSubTaskArgs,
        output: Arc<dyn TableStore<O>>,
        convert: ConvertFn<I, O>,
    ) -> Self {
        Self {
            args,
            output,
            convert,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub async fn execute(&self, input: Cursor<I>) -> Result<StageStats, PipelineError> {
        let start = Instant::now();
        let mut stats = StageStats::default();

        for row in input {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(PipelineError::Cancelled);
            }

            let mut converted = (self.convert)(&row)
                .map_err(|e| self.args.mapping_error(Stage::Convert, row.primary_key(), e))?;
            for out in &mut converted {
                *out.origin_mut() = row.origin().clone();
            }

            stats.records_in += 1;
            stats.rows_out += self.output.upsert(converted).await?;
        }

        info!(
            table = %self.args.table,
            records = stats.records_in,
            rows = stats.rows_out,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "conversion complete"
        );
        Ok(stats)
    }
}

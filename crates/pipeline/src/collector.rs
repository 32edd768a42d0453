//! HTTP → raw store collection.
//!
//! [`RawPageHandler`] turns each fetched page into raw records, one per item
//! in the response, keeping the item bytes exactly as the API sent them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, info};

use lake_collector::{ApiClient, ApiResponse, CollectorError, PageHandler, WorkerScheduler};
use lake_core::NewRawRecord;

use crate::error::{BoxError, PipelineError};
use crate::extractor::{RawDataSubTaskArgs, StageStats};
use crate::store::RawDataStore;

/// Splits one response body into the raw payloads to store.
pub type ResponseParser = Arc<dyn Fn(&ApiResponse) -> Result<Vec<Vec<u8>>, BoxError> + Send + Sync>;

/// Parser for JSON array responses.
///
/// With `field` set, the array is read from that top-level key
/// (`{"total_count": 3, "jobs": [...]}`). Without it the body itself must be
/// an array. Each item is stored byte-for-byte as it appeared in the body.
pub fn json_items(field: Option<&str>) -> ResponseParser {
    let field = field.map(str::to_string);
    Arc::new(move |response: &ApiResponse| -> Result<Vec<Vec<u8>>, BoxError> {
        let items: Vec<Box<RawValue>> = match &field {
            Some(name) => {
                let object: HashMap<String, Box<RawValue>> = serde_json::from_slice(&response.body)?;
                match object.get(name) {
                    Some(array) => serde_json::from_str(array.get())?,
                    None => return Err(format!("response from {} has no {name:?} field", response.url).into()),
                }
            }
            None => serde_json::from_slice(&response.body)?,
        };
        Ok(items
            .into_iter()
            .map(|item| item.get().as_bytes().to_vec())
            .collect())
    })
}

/// Parser that stores the whole body as a single record.
pub fn whole_body() -> ResponseParser {
    Arc::new(|response: &ApiResponse| -> Result<Vec<Vec<u8>>, BoxError> {
        Ok(vec![response.body.to_vec()])
    })
}

/// Page handler writing parsed items into one raw table.
pub struct RawPageHandler {
    store: Arc<dyn RawDataStore>,
    args: RawDataSubTaskArgs,
    input: Option<String>,
    parse: ResponseParser,
    pages: AtomicUsize,
    requests: AtomicUsize,
    records: AtomicUsize,
}

impl RawPageHandler {
    pub fn new(store: Arc<dyn RawDataStore>, args: RawDataSubTaskArgs, parse: ResponseParser) -> Self {
        Self {
            store,
            args,
            input: None,
            parse,
            pages: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
        }
    }

    /// Attach the JSON input that produced these requests (e.g. a parent id).
    pub fn with_input(mut self, input: Option<String>) -> Self {
        self.input = input;
        self
    }

    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    /// HTTP requests behind the handled pages, retries included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> usize {
        self.records.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PageHandler for RawPageHandler {
    async fn handle(&self, response: ApiResponse) -> Result<(), CollectorError> {
        let items = (self.parse)(&response).map_err(CollectorError::Handler)?;
        let records: Vec<NewRawRecord> = items
            .into_iter()
            .map(|data| {
                let record = NewRawRecord::new(self.args.params.clone(), data).with_url(response.url.clone());
                match &self.input {
                    Some(input) => record.with_input(input.clone()),
                    None => record,
                }
            })
            .collect();

        let count = records.len();
        if count > 0 {
            self.store
                .insert(&self.args.table, records)
                .await
                .map_err(CollectorError::handler)?;
        }
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.requests
            .fetch_add(response.attempts as usize, Ordering::Relaxed);
        self.records.fetch_add(count, Ordering::Relaxed);
        debug!(table = %self.args.table, page = ?response.page, count, "stored raw page");
        Ok(())
    }
}

/// Totals for one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    /// HTTP requests sent, retries included.
    pub requests: usize,
    pub pages: usize,
    pub records: usize,
}

impl std::ops::AddAssign for CollectStats {
    fn add_assign(&mut self, rhs: Self) {
        self.requests += rhs.requests;
        self.pages += rhs.pages;
        self.records += rhs.records;
    }
}

impl From<CollectStats> for StageStats {
    fn from(c: CollectStats) -> Self {
        StageStats {
            records_in: c.pages,
            rows_out: c.records,
            rows_deleted: 0,
        }
    }
}

/// Collects one API resource into one raw table scope.
pub struct ApiCollector {
    client: ApiClient,
    store: Arc<dyn RawDataStore>,
    args: RawDataSubTaskArgs,
    page_size: u32,
    parse: ResponseParser,
}

impl ApiCollector {
    pub fn new(
        client: ApiClient,
        store: Arc<dyn RawDataStore>,
        args: RawDataSubTaskArgs,
        page_size: u32,
        parse: ResponseParser,
    ) -> Self {
        Self {
            client,
            store,
            args,
            page_size,
            parse,
        }
    }

    pub fn args(&self) -> &RawDataSubTaskArgs {
        &self.args
    }

    /// Drop every raw record of the table before a fresh collection.
    pub async fn flush(&self) -> Result<usize, PipelineError> {
        let removed = self.store.flush(&self.args.table).await?;
        info!(table = %self.args.table, removed, "flushed raw table before collection");
        Ok(removed)
    }

    fn handler(&self, input: Option<String>) -> Arc<RawPageHandler> {
        Arc::new(
            RawPageHandler::new(Arc::clone(&self.store), self.args.clone(), Arc::clone(&self.parse))
                .with_input(input),
        )
    }

    /// Fetch every page of `path` through `scheduler`.
    pub async fn collect_pages(
        &self,
        scheduler: &WorkerScheduler,
        path: &str,
        query: &[(String, String)],
        input: Option<String>,
    ) -> Result<CollectStats, PipelineError> {
        let start = Instant::now();
        let handler = self.handler(input);
        self.client
            .fetch_pages(path, query, self.page_size, scheduler, handler.clone())
            .await
            .map_err(|e| PipelineError::collect(&self.args.table, e))?;

        let stats = CollectStats {
            requests: handler.requests(),
            pages: handler.pages(),
            records: handler.records(),
        };
        debug!(
            table = %self.args.table,
            path,
            pages = stats.pages,
            records = stats.records,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "collected paged resource"
        );
        Ok(stats)
    }

    /// Fetch a single, unpaged resource.
    pub async fn collect_one(
        &self,
        path: &str,
        query: &[(String, String)],
        input: Option<String>,
    ) -> Result<CollectStats, PipelineError> {
        let handler = self.handler(input);
        let response = self
            .client
            .get(path, query)
            .await
            .map_err(|e| PipelineError::collect(&self.args.table, e))?;
        handler
            .handle(response)
            .await
            .map_err(|e| PipelineError::collect(&self.args.table, e))?;
        Ok(CollectStats {
            requests: handler.requests(),
            pages: handler.pages(),
            records: handler.records(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRawStore;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    fn response(body: &str) -> ApiResponse {
        ApiResponse {
            page: Some(1),
            url: "https://api.example.com/items?page=1".into(),
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
            attempts: 1,
        }
    }

    #[test]
    fn json_items_keeps_item_bytes() {
        let parse = json_items(Some("jobs"));
        let items = parse(&response(r#"{"total_count":2,"jobs":[{"id":1, "b": 2},{"id":3}]}"#)).unwrap();
        assert_eq!(items, vec![br#"{"id":1, "b": 2}"#.to_vec(), br#"{"id":3}"#.to_vec()]);

        let bare = json_items(None);
        assert_eq!(bare(&response("[1,2,3]")).unwrap().len(), 3);
    }

    #[test]
    fn json_items_errors_on_missing_field() {
        let parse = json_items(Some("jobs"));
        assert!(parse(&response(r#"{"workflow_runs":[]}"#)).is_err());
        assert!(parse(&response("not json")).is_err());
    }

    #[tokio::test]
    async fn handler_writes_one_record_per_item_in_order() {
        let store = Arc::new(MemoryRawStore::new());
        let args = RawDataSubTaskArgs {
            table: "_raw_jobs".into(),
            params: r#"{"repo":"a"}"#.into(),
        };
        let handler = RawPageHandler::new(store.clone(), args.clone(), json_items(Some("jobs")))
            .with_input(Some(r#"{"run_id":9}"#.into()));
        handler
            .handle(response(r#"{"jobs":[{"id":1},{"id":2},{"id":3}]}"#))
            .await
            .unwrap();

        let rows: Vec<_> = store.cursor(&args.table, &args.params).await.unwrap().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].data, br#"{"id":1}"#.to_vec());
        assert_eq!(rows[2].data, br#"{"id":3}"#.to_vec());
        assert!(rows.iter().all(|r| r.input.as_deref() == Some(r#"{"run_id":9}"#)));
        assert!(rows.iter().all(|r| r.url.ends_with("page=1")));
        assert_eq!(handler.pages(), 1);
        assert_eq!(handler.records(), 3);
        assert_eq!(handler.requests(), 1);
    }

    #[tokio::test]
    async fn handler_counts_retried_requests() {
        let store = Arc::new(MemoryRawStore::new());
        let args = RawDataSubTaskArgs {
            table: "_raw_runs".into(),
            params: "p".into(),
        };
        let handler = RawPageHandler::new(store, args, json_items(None));
        let mut retried = response("[1]");
        retried.attempts = 3;
        handler.handle(retried).await.unwrap();
        handler.handle(response("[2]")).await.unwrap();

        assert_eq!(handler.pages(), 2);
        assert_eq!(handler.requests(), 4);
        let stats = CollectStats {
            requests: handler.requests(),
            pages: handler.pages(),
            records: handler.records(),
        };
        assert_eq!(StageStats::from(stats).records_in, 2);
    }
}

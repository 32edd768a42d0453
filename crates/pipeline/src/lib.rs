//! Generic collection → extraction → conversion substrate shared by every
//! source plugin.
//!
//! Plugins supply a raw table name, an extract mapping and a convert mapping;
//! this crate supplies the stores, cursors, id stamping and the runner.

pub mod collector;
pub mod converter;
pub mod error;
pub mod extractor;
pub mod plugin;
pub mod rules;
pub mod store;

pub use collector::{json_items, whole_body, ApiCollector, CollectStats, RawPageHandler, ResponseParser};
pub use converter::{ConvertFn, DataConverter};
pub use error::{BoxError, PipelineError, Stage, StoreError};
pub use extractor::{DataExtractor, ExtractFn, RawDataSubTaskArgs, StageStats};
pub use plugin::{
    Plugin, PipelineRunner, RunReport, SubTask, SubTaskMeta, SubTaskReport, TaskContext,
    DOMAIN_TYPE_CICD, DOMAIN_TYPE_TICKET,
};
pub use rules::{classify_result, duration_secs, normalize_status, DeploymentMatcher, ResultRules};
pub use store::{
    Cursor, JsonlRawStore, JsonlTable, MemoryRawStore, MemoryTable, RawDataStore, Record,
    TableStore,
};

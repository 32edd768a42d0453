use std::fmt;

use thiserror::Error;

use lake_collector::CollectorError;
use lake_core::LakeError;

/// Error type returned by plugin mapping functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt row in {table} at line {line}: {message}")]
    Corrupt {
        table: String,
        line: usize,
        message: String,
    },

    #[error("invalid table name: {0}")]
    InvalidTable(String),
}

/// Pipeline stage a mapping error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collect,
    Extract,
    Convert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Collect => write!(f, "collect"),
            Stage::Extract => write!(f, "extract"),
            Stage::Convert => write!(f, "convert"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collection into {table} failed: {source}")]
    Collect {
        table: String,
        #[source]
        source: CollectorError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{stage} failed on {table} record {record} (params {params}): {source}")]
    Mapping {
        stage: Stage,
        table: String,
        params: String,
        record: String,
        #[source]
        source: BoxError,
    },

    #[error("core error: {0}")]
    Core(#[from] LakeError),

    #[error("invalid option: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("subtask {plugin}/{subtask} failed: {source}")]
    SubTask {
        plugin: String,
        subtask: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn collect(table: &str, source: CollectorError) -> Self {
        match source {
            CollectorError::Cancelled => PipelineError::Cancelled,
            source => PipelineError::Collect {
                table: table.to_string(),
                source,
            },
        }
    }
}

//! Collector error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("HTTP request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("API error {status} for {url}: {body}")]
    Api { status: u16, url: String, body: String },

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed pagination metadata: {0}")]
    Paging(String),

    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("page handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("job failed: {0}")]
    Job(String),

    #[error("scheduler aborted after an earlier failure: {0}")]
    Aborted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl CollectorError {
    /// Wrap any handler-side error (store, decode, ...).
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CollectorError::Handler(Box::new(err))
    }
}

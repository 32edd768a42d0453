//! GitHub subtasks and the task data they share.

mod jobs;
mod repo;
mod runs;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use lake_collector::{ApiClient, ApiClientConfig, CollectorError, WorkerScheduler};
use lake_core::config::{CollectorConfig, GithubConfig};
use lake_core::DomainRow;
use lake_pipeline::{
    DeploymentMatcher, JsonlTable, MemoryTable, PipelineError, RawDataSubTaskArgs, TableStore,
};

use crate::models::{GithubJob, GithubRepo, GithubRun, JOB_TABLE, REPO_TABLE, RUN_TABLE};

/// File name of the persisted domain table under the tables directory.
pub const DOMAIN_TABLE: &str = "domain";

pub use jobs::{CollectJobs, ConvertJobs, ExtractJobs, RAW_JOB_TABLE};
pub use repo::{ConvertRepo, RAW_REPO_TABLE};
pub use runs::{CollectRuns, ConvertRuns, ExtractRuns, RAW_RUN_TABLE};

/// Params identifying one collection scope. Serialized into every raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GithubApiParams {
    pub connection_id: u64,
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone)]
pub struct GithubOptions {
    pub connection_id: u64,
    pub owner: String,
    pub repo: String,
    pub concurrency: usize,
    pub page_size: u32,
    pub deployment_pattern: Option<String>,
}

impl GithubOptions {
    pub fn params(&self) -> GithubApiParams {
        GithubApiParams {
            connection_id: self.connection_id,
            owner: self.owner.clone(),
            repo: self.repo.clone(),
        }
    }

    /// `repos/{owner}/{repo}`, relative to the API endpoint.
    pub fn repo_path(&self) -> String {
        format!("repos/{}/{}", self.owner, self.repo)
    }
}

/// Shared state for one run of the GitHub plugin.
pub struct GithubTaskData {
    pub options: GithubOptions,
    pub client: ApiClient,
    pub deployment: DeploymentMatcher,
    pub runs: Arc<dyn TableStore<GithubRun>>,
    pub jobs: Arc<dyn TableStore<GithubJob>>,
    pub repos: Arc<dyn TableStore<GithubRepo>>,
    pub domain: Arc<dyn TableStore<DomainRow>>,
}

impl GithubTaskData {
    /// Task data backed by in-memory tool and domain tables.
    pub fn new(options: GithubOptions, client: ApiClient) -> Result<Self, PipelineError> {
        let deployment = DeploymentMatcher::new(options.deployment_pattern.as_deref())?;
        Ok(Self {
            options,
            client,
            deployment,
            runs: Arc::new(MemoryTable::<GithubRun>::new()),
            jobs: Arc::new(MemoryTable::<GithubJob>::new()),
            repos: Arc::new(MemoryTable::<GithubRepo>::new()),
            domain: Arc::new(MemoryTable::<DomainRow>::new()),
        })
    }

    /// Task data whose tool and domain tables persist under `dir`, so a
    /// later run can resume from any subtask.
    pub fn open(
        options: GithubOptions,
        client: ApiClient,
        dir: impl AsRef<Path>,
    ) -> Result<Self, PipelineError> {
        let dir = dir.as_ref();
        let deployment = DeploymentMatcher::new(options.deployment_pattern.as_deref())?;
        Ok(Self {
            options,
            client,
            deployment,
            runs: Arc::new(JsonlTable::<GithubRun>::open(dir, RUN_TABLE)?),
            jobs: Arc::new(JsonlTable::<GithubJob>::open(dir, JOB_TABLE)?),
            repos: Arc::new(JsonlTable::<GithubRepo>::open(dir, REPO_TABLE)?),
            domain: Arc::new(JsonlTable::<DomainRow>::open(dir, DOMAIN_TABLE)?),
        })
    }

    /// Raw scope of `table` for this repository.
    pub fn raw_args(&self, table: &str) -> Result<RawDataSubTaskArgs, PipelineError> {
        RawDataSubTaskArgs::new(table, &self.options.params())
    }

    pub(crate) fn scheduler(&self, cancel: &CancellationToken) -> WorkerScheduler {
        WorkerScheduler::with_cancellation(self.options.concurrency, cancel)
    }
}

/// API client for GitHub: bearer auth over the configured token pool.
pub fn new_api_client(
    github: &GithubConfig,
    collector: &CollectorConfig,
    cancel: Option<CancellationToken>,
) -> Result<ApiClient, CollectorError> {
    let config = ApiClientConfig::from_collector(&github.endpoint, github.tokens.clone(), collector)
        .with_auth_prefix("Bearer ")
        .with_header("Accept", "application/vnd.github+json");
    ApiClient::new(config, cancel)
}

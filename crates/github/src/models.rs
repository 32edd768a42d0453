//! Tool-layer rows, shaped like the GitHub REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lake_core::{IdTag, RawDataOrigin};
use lake_pipeline::Record;

pub const RUN_TABLE: &str = "_tool_github_runs";
pub const JOB_TABLE: &str = "_tool_github_jobs";
pub const REPO_TABLE: &str = "_tool_github_repos";

/// A workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubRun {
    pub connection_id: u64,
    pub id: u64,
    pub repo_id: u64,
    pub name: String,
    pub head_branch: String,
    pub head_sha: String,
    pub event: String,
    pub status: String,
    pub conclusion: String,
    pub run_number: u64,
    pub html_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

/// A job inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubJob {
    pub connection_id: u64,
    pub id: u64,
    pub run_id: u64,
    pub repo_id: u64,
    pub name: String,
    pub head_sha: String,
    pub status: String,
    pub conclusion: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub html_url: String,
    pub runner_name: String,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

/// The repository being collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubRepo {
    pub connection_id: u64,
    pub github_id: u64,
    pub name: String,
    pub description: String,
    pub html_url: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

impl IdTag for GithubRun {
    const ID_TAG: &'static str = "github:GithubRun";
}

impl IdTag for GithubJob {
    const ID_TAG: &'static str = "github:GithubJob";
}

impl IdTag for GithubRepo {
    const ID_TAG: &'static str = "github:GithubRepo";
}

impl Record for GithubRun {
    fn table_name(&self) -> &'static str {
        RUN_TABLE
    }

    fn primary_key(&self) -> String {
        format!("{}:{}", self.connection_id, self.id)
    }

    fn origin(&self) -> &RawDataOrigin {
        &self.origin
    }

    fn origin_mut(&mut self) -> &mut RawDataOrigin {
        &mut self.origin
    }
}

impl Record for GithubJob {
    fn table_name(&self) -> &'static str {
        JOB_TABLE
    }

    fn primary_key(&self) -> String {
        format!("{}:{}", self.connection_id, self.id)
    }

    fn origin(&self) -> &RawDataOrigin {
        &self.origin
    }

    fn origin_mut(&mut self) -> &mut RawDataOrigin {
        &mut self.origin
    }
}

impl Record for GithubRepo {
    fn table_name(&self) -> &'static str {
        REPO_TABLE
    }

    fn primary_key(&self) -> String {
        format!("{}:{}", self.connection_id, self.github_id)
    }

    fn origin(&self) -> &RawDataOrigin {
        &self.origin
    }

    fn origin_mut(&mut self) -> &mut RawDataOrigin {
        &mut self.origin
    }
}

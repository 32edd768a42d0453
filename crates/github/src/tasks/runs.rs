use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use lake_core::{CicdPipeline, CicdStatus, DomainIdGenerator, DomainRow, RawDataOrigin, RawRecord};
use lake_pipeline::{
    classify_result, duration_secs, json_items, normalize_status, ApiCollector, BoxError,
    ConvertFn, DataConverter, DataExtractor, ExtractFn, PipelineError, StageStats, SubTask,
    TaskContext,
};

use super::GithubTaskData;
use crate::models::{GithubRepo, GithubRun};

pub const RAW_RUN_TABLE: &str = "_raw_github_api_runs";

/// Fields read from one element of `workflow_runs`.
#[derive(Debug, Deserialize)]
struct ApiRun {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    head_sha: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    run_number: u64,
    #[serde(default)]
    html_url: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    run_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    repository: Option<ApiRepoRef>,
}

#[derive(Debug, Deserialize)]
struct ApiRepoRef {
    id: u64,
}

/// `GET repos/{owner}/{repo}/actions/runs`, one raw record per run.
pub struct CollectRuns;

#[async_trait]
impl SubTask<GithubTaskData> for CollectRuns {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let collector = ApiCollector::new(
            data.client.clone(),
            Arc::clone(&ctx.raw),
            data.raw_args(RAW_RUN_TABLE)?,
            data.options.page_size,
            json_items(Some("workflow_runs")),
        );
        collector.flush().await?;

        let scheduler = data.scheduler(&ctx.cancel);
        let path = format!("{}/actions/runs", data.options.repo_path());
        let stats = collector.collect_pages(&scheduler, &path, &[], None).await?;
        Ok(stats.into())
    }
}

pub struct ExtractRuns;

#[async_trait]
impl SubTask<GithubTaskData> for ExtractRuns {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let connection_id = data.options.connection_id;
        let extract: ExtractFn<GithubRun> =
            Arc::new(move |record: &RawRecord| -> Result<Vec<GithubRun>, BoxError> {
                let run: ApiRun = record.decode()?;
                Ok(vec![GithubRun {
                    connection_id,
                    id: run.id,
                    repo_id: run.repository.map(|r| r.id).unwrap_or_default(),
                    name: run.name.unwrap_or_default(),
                    head_branch: run.head_branch.unwrap_or_default(),
                    head_sha: run.head_sha,
                    event: run.event,
                    status: run.status.unwrap_or_default(),
                    conclusion: run.conclusion.unwrap_or_default(),
                    run_number: run.run_number,
                    html_url: run.html_url,
                    created_at: run.created_at,
                    updated_at: run.updated_at,
                    run_started_at: run.run_started_at,
                    origin: RawDataOrigin::default(),
                }])
            });

        DataExtractor::new(
            data.raw_args(RAW_RUN_TABLE)?,
            Arc::clone(&ctx.raw),
            Arc::clone(&data.runs),
            extract,
        )
        .with_cancellation(ctx.cancel.clone())
        .execute()
        .await
    }
}

/// `GithubRun` → `cicd_pipelines`.
pub struct ConvertRuns;

#[async_trait]
impl SubTask<GithubTaskData> for ConvertRuns {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let args = data.raw_args(RAW_RUN_TABLE)?;
        let run_ids = DomainIdGenerator::for_entity::<GithubRun>();
        let repo_ids = DomainIdGenerator::for_entity::<GithubRepo>();
        let deployment = data.deployment.clone();

        let convert: ConvertFn<GithubRun, DomainRow> =
            Arc::new(move |run: &GithubRun| -> Result<Vec<DomainRow>, BoxError> {
                let status = normalize_status(&run.status, &["completed"]);
                let started = run.run_started_at.or(run.created_at);
                Ok(vec![DomainRow::from(CicdPipeline {
                    id: run_ids.generate(run.connection_id, &[&run.repo_id, &run.id]),
                    name: run.name.clone(),
                    status,
                    result: classify_result(&run.conclusion),
                    kind: deployment.task_type(&run.name),
                    duration_sec: duration_secs(status, started, run.updated_at),
                    created_date: run.created_at,
                    finished_date: run.updated_at.filter(|_| status == CicdStatus::Done),
                    cicd_scope_id: repo_ids.generate(run.connection_id, &[&run.repo_id]),
                    origin: RawDataOrigin::default(),
                })])
            });

        let input = data.runs.cursor_scope(&args.table, &args.params).await?;
        DataConverter::new(args, Arc::clone(&data.domain), convert)
            .with_cancellation(ctx.cancel.clone())
            .execute(input)
            .await
    }
}

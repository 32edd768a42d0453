use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use lake_core::{CicdTask, DomainIdGenerator, DomainRow, RawDataOrigin, RawRecord};
use lake_pipeline::{
    classify_result, duration_secs, json_items, normalize_status, ApiCollector, BoxError,
    CollectStats, ConvertFn, DataConverter, DataExtractor, DeploymentMatcher, ExtractFn,
    PipelineError, StageStats, SubTask, TaskContext,
};

use super::runs::RAW_RUN_TABLE;
use super::GithubTaskData;
use crate::models::{GithubJob, GithubRepo, GithubRun};

pub const RAW_JOB_TABLE: &str = "_raw_github_api_jobs";

/// Parent run a page of jobs was fetched for, stored as the raw record input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct JobInput {
    run_id: u64,
    repo_id: u64,
}

#[derive(Debug, Deserialize)]
struct ApiJob {
    id: u64,
    run_id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    head_sha: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    runner_name: Option<String>,
}

/// `GET repos/{owner}/{repo}/actions/runs/{run_id}/jobs` for every
/// extracted run.
pub struct CollectJobs;

#[async_trait]
impl SubTask<GithubTaskData> for CollectJobs {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let run_args = data.raw_args(RAW_RUN_TABLE)?;
        let collector = ApiCollector::new(
            data.client.clone(),
            Arc::clone(&ctx.raw),
            data.raw_args(RAW_JOB_TABLE)?,
            data.options.page_size,
            json_items(Some("jobs")),
        );
        collector.flush().await?;

        let scheduler = data.scheduler(&ctx.cancel);
        let mut total = CollectStats::default();
        for run in data.runs.cursor_scope(&run_args.table, &run_args.params).await? {
            ctx.ensure_active()?;
            let input = serde_json::to_string(&JobInput {
                run_id: run.id,
                repo_id: run.repo_id,
            })
            .map_err(lake_core::LakeError::from)?;
            let path = format!("{}/actions/runs/{}/jobs", data.options.repo_path(), run.id);
            let stats = collector
                .collect_pages(&scheduler, &path, &[], Some(input))
                .await?;
            debug!(run_id = run.id, jobs = stats.records, "collected jobs for run");
            total += stats;
        }
        Ok(total.into())
    }
}

pub struct ExtractJobs;

#[async_trait]
impl SubTask<GithubTaskData> for ExtractJobs {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let connection_id = data.options.connection_id;
        let extract: ExtractFn<GithubJob> =
            Arc::new(move |record: &RawRecord| -> Result<Vec<GithubJob>, BoxError> {
                let job: ApiJob = record.decode()?;
                let input: JobInput = record
                    .decode_input()?
                    .ok_or("job record has no parent run input")?;
                Ok(vec![GithubJob {
                    connection_id,
                    id: job.id,
                    run_id: job.run_id,
                    repo_id: input.repo_id,
                    name: job.name,
                    head_sha: job.head_sha,
                    status: job.status.unwrap_or_default(),
                    conclusion: job.conclusion.unwrap_or_default(),
                    started_at: job.started_at,
                    completed_at: job.completed_at,
                    html_url: job.html_url.unwrap_or_default(),
                    runner_name: job.runner_name.unwrap_or_default(),
                    origin: RawDataOrigin::default(),
                }])
            });

        DataExtractor::new(
            data.raw_args(RAW_JOB_TABLE)?,
            Arc::clone(&ctx.raw),
            Arc::clone(&data.jobs),
            extract,
        )
        .with_cancellation(ctx.cancel.clone())
        .execute()
        .await
    }
}

/// `GithubJob` → `cicd_tasks`.
pub struct ConvertJobs;

#[async_trait]
impl SubTask<GithubTaskData> for ConvertJobs {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let args = data.raw_args(RAW_JOB_TABLE)?;
        let convert = job_converter(data.deployment.clone());
        let input = data.jobs.cursor_scope(&args.table, &args.params).await?;
        DataConverter::new(args, Arc::clone(&data.domain), convert)
            .with_cancellation(ctx.cancel.clone())
            .execute(input)
            .await
    }
}

fn job_converter(deployment: DeploymentMatcher) -> ConvertFn<GithubJob, DomainRow> {
    let job_ids = DomainIdGenerator::for_entity::<GithubJob>();
    let run_ids = DomainIdGenerator::for_entity::<GithubRun>();
    let repo_ids = DomainIdGenerator::for_entity::<GithubRepo>();

    Arc::new(move |job: &GithubJob| -> Result<Vec<DomainRow>, BoxError> {
        let status = normalize_status(&job.status, &["completed"]);
        Ok(vec![DomainRow::from(CicdTask {
            id: job_ids.generate(job.connection_id, &[&job.run_id, &job.id]),
            name: job.name.clone(),
            pipeline_id: run_ids.generate(job.connection_id, &[&job.repo_id, &job.run_id]),
            status,
            result: classify_result(&job.conclusion),
            kind: deployment.task_type(&job.name),
            duration_sec: duration_secs(status, job.started_at, job.completed_at),
            started_date: job.started_at,
            finished_date: job.completed_at,
            cicd_scope_id: repo_ids.generate(job.connection_id, &[&job.repo_id]),
            origin: RawDataOrigin::default(),
        })])
    })
}

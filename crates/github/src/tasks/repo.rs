use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use lake_core::{Board, DomainIdGenerator, DomainRow, RawDataOrigin, RawRecord};
use lake_pipeline::{
    whole_body, ApiCollector, BoxError, ConvertFn, DataConverter, DataExtractor, ExtractFn,
    PipelineError, StageStats, SubTask, TaskContext,
};

use super::GithubTaskData;
use crate::models::GithubRepo;

pub const RAW_REPO_TABLE: &str = "_raw_github_api_repositories";

#[derive(Debug, Deserialize)]
struct ApiRepo {
    id: u64,
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Fetches the configured repository and converts it into a `boards` row.
///
/// The repository is a single unpaged resource, so collection, extraction
/// and conversion all happen in this one subtask.
pub struct ConvertRepo;

#[async_trait]
impl SubTask<GithubTaskData> for ConvertRepo {
    async fn execute(&self, ctx: &TaskContext<GithubTaskData>) -> Result<StageStats, PipelineError> {
        let data = &ctx.data;
        let args = data.raw_args(RAW_REPO_TABLE)?;

        let collector = ApiCollector::new(
            data.client.clone(),
            Arc::clone(&ctx.raw),
            args.clone(),
            data.options.page_size,
            whole_body(),
        );
        collector.flush().await?;
        collector.collect_one(&data.options.repo_path(), &[], None).await?;

        let connection_id = data.options.connection_id;
        let extract: ExtractFn<GithubRepo> =
            Arc::new(move |record: &RawRecord| -> Result<Vec<GithubRepo>, BoxError> {
                let repo: ApiRepo = record.decode()?;
                Ok(vec![GithubRepo {
                    connection_id,
                    github_id: repo.id,
                    name: repo.full_name,
                    description: repo.description.unwrap_or_default(),
                    html_url: repo.html_url,
                    created_at: repo.created_at,
                    origin: RawDataOrigin::default(),
                }])
            });
        let mut stats = DataExtractor::new(
            args.clone(),
            Arc::clone(&ctx.raw),
            Arc::clone(&data.repos),
            extract,
        )
        .with_cancellation(ctx.cancel.clone())
        .execute()
        .await?;

        let repo_ids = DomainIdGenerator::for_entity::<GithubRepo>();
        let convert: ConvertFn<GithubRepo, DomainRow> =
            Arc::new(move |repo: &GithubRepo| -> Result<Vec<DomainRow>, BoxError> {
                Ok(vec![DomainRow::from(Board {
                    id: repo_ids.generate(repo.connection_id, &[&repo.github_id]),
                    name: repo.name.clone(),
                    description: repo.description.clone(),
                    url: repo.html_url.clone(),
                    created_date: repo.created_at,
                    kind: "GitHub".to_string(),
                    origin: RawDataOrigin::default(),
                })])
            });
        let input = data.repos.cursor_scope(&args.table, &args.params).await?;
        stats += DataConverter::new(args, Arc::clone(&data.domain), convert)
            .with_cancellation(ctx.cancel.clone())
            .execute(input)
            .await?;
        Ok(stats)
    }
}

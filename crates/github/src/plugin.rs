use std::sync::Arc;

use lake_pipeline::{Plugin, SubTaskMeta, DOMAIN_TYPE_CICD, DOMAIN_TYPE_TICKET};

use crate::tasks::{
    CollectJobs, CollectRuns, ConvertJobs, ConvertRepo, ConvertRuns, ExtractJobs, ExtractRuns,
    GithubTaskData,
};

pub struct GithubPlugin;

impl Plugin<GithubTaskData> for GithubPlugin {
    fn name(&self) -> &'static str {
        "github"
    }

    fn description(&self) -> &'static str {
        "Collect GitHub Actions runs and jobs into cicd_pipelines and cicd_tasks"
    }

    fn subtasks(&self) -> Vec<SubTaskMeta<GithubTaskData>> {
        vec![
            SubTaskMeta {
                name: "collectRuns",
                description: "Collect workflow runs into _raw_github_api_runs",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(CollectRuns),
            },
            SubTaskMeta {
                name: "extractRuns",
                description: "Extract raw runs into _tool_github_runs",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(ExtractRuns),
            },
            SubTaskMeta {
                name: "collectJobs",
                description: "Collect the jobs of every run into _raw_github_api_jobs",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(CollectJobs),
            },
            SubTaskMeta {
                name: "extractJobs",
                description: "Extract raw jobs into _tool_github_jobs",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(ExtractJobs),
            },
            SubTaskMeta {
                name: "convertRuns",
                description: "Convert _tool_github_runs into cicd_pipelines",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(ConvertRuns),
            },
            SubTaskMeta {
                name: "convertJobs",
                description: "Convert _tool_github_jobs into cicd_tasks",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD],
                entry: Arc::new(ConvertJobs),
            },
            SubTaskMeta {
                name: "convertRepo",
                description: "Convert the repository into boards",
                enabled_by_default: true,
                domain_types: &[DOMAIN_TYPE_CICD, DOMAIN_TYPE_TICKET],
                entry: Arc::new(ConvertRepo),
            },
        ]
    }
}

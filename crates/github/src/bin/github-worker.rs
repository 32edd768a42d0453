//! github-worker: one-shot GitHub Actions collection run.
//!
//! Runs collect → extract → convert for a single repository and writes every
//! domain row to `<data_dir>/domain.json`. Raw records persist under
//! `<data_dir>/raw` and tool/domain tables under `<data_dir>/tables`, so
//! `--subtasks` can rerun any stage on top of earlier runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lake_core::config::{load_dotenv, split_tokens, Config};
use lake_github::{new_api_client, GithubOptions, GithubPlugin, GithubTaskData};
use lake_pipeline::{JsonlRawStore, PipelineRunner, TaskContext};

// ── CLI ─────────────────────────────────────────────────────────────

/// Collect GitHub Actions runs and jobs into domain-layer CI/CD rows.
#[derive(Parser, Debug)]
#[command(name = "github-worker", version, about)]
struct Cli {
    /// Repository owner (user or organisation).
    #[arg(long, env = "GITHUB_OWNER")]
    owner: String,

    /// Repository name.
    #[arg(long, env = "GITHUB_REPO")]
    repo: String,

    /// Connection id stamped into every domain id.
    #[arg(long)]
    connection_id: Option<u64>,

    /// Comma-separated API tokens, rotated per request.
    #[arg(long)]
    tokens: Option<String>,

    /// API endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Concurrent page requests.
    #[arg(long)]
    concurrency: Option<u32>,

    /// Items requested per page.
    #[arg(long)]
    page_size: Option<u32>,

    /// Regex marking jobs as deployments by name.
    #[arg(long)]
    deployment_pattern: Option<String>,

    /// Directory for raw data and output.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run only these subtasks (comma-separated), in plugin order.
    #[arg(long, value_delimiter = ',')]
    subtasks: Vec<String>,
}

impl Cli {
    /// Flags win over environment config.
    fn apply(self, config: &mut Config) -> (String, String, Vec<String>) {
        if let Some(id) = self.connection_id {
            config.github.connection_id = id;
        }
        if let Some(tokens) = self.tokens.as_deref() {
            config.github.tokens = split_tokens(tokens);
        }
        if let Some(endpoint) = self.endpoint {
            config.github.endpoint = endpoint;
        }
        if let Some(c) = self.concurrency {
            config.collector.concurrency = c;
        }
        if let Some(p) = self.page_size {
            config.collector.page_size = p;
        }
        if self.deployment_pattern.is_some() {
            config.github.deployment_pattern = self.deployment_pattern;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        (self.owner, self.repo, self.subtasks)
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let mut config = Config::from_env();
    let (owner, repo, subtasks) = Cli::parse().apply(&mut config);
    config.log_summary();

    config.validate()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("ctrl-c received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let client = new_api_client(&config.github, &config.collector, Some(cancel.clone()))?;
    let options = GithubOptions {
        connection_id: config.github.connection_id,
        owner,
        repo,
        concurrency: config.collector.concurrency as usize,
        page_size: config.collector.page_size,
        deployment_pattern: config.github.deployment_pattern.clone(),
    };
    let data = GithubTaskData::open(options, client, config.storage.tables_dir())?;
    let raw = Arc::new(JsonlRawStore::open(config.storage.raw_dir())?);
    let ctx = TaskContext::new("github", data, raw).with_cancellation(cancel);

    let selection = (!subtasks.is_empty()).then_some(subtasks.as_slice());
    let report = PipelineRunner::run(&GithubPlugin, &ctx, selection).await?;

    let rows: Vec<_> = ctx.data.domain.all().await?.collect();
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let out = config.storage.data_dir.join("domain.json");
    std::fs::write(&out, serde_json::to_string_pretty(&rows)?)?;

    info!(
        path = %out.display(),
        rows = rows.len(),
        elapsed_ms = report.elapsed_ms,
        "domain rows written"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

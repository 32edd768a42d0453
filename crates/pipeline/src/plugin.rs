//! Plugin and subtask registry plus the runner that drives them in order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::extractor::StageStats;
use crate::store::RawDataStore;

pub const DOMAIN_TYPE_CICD: &str = "CICD";
pub const DOMAIN_TYPE_TICKET: &str = "TICKET";

/// Everything a subtask needs: plugin-specific task data, the raw store and
/// the run's cancellation signal.
pub struct TaskContext<D> {
    pub plugin: String,
    pub data: D,
    pub raw: Arc<dyn RawDataStore>,
    pub cancel: CancellationToken,
}

impl<D> TaskContext<D> {
    pub fn new(plugin: impl Into<String>, data: D, raw: Arc<dyn RawDataStore>) -> Self {
        Self {
            plugin: plugin.into(),
            data,
            raw,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One step of a plugin's pipeline (collect, extract or convert something).
#[async_trait]
pub trait SubTask<D>: Send + Sync {
    async fn execute(&self, ctx: &TaskContext<D>) -> Result<StageStats, PipelineError>;
}

/// Registry entry describing a subtask.
pub struct SubTaskMeta<D> {
    pub name: &'static str,
    pub description: &'static str,
    pub enabled_by_default: bool,
    pub domain_types: &'static [&'static str],
    pub entry: Arc<dyn SubTask<D>>,
}

impl<D> Clone for SubTaskMeta<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            enabled_by_default: self.enabled_by_default,
            domain_types: self.domain_types,
            entry: Arc::clone(&self.entry),
        }
    }
}

/// A data source: a name and an ordered list of subtasks.
pub trait Plugin<D>: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Subtasks in execution order.
    fn subtasks(&self) -> Vec<SubTaskMeta<D>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SubTaskReport {
    pub name: String,
    pub stats: StageStats,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub plugin: String,
    pub subtasks: Vec<SubTaskReport>,
    pub elapsed_ms: u64,
}

/// Runs a plugin's subtasks sequentially.
pub struct PipelineRunner;

impl PipelineRunner {
    /// Subtasks that would run for `selection`, in registry order.
    ///
    /// `None` selects the subtasks enabled by default. Naming an unknown
    /// subtask is an error.
    pub fn plan<D: Send + Sync>(
        plugin: &dyn Plugin<D>,
        selection: Option<&[String]>,
    ) -> Result<Vec<SubTaskMeta<D>>, PipelineError> {
        let all = plugin.subtasks();
        let Some(selection) = selection else {
            return Ok(all.into_iter().filter(|m| m.enabled_by_default).collect());
        };

        if let Some(unknown) = selection
            .iter()
            .find(|name| !all.iter().any(|m| m.name == name.as_str()))
        {
            return Err(PipelineError::Config(format!(
                "plugin {} has no subtask named {unknown:?}",
                plugin.name()
            )));
        }
        Ok(all
            .into_iter()
            .filter(|m| selection.iter().any(|s| s == m.name))
            .collect())
    }

    /// Run the planned subtasks in order, stopping at the first failure.
    ///
    /// Errors are wrapped with the plugin and subtask name so callers can see
    /// which stage failed.
    pub async fn run<D: Send + Sync>(
        plugin: &dyn Plugin<D>,
        ctx: &TaskContext<D>,
        selection: Option<&[String]>,
    ) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let plan = Self::plan(plugin, selection)?;
        info!(
            plugin = plugin.name(),
            subtasks = ?plan.iter().map(|m| m.name).collect::<Vec<_>>(),
            "starting pipeline"
        );

        let mut reports = Vec::with_capacity(plan.len());
        for meta in plan {
            if ctx.cancel.is_cancelled() {
                warn!(plugin = plugin.name(), subtask = meta.name, "cancelled before subtask");
                return Err(PipelineError::Cancelled);
            }

            let sub_start = Instant::now();
            info!(plugin = plugin.name(), subtask = meta.name, "executing subtask");
            let stats = meta.entry.execute(ctx).await.map_err(|e| {
                error!(plugin = plugin.name(), subtask = meta.name, error = %e, "subtask failed");
                match e {
                    PipelineError::Cancelled => PipelineError::Cancelled,
                    e => PipelineError::SubTask {
                        plugin: plugin.name().to_string(),
                        subtask: meta.name.to_string(),
                        source: Box::new(e),
                    },
                }
            })?;

            let elapsed_ms = sub_start.elapsed().as_millis() as u64;
            info!(
                plugin = plugin.name(),
                subtask = meta.name,
                records = stats.records_in,
                rows = stats.rows_out,
                elapsed_ms,
                "subtask finished"
            );
            reports.push(SubTaskReport {
                name: meta.name.to_string(),
                stats,
                elapsed_ms,
            });
        }

        Ok(RunReport {
            plugin: plugin.name().to_string(),
            subtasks: reports,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

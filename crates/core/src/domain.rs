//! Domain layer: normalized, source-agnostic records joinable across plugins.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::didgen::DomainId;
use crate::raw::RawDataOrigin;

/// Task type marking a deployment.
pub const DEPLOYMENT: &str = "DEPLOYMENT";

/// Domain-layer CI/CD status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CicdStatus {
    #[default]
    InProgress,
    Done,
}

impl fmt::Display for CicdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CicdStatus::InProgress => write!(f, "IN_PROGRESS"),
            CicdStatus::Done => write!(f, "DONE"),
        }
    }
}

/// Domain-layer CI/CD result. `Unknown` serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CicdResult {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "ABORT")]
    Abort,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl fmt::Display for CicdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CicdResult::Success => write!(f, "SUCCESS"),
            CicdResult::Failure => write!(f, "FAILURE"),
            CicdResult::Abort => write!(f, "ABORT"),
            CicdResult::Unknown => Ok(()),
        }
    }
}

/// A pipeline run (GitHub workflow run, GitLab pipeline, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CicdPipeline {
    pub id: DomainId,
    pub name: String,
    pub status: CicdStatus,
    pub result: CicdResult,
    #[serde(rename = "type")]
    pub kind: String,
    pub duration_sec: Option<u64>,
    pub created_date: Option<DateTime<Utc>>,
    pub finished_date: Option<DateTime<Utc>>,
    pub cicd_scope_id: DomainId,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

/// One task (job) inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CicdTask {
    pub id: DomainId,
    pub name: String,
    pub pipeline_id: DomainId,
    pub status: CicdStatus,
    pub result: CicdResult,
    #[serde(rename = "type")]
    pub kind: String,
    pub duration_sec: Option<u64>,
    pub started_date: Option<DateTime<Utc>>,
    pub finished_date: Option<DateTime<Utc>>,
    pub cicd_scope_id: DomainId,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

/// An issue board (a repository, a Jira board, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: DomainId,
    pub name: String,
    pub description: String,
    pub url: String,
    pub created_date: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub origin: RawDataOrigin,
}

/// Any domain-layer row, so one converter can emit several kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum DomainRow {
    CicdPipelines(CicdPipeline),
    CicdTasks(CicdTask),
    Boards(Board),
}

impl DomainRow {
    pub fn table_name(&self) -> &'static str {
        match self {
            DomainRow::CicdPipelines(_) => "cicd_pipelines",
            DomainRow::CicdTasks(_) => "cicd_tasks",
            DomainRow::Boards(_) => "boards",
        }
    }

    pub fn id(&self) -> &DomainId {
        match self {
            DomainRow::CicdPipelines(r) => &r.id,
            DomainRow::CicdTasks(r) => &r.id,
            DomainRow::Boards(r) => &r.id,
        }
    }

    pub fn origin(&self) -> &RawDataOrigin {
        match self {
            DomainRow::CicdPipelines(r) => &r.origin,
            DomainRow::CicdTasks(r) => &r.origin,
            DomainRow::Boards(r) => &r.origin,
        }
    }

    pub fn origin_mut(&mut self) -> &mut RawDataOrigin {
        match self {
            DomainRow::CicdPipelines(r) => &mut r.origin,
            DomainRow::CicdTasks(r) => &mut r.origin,
            DomainRow::Boards(r) => &mut r.origin,
        }
    }

    pub fn as_task(&self) -> Option<&CicdTask> {
        match self {
            DomainRow::CicdTasks(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_pipeline(&self) -> Option<&CicdPipeline> {
        match self {
            DomainRow::CicdPipelines(p) => Some(p),
            _ => None,
        }
    }
}

impl From<CicdPipeline> for DomainRow {
    fn from(p: CicdPipeline) -> Self {
        DomainRow::CicdPipelines(p)
    }
}

impl From<CicdTask> for DomainRow {
    fn from(t: CicdTask) -> Self {
        DomainRow::CicdTasks(t)
    }
}

impl From<Board> for DomainRow {
    fn from(b: Board) -> Self {
        DomainRow::Boards(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::didgen::DomainIdGenerator;

    #[test]
    fn result_serializes_unknown_as_empty() {
        assert_eq!(serde_json::to_string(&CicdResult::Unknown).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&CicdResult::Abort).unwrap(), "\"ABORT\"");
        assert_eq!(CicdResult::Unknown.to_string(), "");
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(serde_json::to_string(&CicdStatus::InProgress).unwrap(), "\"IN_PROGRESS\"");
        assert_eq!(CicdStatus::Done.to_string(), "DONE");
    }

    #[test]
    fn domain_row_is_tagged_by_table() {
        let gen = DomainIdGenerator::new("github:GithubRepo");
        let board = Board {
            id: gen.generate(1, &[&5u64]),
            name: "apache/lake".into(),
            description: String::new(),
            url: "https://github.com/apache/lake".into(),
            created_date: None,
            kind: "GitHub".into(),
            origin: RawDataOrigin::default(),
        };
        let row = DomainRow::from(board);
        assert_eq!(row.table_name(), "boards");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["table"], "boards");
        assert_eq!(json["id"], "github:GithubRepo#1:5");
        assert_eq!(json["type"], "GitHub");
    }
}

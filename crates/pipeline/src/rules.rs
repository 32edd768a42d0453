//! Business rules shared by converters: result classification, status
//! normalization, durations and deployment tagging.

use chrono::{DateTime, Utc};
use regex::Regex;

use lake_core::{CicdResult, CicdStatus, DEPLOYMENT};

use crate::error::PipelineError;

/// Substrings recognised in free-text conclusions, checked in precedence
/// order: success, then failure, then abort.
#[derive(Debug, Clone)]
pub struct ResultRules {
    pub success: Vec<&'static str>,
    pub failure: Vec<&'static str>,
    pub abort: Vec<&'static str>,
}

impl Default for ResultRules {
    fn default() -> Self {
        Self {
            success: vec!["success"],
            failure: vec!["fail"],
            abort: vec!["abort", "cancel"],
        }
    }
}

impl ResultRules {
    /// First matching class wins. No match yields [`CicdResult::Unknown`].
    pub fn classify(&self, conclusion: &str) -> CicdResult {
        let conclusion = conclusion.to_ascii_lowercase();
        let hit = |patterns: &[&str]| patterns.iter().any(|p| conclusion.contains(p));
        if hit(&self.success) {
            CicdResult::Success
        } else if hit(&self.failure) {
            CicdResult::Failure
        } else if hit(&self.abort) {
            CicdResult::Abort
        } else {
            CicdResult::Unknown
        }
    }
}

/// Classify a conclusion with the default rules.
pub fn classify_result(conclusion: &str) -> CicdResult {
    ResultRules::default().classify(conclusion)
}

/// `Done` when `status` is one of `done_states` (case-insensitive),
/// otherwise `InProgress`.
pub fn normalize_status(status: &str, done_states: &[&str]) -> CicdStatus {
    if done_states.iter().any(|s| s.eq_ignore_ascii_case(status)) {
        CicdStatus::Done
    } else {
        CicdStatus::InProgress
    }
}

/// Whole seconds between `started` and `finished`, only for terminal
/// entities with both timestamps. A finish before the start clamps to zero.
pub fn duration_secs(
    status: CicdStatus,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
) -> Option<u64> {
    if status != CicdStatus::Done {
        return None;
    }
    let (started, finished) = (started?, finished?);
    Some((finished - started).num_seconds().max(0) as u64)
}

/// Optional name pattern that re-labels matching entities as deployments.
#[derive(Debug, Clone, Default)]
pub struct DeploymentMatcher {
    pattern: Option<Regex>,
}

impl DeploymentMatcher {
    /// An empty or absent pattern matches nothing.
    pub fn new(pattern: Option<&str>) -> Result<Self, PipelineError> {
        let pattern = match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Some(Regex::new(p).map_err(|e| {
                PipelineError::Config(format!("invalid deployment pattern {p:?}: {e}"))
            })?),
            None => None,
        };
        Ok(Self { pattern })
    }

    pub fn is_deployment(&self, name: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Task type for `name`: [`DEPLOYMENT`] on a match, empty otherwise.
    pub fn task_type(&self, name: &str) -> String {
        if self.is_deployment(name) {
            DEPLOYMENT.to_string()
        } else {
            String::new()
        }
    }
}

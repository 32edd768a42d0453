use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LakeError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => default,
    }
}

/// Split a comma-separated credential list, dropping blanks.
pub fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub collector: CollectorConfig,
    pub github: GithubConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LAKE_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LAKE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            collector: CollectorConfig::from_env_profiled(p),
            github: GithubConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  collector:   concurrency={}, page_size={}, timeout={}s, retries={}",
            self.collector.concurrency,
            self.collector.page_size,
            self.collector.timeout_secs,
            self.collector.max_retries
        );
        tracing::info!(
            "  github:      endpoint={}, connection={}, tokens={}",
            self.github.endpoint,
            self.github.connection_id,
            self.github.tokens.len()
        );
        tracing::info!("  storage:     data_dir={}", self.storage.data_dir.display());
    }

    /// Reject settings no run can succeed with.
    pub fn validate(&self) -> Result<(), LakeError> {
        if self.collector.concurrency == 0 {
            return Err(LakeError::Config("COLLECTOR_CONCURRENCY must be at least 1".into()));
        }
        if self.collector.page_size == 0 {
            return Err(LakeError::Config("COLLECTOR_PAGE_SIZE must be at least 1".into()));
        }
        if !self.github.is_configured() {
            return Err(LakeError::Config("no GitHub tokens configured (GITHUB_TOKENS)".into()));
        }
        Ok(())
    }

    /// Return a redacted view safe for logs and reports (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "collector": {
                "concurrency": self.collector.concurrency,
                "page_size": self.collector.page_size,
                "timeout_secs": self.collector.timeout_secs,
                "max_retries": self.collector.max_retries,
                "strict_pagination": self.collector.strict_pagination,
            },
            "github": {
                "endpoint": self.github.endpoint,
                "connection_id": self.github.connection_id,
                "token_count": self.github.tokens.len(),
                "deployment_pattern": self.github.deployment_pattern,
                "configured": self.github.is_configured(),
            },
            "storage": { "data_dir": self.storage.data_dir },
        })
    }
}

// ── Collector ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Maximum number of page requests in flight at once.
    pub concurrency: u32,
    pub page_size: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Fail on malformed pagination metadata instead of assuming a single page.
    pub strict_pagination: bool,
}

impl CollectorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            concurrency: profiled_env_u32(p, "COLLECTOR_CONCURRENCY", 10).max(1),
            page_size: profiled_env_u32(p, "COLLECTOR_PAGE_SIZE", 100).max(1),
            timeout_secs: profiled_env_u64(p, "COLLECTOR_TIMEOUT_SECS", 10),
            max_retries: profiled_env_u32(p, "COLLECTOR_MAX_RETRIES", 3),
            retry_backoff_ms: profiled_env_u64(p, "COLLECTOR_RETRY_BACKOFF_MS", 500),
            strict_pagination: profiled_env_bool(p, "COLLECTOR_STRICT_PAGINATION", false),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            page_size: 100,
            timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
            strict_pagination: false,
        }
    }
}

// ── GitHub ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub endpoint: String,
    /// Credential pool, rotated round-robin per request.
    pub tokens: Vec<String>,
    pub connection_id: u64,
    /// Job names matching this regex are classified as deployments.
    pub deployment_pattern: Option<String>,
}

impl GithubConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "GITHUB_ENDPOINT", "https://api.github.com/"),
            tokens: profiled_env_opt(p, "GITHUB_TOKENS")
                .map(|raw| split_tokens(&raw))
                .unwrap_or_default(),
            connection_id: profiled_env_u64(p, "GITHUB_CONNECTION_ID", 1),
            deployment_pattern: profiled_env_opt(p, "GITHUB_DEPLOYMENT_PATTERN"),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.tokens.is_empty()
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }

    /// Directory holding the raw-layer JSON-lines tables.
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    /// Directory holding the tool-layer and domain-layer tables.
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }
}

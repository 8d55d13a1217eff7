use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::HarvestError;
use crate::types::{Query, SearchTab};

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys) stay as env vars, see [`Secrets`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacingConfig {
    /// Wait between advance-steps.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    /// Wait between queries.
    #[serde(default = "default_query_delay_ms")]
    pub query_delay_ms: u64,
    /// Wait before retrying a transient fetch failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: default_step_delay_ms(),
            query_delay_ms: default_query_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl PacingConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_records_per_query")]
    pub max_records_per_query: usize,
    #[serde(default = "default_max_advance_steps")]
    pub max_advance_steps: usize,
    /// Consecutive advance-steps without new units before declaring end-of-results.
    #[serde(default = "default_max_empty_steps")]
    pub max_empty_steps: usize,
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,
    /// Optional cap on raw units surfaced per query, independent of how many are new.
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_records_per_query: default_max_records_per_query(),
            max_advance_steps: default_max_advance_steps(),
            max_empty_steps: default_max_empty_steps(),
            max_fetch_retries: default_max_fetch_retries(),
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Results requested per advance-step from paged back ends.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Results requested from a search run, for back ends that run searches up front.
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    #[serde(default)]
    pub search_tab: SearchTab,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_items: default_max_items(),
            search_tab: SearchTab::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("twitter_data")
}

fn default_step_delay_ms() -> u64 {
    2_000
}

fn default_query_delay_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_records_per_query() -> usize {
    2_000
}

fn default_max_advance_steps() -> usize {
    50
}

fn default_max_empty_steps() -> usize {
    2
}

fn default_max_fetch_retries() -> u32 {
    3
}

fn default_page_size() -> u32 {
    100
}

fn default_max_items() -> u32 {
    1_000
}

impl FileConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, HarvestError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| HarvestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), HarvestError> {
        if self.queries.is_empty() {
            return Err(HarvestError::Config("no [[queries]] configured".into()));
        }
        for (i, q) in self.queries.iter().enumerate() {
            if q.query_text.trim().is_empty() {
                return Err(HarvestError::Config(format!("queries[{i}]: query is empty")));
            }
            if q.description.trim().is_empty() {
                return Err(HarvestError::Config(format!(
                    "queries[{i}]: description is empty"
                )));
            }
            if let (Some(since), Some(until)) = (q.since, q.until) {
                if since >= until {
                    return Err(HarvestError::Config(format!(
                        "queries[{i}]: since ({since}) must be before until ({until})"
                    )));
                }
            }
        }
        if self.limits.max_empty_steps == 0 {
            return Err(HarvestError::Config(
                "limits.max_empty_steps must be at least 1".into(),
            ));
        }
        if self.limits.max_advance_steps == 0 {
            return Err(HarvestError::Config(
                "limits.max_advance_steps must be at least 1".into(),
            ));
        }
        if self.limits.max_results == Some(0) {
            return Err(HarvestError::Config(
                "limits.max_results must be at least 1 when set".into(),
            ));
        }
        if self.backend.page_size == 0 {
            return Err(HarvestError::Config(
                "backend.page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Record cap for one query, honouring its override.
    pub fn max_records_for(&self, query: &Query) -> usize {
        query.max_records.unwrap_or(self.limits.max_records_per_query)
    }

    pub fn log_summary(&self) {
        info!(
            output_dir = %self.output.dir.display(),
            queries = self.queries.len(),
            max_records_per_query = self.limits.max_records_per_query,
            max_advance_steps = self.limits.max_advance_steps,
            max_empty_steps = self.limits.max_empty_steps,
            max_fetch_retries = self.limits.max_fetch_retries,
            step_delay_ms = self.pacing.step_delay_ms,
            query_delay_ms = self.pacing.query_delay_ms,
            search_tab = %self.backend.search_tab,
            "Loaded configuration"
        );
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = FileConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Credentials read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub apify_api_key: String,
}

impl Secrets {
    pub fn from_env() -> std::result::Result<Self, HarvestError> {
        Ok(Self {
            apify_api_key: required_env("APIFY_API_KEY")?,
        })
    }

    pub fn log_redacted(&self) {
        info!(apify_api_key = %redact(&self.apify_api_key), "Loaded secrets");
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("apify_api_key", &redact(&self.apify_api_key))
            .finish()
    }
}

fn required_env(key: &str) -> std::result::Result<String, HarvestError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| HarvestError::Config(format!("{key} environment variable is required")))
}

/// Show only the last four characters of a secret.
fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

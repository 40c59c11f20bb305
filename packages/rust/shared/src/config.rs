//! Application configuration for brandpipe.
//!
//! User config lives at `~/.brandpipe/brandpipe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrandPipeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "brandpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".brandpipe";

// ---------------------------------------------------------------------------
// Config structs (matching brandpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    #[serde(default)]
    pub jobs: JobsSection,

    #[serde(default)]
    pub fetch: FetchSection,

    #[serde(default)]
    pub onboarding: OnboardingSection,

    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Path of the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/brandpipe.db".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for guide, plan, and draft generation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base URL of the chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[jobs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSection {
    /// Dispatches allowed before a job fails terminally.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age after which a `running` lease is treated as abandoned.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Number of crawl workers in the pool.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Idle wait between empty lease attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_visibility_timeout_secs() -> u64 {
    300
}
fn default_worker_count() -> u32 {
    4
}
fn default_poll_interval_ms() -> u64 {
    500
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Permit loopback/private targets (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_redirects: default_max_redirects(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

/// `[onboarding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingSection {
    /// Attempts for guide and plan generation before the run fails.
    #[serde(default = "default_max_generation_attempts")]
    pub max_generation_attempts: u32,

    /// First backoff delay; doubles per attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Timeout applied to every AI completion call.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Planned content items per run.
    #[serde(default = "default_plan_items")]
    pub plan_items: u32,

    /// Drafts generated concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: u32,

    /// Regenerations allowed before a draft is escalated.
    #[serde(default = "default_max_draft_retries")]
    pub max_draft_retries: u32,

    /// Idle age after which a non-terminal run is failed as stale on resume.
    #[serde(default = "default_stale_run_timeout_secs")]
    pub stale_run_timeout_secs: u64,
}

impl Default for OnboardingSection {
    fn default() -> Self {
        Self {
            max_generation_attempts: default_max_generation_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            completion_timeout_secs: default_completion_timeout_secs(),
            plan_items: default_plan_items(),
            max_in_flight: default_max_in_flight(),
            max_draft_retries: default_max_draft_retries(),
            stale_run_timeout_secs: default_stale_run_timeout_secs(),
        }
    }
}

fn default_max_generation_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_plan_items() -> u32 {
    7
}
fn default_max_in_flight() -> u32 {
    3
}
fn default_max_draft_retries() -> u32 {
    2
}
fn default_stale_run_timeout_secs() -> u64 {
    1800
}

/// Weight and minimum score for one BFS dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionPolicy {
    pub weight: f64,
    /// A score below this fails the draft regardless of the overall score.
    pub floor: f64,
}

/// `[scoring]` section; used directly by the BFS engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    #[serde(default = "default_tone")]
    pub tone_alignment: DimensionPolicy,

    #[serde(default = "default_factual")]
    pub factual_consistency: DimensionPolicy,

    #[serde(default = "default_formatting")]
    pub formatting_compliance: DimensionPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            tone_alignment: default_tone(),
            factual_consistency: default_factual(),
            formatting_compliance: default_formatting(),
        }
    }
}

fn default_acceptance_threshold() -> f64 {
    70.0
}
fn default_tone() -> DimensionPolicy {
    DimensionPolicy {
        weight: 0.40,
        floor: 50.0,
    }
}
fn default_factual() -> DimensionPolicy {
    DimensionPolicy {
        weight: 0.35,
        floor: 60.0,
    }
}
fn default_formatting() -> DimensionPolicy {
    DimensionPolicy {
        weight: 0.25,
        floor: 50.0,
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime Job Store policy.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    pub max_attempts: u32,
    pub visibility_timeout: Duration,
}

impl From<&AppConfig> for JobStoreConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.jobs.max_attempts.max(1),
            visibility_timeout: Duration::from_secs(config.jobs.visibility_timeout_secs),
        }
    }
}

/// Runtime worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_count: config.jobs.worker_count.max(1) as usize,
            poll_interval: Duration::from_millis(config.jobs.poll_interval_ms),
        }
    }
}

/// Runtime HTTP fetch settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub allow_private_hosts: bool,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_redirects: config.fetch.max_redirects,
            allow_private_hosts: config.fetch.allow_private_hosts,
        }
    }
}

/// Runtime onboarding orchestrator policy.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    pub max_generation_attempts: u32,
    pub backoff_base: Duration,
    pub completion_timeout: Duration,
    pub plan_items: u32,
    pub max_in_flight: usize,
    pub max_draft_retries: u32,
    pub stale_run_timeout: Duration,
}

impl From<&AppConfig> for OnboardingConfig {
    fn from(config: &AppConfig) -> Self {
        let section = &config.onboarding;
        Self {
            max_generation_attempts: section.max_generation_attempts.max(1),
            backoff_base: Duration::from_millis(section.backoff_base_ms),
            completion_timeout: Duration::from_secs(section.completion_timeout_secs),
            plan_items: section.plan_items.max(1),
            max_in_flight: section.max_in_flight.max(1) as usize,
            max_draft_retries: section.max_draft_retries,
            stale_run_timeout: Duration::from_secs(section.stale_run_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.brandpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BrandPipeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.brandpipe/brandpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BrandPipeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BrandPipeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BrandPipeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BrandPipeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BrandPipeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(BrandPipeError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("visibility_timeout_secs"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[jobs]
max_attempts = 5

[scoring]
acceptance_threshold = 80.0

[scoring.tone_alignment]
weight = 0.5
floor = 40.0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.jobs.max_attempts, 5);
        assert_eq!(config.jobs.visibility_timeout_secs, 300);
        assert_eq!(config.scoring.acceptance_threshold, 80.0);
        assert_eq!(config.scoring.tone_alignment.weight, 0.5);
        assert_eq!(config.scoring.factual_consistency.floor, 60.0);
        assert_eq!(config.onboarding.plan_items, 7);
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();

        let jobs = JobStoreConfig::from(&app);
        assert_eq!(jobs.max_attempts, 3);
        assert_eq!(jobs.visibility_timeout, Duration::from_secs(300));

        let onboarding = OnboardingConfig::from(&app);
        assert_eq!(onboarding.max_generation_attempts, 3);
        assert_eq!(onboarding.max_draft_retries, 2);
        assert_eq!(onboarding.max_in_flight, 3);

        let fetch = FetchConfig::from(&app);
        assert!(!fetch.allow_private_hosts);
    }

    #[test]
    fn zero_counts_are_clamped() {
        let mut app = AppConfig::default();
        app.jobs.max_attempts = 0;
        app.jobs.worker_count = 0;
        app.onboarding.max_in_flight = 0;
        assert_eq!(JobStoreConfig::from(&app).max_attempts, 1);
        assert_eq!(WorkerConfig::from(&app).worker_count, 1);
        assert_eq!(OnboardingConfig::from(&app).max_in_flight, 1);
    }

    #[test]
    fn api_key_resolution() {
        let mut config = AppConfig::default();
        // Unique env var name so other tests are unaffected
        config.openrouter.api_key_env = "BP_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}

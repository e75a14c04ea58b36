//! TOML configuration for the discovery pipeline.
//!
//! A flat configuration record supplied at construction time: engine limits,
//! storage location, logging, and the job table. There is no hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collectors::CollectorConfig;
use crate::scheduler::{profiles, Priority};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "DISCOVERY_PIPELINE_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/discovery-pipeline/pipeline.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the pipeline process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "profiles::defaults")]
    pub jobs: Vec<JobConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            jobs: profiles::defaults(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), jobs = config.jobs.len(), "loaded pipeline configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (a `--config` flag); failure to load it is an error.
    /// 2. The path in the `DISCOVERY_PIPELINE_CONFIG` environment variable.
    /// 3. `/etc/discovery-pipeline/pipeline.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "DISCOVERY_PIPELINE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.concurrency_limit == 0 {
            anyhow::bail!("pipeline.concurrency_limit must be at least 1");
        }
        if p.execution_timeout_secs == 0 {
            anyhow::bail!("pipeline.execution_timeout_secs must be at least 1");
        }
        if !(0.0..=100.0).contains(&p.warning_threshold) {
            anyhow::bail!(
                "pipeline.warning_threshold must be between 0 and 100, got {}",
                p.warning_threshold
            );
        }
        if p.defer_retry_ms == 0 {
            anyhow::bail!("pipeline.defer_retry_ms must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

/// Limits and thresholds for the execution engine and health reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum executions in flight across all jobs.
    pub concurrency_limit: usize,
    /// Wall-clock budget per execution.
    pub execution_timeout_secs: u64,
    /// Success rate (percent) under which health becomes `warning`.
    pub warning_threshold: f64,
    /// How long `stop` waits for in-flight executions to drain.
    pub shutdown_grace_secs: u64,
    /// Delay before a deferred request retries admission.
    pub defer_retry_ms: u64,
    /// Number of most recent executions inspected for critical failures.
    pub recent_window: usize,
    /// Finished executions kept in memory.
    pub history_limit: usize,
    /// Interval between persisted health snapshots; 0 disables them.
    pub snapshot_interval_secs: u64,
    /// Case-insensitive substrings that mark a failure as critical.
    pub critical_patterns: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            execution_timeout_secs: 300,
            warning_threshold: 90.0,
            shutdown_grace_secs: 30,
            defer_retry_ms: 5_000,
            recent_window: 10,
            history_limit: 500,
            snapshot_interval_secs: 300,
            critical_patterns: vec![
                "ECONNREFUSED".to_string(),
                "ENOTFOUND".to_string(),
                "out of memory".to_string(),
                "connection refused".to_string(),
            ],
        }
    }
}

impl PipelineSettings {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn defer_retry(&self) -> Duration {
        Duration::from_millis(self.defer_retry_ms)
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding execution records, snapshots, and incidents.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/discovery-pipeline.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (`trace` .. `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One `[[jobs]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    /// Five-field cron expression.
    pub schedule: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub collector: CollectorConfig,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

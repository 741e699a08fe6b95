//! Configuration loading for faultline.
//!
//! Configuration is loaded from a TOML file (default: `faultline.toml`).
//! Every section and every field is optional.

use faultline_types::OperationKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a harness run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Worker pool sizing.
    pub pool: PoolConfig,
    /// Workload generation.
    pub workload: WorkloadConfig,
    /// Report collection.
    pub report: ReportConfig,
    /// Failure classification policy.
    pub policy: PolicyConfig,
    /// Simulated fault timing (used by the `faultline run` simulation).
    pub fault: FaultConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers (default: 16).
    pub workers: usize,
    /// Maximum outstanding tasks, queued plus executing (default: 32).
    /// Zero disables admission control.
    pub queue_capacity: usize,
}

/// Workload generation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of buckets writes are spread across (default: 5).
    pub buckets: usize,
    /// Prefix for generated bucket names (default: "faultline").
    pub bucket_prefix: String,
    /// Smallest generated object in bytes (default: 1KB).
    pub min_object_size: usize,
    /// Largest generated object in bytes (default: 1MB).
    pub max_object_size: usize,
    /// Delay between submissions in milliseconds (default: 0).
    pub pace_ms: u64,
}

/// Report collection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    /// How long to wait for all driver reports in seconds (default: 60).
    pub timeout_secs: u64,
}

/// Failure classification policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Tolerance around the window edges in milliseconds (default: 0).
    pub grace_ms: u64,
    /// Upper bound on expected failures; unset means unbounded.
    pub max_expected_failures: Option<usize>,
    /// Operation kinds whose failures after the window closes are tolerated
    /// (default: none).
    pub tolerated_after_close: Vec<OperationKind>,
}

/// Simulated fault configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Time from workload start to opening the window in milliseconds
    /// (default: 500).
    pub start_after_ms: u64,
    /// How long the component stays unavailable in milliseconds
    /// (default: 2000).
    pub transition_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 32,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            buckets: 5,
            bucket_prefix: "faultline".to_string(),
            min_object_size: 1024,         // 1KB
            max_object_size: 1024 * 1024, // 1MB
            pace_ms: 0,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            grace_ms: 0,
            max_expected_failures: None,
            tolerated_after_close: Vec::new(),
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            start_after_ms: 500,
            transition_ms: 2000,
        }
    }
}

impl PoolConfig {
    /// Pool with `workers` workers and the default queue capacity.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl WorkloadConfig {
    /// Delay between submissions, if any.
    pub fn pace(&self) -> Option<Duration> {
        (self.pace_ms > 0).then(|| Duration::from_millis(self.pace_ms))
    }
}

impl ReportConfig {
    /// Report timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid(
                "pool.workers must be at least 1".to_string(),
            ));
        }
        if self.workload.buckets == 0 {
            return Err(ConfigError::Invalid(
                "workload.buckets must be at least 1".to_string(),
            ));
        }
        if self.workload.min_object_size > self.workload.max_object_size {
            return Err(ConfigError::Invalid(format!(
                "workload.min_object_size ({}) exceeds max_object_size ({})",
                self.workload.min_object_size, self.workload.max_object_size
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

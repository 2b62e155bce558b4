//! Configuration parsing and validation.
//!
//! Settings come from three layers: built-in defaults, an optional YAML file
//! (with environment variable interpolation), and command-line overrides
//! applied by [`CliArgs::apply_to`].

mod cli;
mod vars;

pub use cli::CliArgs;
pub use vars::{InterpolationResult, interpolate, interpolate_with};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyPatternSnafu, EmptyShardAddressSnafu, EnvInterpolationSnafu,
    InvalidErrorRateSnafu, ReadFileSnafu, YamlParseSnafu, ZeroSettingSnafu,
};
use crate::shard::{DeviceType, ShardRouter};

/// Main configuration structure for the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub shards: ShardsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Where input files are found and how they are streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Glob pattern for input files (default: `./data/*.tsv.gz`).
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Capacity of the per-file job channel between reader and executors.
    #[serde(default = "default_job_queue_size")]
    pub job_queue_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            job_queue_size: default_job_queue_size(),
        }
    }
}

fn default_pattern() -> String {
    "./data/*.tsv.gz".to_string()
}

fn default_job_queue_size() -> usize {
    1024
}

/// Memcached address per device type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardsConfig {
    #[serde(default = "default_idfa")]
    pub idfa: String,
    #[serde(default = "default_gaid")]
    pub gaid: String,
    #[serde(default = "default_adid")]
    pub adid: String,
    #[serde(default = "default_dvid")]
    pub dvid: String,
}

impl Default for ShardsConfig {
    fn default() -> Self {
        Self {
            idfa: default_idfa(),
            gaid: default_gaid(),
            adid: default_adid(),
            dvid: default_dvid(),
        }
    }
}

fn default_idfa() -> String {
    "127.0.0.1:33013".to_string()
}

fn default_gaid() -> String {
    "127.0.0.1:33014".to_string()
}

fn default_adid() -> String {
    "127.0.0.1:33015".to_string()
}

fn default_dvid() -> String {
    "127.0.0.1:33016".to_string()
}

impl ShardsConfig {
    /// Address configured for a device type.
    pub fn address(&self, device_type: DeviceType) -> &str {
        match device_type {
            DeviceType::Idfa => &self.idfa,
            DeviceType::Gaid => &self.gaid,
            DeviceType::Adid => &self.adid,
            DeviceType::Dvid => &self.dvid,
        }
    }

    /// Build the router used by file workers.
    pub fn router(&self) -> ShardRouter {
        ShardRouter::new(
            DeviceType::ALL
                .iter()
                .map(|dt| (dt.as_str().to_string(), self.address(*dt).to_string())),
        )
    }
}

/// Key-value store write settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Log intended writes instead of sending them.
    #[serde(default)]
    pub dry_run: bool,

    /// Total attempts per batch, including the first one (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base of the linear backoff between attempts, in milliseconds (default: 1000).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Connect and IO timeout per request, in milliseconds (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Idle connections kept per address (default: 8).
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_ms: default_timeout_ms(),
            max_idle_connections: default_max_idle_connections(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_idle_connections() -> usize {
    8
}

impl StoreConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Batching and parallelism settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Records per shard batch (default: 100).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Executors per file (default: 4).
    #[serde(default = "default_threads_in_worker")]
    pub threads_in_worker: usize,

    /// Files processed concurrently (default: available CPU parallelism).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Error rate under which a file load is considered successful (default: 0.01).
    #[serde(default = "default_normal_err_rate")]
    pub normal_err_rate: f64,

    /// Optional deadline for a single file, in seconds.
    #[serde(default)]
    pub file_timeout_secs: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            threads_in_worker: default_threads_in_worker(),
            workers: default_workers(),
            normal_err_rate: default_normal_err_rate(),
            file_timeout_secs: None,
        }
    }
}

fn default_max_batch_size() -> usize {
    100
}

fn default_threads_in_worker() -> usize {
    4
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_normal_err_rate() -> f64 {
    0.01
}

impl LoaderConfig {
    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to serve metrics over HTTP (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::parse(&content)
    }

    /// Parse configuration from YAML text, interpolating environment variables.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let result = interpolate(content);
        if !result.is_ok() {
            return EnvInterpolationSnafu {
                message: result.errors.join("\n"),
            }
            .fail();
        }

        // An empty document means "all defaults".
        if result.text.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.pattern.trim().is_empty(), EmptyPatternSnafu);

        for device_type in DeviceType::ALL {
            ensure!(
                !self.shards.address(device_type).trim().is_empty(),
                EmptyShardAddressSnafu {
                    device_type: device_type.as_str(),
                }
            );
        }

        let positive = [
            ("source.job_queue_size", self.source.job_queue_size),
            ("store.max_retries", self.store.max_retries),
            ("loader.max_batch_size", self.loader.max_batch_size),
            ("loader.threads_in_worker", self.loader.threads_in_worker),
            ("loader.workers", self.loader.workers),
        ];
        for (name, value) in positive {
            ensure!(value > 0, ZeroSettingSnafu { name });
        }

        let rate = self.loader.normal_err_rate;
        ensure!(
            (0.0..=1.0).contains(&rate),
            InvalidErrorRateSnafu { value: rate }
        );

        Ok(())
    }
}

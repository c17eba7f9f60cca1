//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "TOML configuration model and loader for the ReactorSync runtime."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::model::{Reactor, ReactorFamily, ReactorId};

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_seed() -> u64 {
    0x5EED_u64
}

fn default_healthy_threshold() -> f64 {
    90.0
}

fn default_warning_threshold() -> f64 {
    70.0
}

fn default_dedup_window() -> Duration {
    Duration::from_secs(3600)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_retry_jitter() -> Duration {
    Duration::from_millis(10)
}

fn default_topic_prefix() -> String {
    "reactorsync".to_owned()
}

fn default_partitions() -> usize {
    6
}

fn default_subscriber_capacity() -> usize {
    1024
}

fn default_retention_days() -> u32 {
    30
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default api address")
}

/// Primary configuration object for the ReactorSync runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reactors: Vec<ReactorSeed>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "REACTORSYNC_CONFIG";

    /// Load configuration from disk, respecting the `REACTORSYNC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        self.broker.validate()?;

        let mut seen = BTreeSet::new();
        for seed in &self.reactors {
            if !seen.insert(seed.id) {
                return Err(anyhow!("reactor id {} is declared more than once", seed.id));
            }
            seed.validate()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Scheduler, physics seed, and health classification settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval_ms: Duration,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub start_tick: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_dedup_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub fault_dedup_window: Duration,
    #[serde(default = "default_drain_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub drain_timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            seed: default_seed(),
            start_tick: 0,
            healthy_threshold: default_healthy_threshold(),
            warning_threshold: default_warning_threshold(),
            fault_dedup_window: default_dedup_window(),
            drain_timeout: default_drain_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms.is_zero() {
            return Err(anyhow!("generator interval must be positive"));
        }
        if !(0.0..=100.0).contains(&self.warning_threshold)
            || !(0.0..=100.0).contains(&self.healthy_threshold)
        {
            return Err(anyhow!("health thresholds must lie within [0, 100]"));
        }
        if self.warning_threshold >= self.healthy_threshold {
            return Err(anyhow!(
                "warning threshold {} must be below healthy threshold {}",
                self.warning_threshold,
                self.healthy_threshold
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Bounded exponential backoff applied to publish and persist calls.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_base_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay_ms: Duration,
    #[serde(default = "default_retry_jitter")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub jitter_ms: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay(),
            jitter_ms: default_retry_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            partitions: default_partitions(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

impl BrokerConfig {
    pub fn telemetry_topic(&self) -> String {
        format!("{}.telemetry", self.topic_prefix)
    }

    pub fn alerts_topic(&self) -> String {
        format!("{}.alerts", self.topic_prefix)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic_prefix.trim().is_empty() {
            return Err(anyhow!("broker topic_prefix must not be empty"));
        }
        if self.partitions == 0 {
            return Err(anyhow!("broker partitions must be at least 1"));
        }
        if self.subscriber_capacity == 0 {
            return Err(anyhow!("broker subscriber_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Append-only JSON-lines journal of persisted readings and fault transitions.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

/// Reactor registered at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactorSeed {
    pub id: ReactorId,
    pub name: String,
    #[serde(default, rename = "type")]
    pub family: ReactorFamily,
    pub latitude: f64,
    pub longitude: f64,
}

impl ReactorSeed {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("reactor {} must have a name", self.id));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(anyhow!(
                "reactor {} has invalid coordinates ({}, {})",
                self.id,
                self.latitude,
                self.longitude
            ));
        }
        Ok(())
    }

    pub fn to_reactor(&self) -> Reactor {
        Reactor::new(
            self.id,
            self.name.clone(),
            self.family,
            self.latitude,
            self.longitude,
        )
    }
}

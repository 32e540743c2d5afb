//! Configuration management for Shardlimit.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables that override file settings,
/// e.g. `SHARDLIMIT__REPLICAS__COUNT=3`.
pub const ENV_PREFIX: &str = "SHARDLIMIT";

/// Main configuration for the Shardlimit service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardlimitConfig {
    /// Rate limit rules source
    #[serde(default)]
    pub rules: RulesConfig,

    /// Replica count used to shard limits
    #[serde(default)]
    pub replicas: ReplicasConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where rate limit rule documents come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Directory of YAML rule documents
    #[serde(default = "default_rules_dir")]
    pub dir: PathBuf,

    /// How often the directory is checked for changes, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: default_rules_dir(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RulesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("./configs")
}

fn default_poll_interval() -> u64 {
    1000
}

/// Replica count configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicasConfig {
    /// Number of replicas sharing each limit. 0 leaves limits undivided.
    #[serde(default)]
    pub count: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ShardlimitConfig {
    /// Load layered configuration: defaults, then the optional file, then
    /// `SHARDLIMIT__*` environment variables.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize::<ShardlimitConfig>()?)
    }
}

//! Configuration file loading and CLI precedence

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use catscope_adb::{DEFAULT_COMMAND_TIMEOUT, LogcatRequest, RetryPolicy, parse_tag_filters};
use catscope_logs::{PipelineConfig, Priority};
use catscope_types::LogBufferSelection;

use crate::Args;

/// Errors from loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Contents of `config.toml`; every field is optional
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub adb_path: Option<PathBuf>,
    pub device: Option<String>,
    pub package: Option<String>,
    /// Source filter pairs, `Tag:P,Other:W`
    pub tags: Option<String>,
    pub min_level: Option<Priority>,
    pub buffer: Option<LogBufferSelection>,
    pub buffer_size: Option<usize>,
    pub pipeline: PipelineToml,
}

/// `[pipeline]` section
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    pub queue_capacity: Option<usize>,
    pub drain_interval_ms: Option<u64>,
    pub drain_batch: Option<usize>,
    pub stop_timeout_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub pid_retry_attempts: Option<u32>,
    pub pid_retry_delay_ms: Option<u64>,
}

/// `$XDG_CONFIG_HOME/catscope/config.toml`, or the platform equivalent
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("catscope").join("config.toml"))
}

impl FileConfig {
    /// Load from an explicit path; the file must exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Load `explicit` if given, else the default path when it exists
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Fully resolved settings: CLI over file over defaults
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub adb_path: PathBuf,
    /// Logcat request without the PID, which is resolved at connect time
    pub request: LogcatRequest,
    pub package: Option<String>,
    pub min_priority: Priority,
    pub command_timeout: Duration,
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();
        let retry = RetryPolicy::default();
        let p = file.pipeline;

        let tags = args.tags.as_deref().or(file.tags.as_deref());
        let request = LogcatRequest {
            device: args.device.clone().or(file.device),
            buffer: args.buffer.or(file.buffer),
            pid: None,
            tag_filters: tags.map(parse_tag_filters).unwrap_or_default(),
        };

        let pipeline = PipelineConfig {
            buffer_capacity: args
                .buffer_size
                .or(file.buffer_size)
                .unwrap_or(defaults.buffer_capacity),
            queue_capacity: p.queue_capacity.unwrap_or(defaults.queue_capacity),
            drain_interval: p
                .drain_interval_ms
                .map_or(defaults.drain_interval, Duration::from_millis),
            drain_batch: p.drain_batch.unwrap_or(defaults.drain_batch),
            stop_timeout: p
                .stop_timeout_ms
                .map_or(defaults.stop_timeout, Duration::from_millis),
            pid_retry: RetryPolicy {
                attempts: p.pid_retry_attempts.unwrap_or(retry.attempts),
                delay: p
                    .pid_retry_delay_ms
                    .map_or(retry.delay, Duration::from_millis),
            },
        };

        if pipeline.drain_interval.is_zero() {
            return Err(ConfigError::Invalid("drain_interval_ms must be positive".into()));
        }
        if pipeline.drain_batch == 0 {
            return Err(ConfigError::Invalid("drain_batch must be positive".into()));
        }

        Ok(Self {
            adb_path: args
                .adb_path
                .clone()
                .or(file.adb_path)
                .unwrap_or_else(|| PathBuf::from("adb")),
            request,
            package: args.package.clone().or(file.package),
            min_priority: args.min_level.or(file.min_level).unwrap_or_default(),
            command_timeout: p
                .command_timeout_ms
                .map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_millis),
            pipeline,
        })
    }
}

//! Filler Configuration
//!
//! ## FillerConfig
//!
//! Controls how the realtime filler buffers samples and hands segments to the
//! archive:
//!
//! - **enabled**: Whether the filler accepts batches at all (default: true)
//! - **processor_name**: Upstream processor the filler is attached to (default: "realtime")
//! - **sorting_threshold_ms**: Out-of-order tolerance (default: 1000 ms)
//! - **num_threads**: Concurrent archive writes (default: cores - 1, at least 1)
//! - **past_jump_threshold_secs**: Backward jump that flushes a queue (default: 86400 s)
//! - **max_segment_size**: Samples per segment before a new one is opened (default: 5000)
//! - **write_retries**: Archive write attempts with exponential backoff (default: 3)
//! - **retry_backoff_ms**: Base of the backoff, doubled per attempt (default: 100 ms)
//! - **failure_policy**: What happens to a segment that could not be written (default: release)
//! - **shutdown_timeout_secs**: How long shutdown waits for pending writes (default: 30 s)
//!
//! ## ArchiveConfig
//!
//! Where and how the object store archive keeps segments.
//!
//! ## Usage
//!
//! ```ignore
//! use parchive_storage::{FailurePolicy, FillerConfig};
//!
//! let config = FillerConfig::from_toml_str(r#"
//!     processor_name = "replay"
//!     sorting_threshold_ms = 5000
//!     failure_policy = "retain"
//! "#)?;
//!
//! // Or a whole service file with [filler], [archive] and [registry] tables
//! let config = ParchiveConfig::load("parchive.toml")?;
//! ```
//!
//! Every field can be overridden from the environment with a `PARCHIVE_`
//! prefix, e.g. `PARCHIVE_SORTING_THRESHOLD_MS=2000`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use parchive_core::{Compression, IntervalScheme};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do with a segment whose archive write failed on every attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log, count and clear the slot; the samples are lost
    #[default]
    Release,
    /// Keep the segment in its slot so it stays queryable. The queue loses
    /// that slot for good, which eventually shows up as saturation.
    Retain,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "release" => Ok(FailurePolicy::Release),
            "retain" => Ok(FailurePolicy::Retain),
            other => Err(Error::Config(format!("unknown failure policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_processor_name")]
    pub processor_name: String,

    /// Samples older than the queue start by more than this are dropped
    #[serde(default = "default_sorting_threshold_ms")]
    pub sorting_threshold_ms: i64,

    /// Concurrent archive writes; `None` means cores - 1
    #[serde(default)]
    pub num_threads: Option<usize>,

    /// A sample this far behind the queue start flushes the whole queue
    #[serde(default = "default_past_jump_threshold_secs")]
    pub past_jump_threshold_secs: i64,

    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,

    #[serde(default = "default_retries")]
    pub write_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            processor_name: default_processor_name(),
            sorting_threshold_ms: default_sorting_threshold_ms(),
            num_threads: None,
            past_jump_threshold_secs: default_past_jump_threshold_secs(),
            max_segment_size: default_max_segment_size(),
            write_retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            failure_policy: FailurePolicy::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl FillerConfig {
    /// Parse a TOML document holding filler fields, then apply `PARCHIVE_*` overrides
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: FillerConfig = toml::from_str(contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load filler fields from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Backward jump threshold in milliseconds
    pub fn past_jump_threshold_ms(&self) -> i64 {
        self.past_jump_threshold_secs.saturating_mul(1000)
    }

    /// Number of concurrent archive writes
    pub fn worker_count(&self) -> usize {
        match self.num_threads {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(2_u64.saturating_pow(attempt)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sorting_threshold_ms < 0 {
            return Err(Error::Config("sorting_threshold_ms must not be negative".into()));
        }
        if self.past_jump_threshold_ms() < self.sorting_threshold_ms {
            return Err(Error::Config(
                "past_jump_threshold_secs must cover sorting_threshold_ms".into(),
            ));
        }
        if self.max_segment_size == 0 {
            return Err(Error::Config("max_segment_size must be positive".into()));
        }
        if self.write_retries == 0 {
            return Err(Error::Config("write_retries must be at least 1".into()));
        }
        Ok(())
    }

    /// Override fields from `PARCHIVE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<bool>("PARCHIVE_ENABLED")? {
            self.enabled = v;
        }
        if let Ok(v) = std::env::var("PARCHIVE_PROCESSOR_NAME") {
            self.processor_name = v;
        }
        if let Some(v) = env_parse("PARCHIVE_SORTING_THRESHOLD_MS")? {
            self.sorting_threshold_ms = v;
        }
        if let Some(v) = env_parse("PARCHIVE_NUM_THREADS")? {
            self.num_threads = Some(v);
        }
        if let Some(v) = env_parse("PARCHIVE_PAST_JUMP_THRESHOLD_SECS")? {
            self.past_jump_threshold_secs = v;
        }
        if let Some(v) = env_parse("PARCHIVE_MAX_SEGMENT_SIZE")? {
            self.max_segment_size = v;
        }
        if let Some(v) = env_parse("PARCHIVE_WRITE_RETRIES")? {
            self.write_retries = v;
        }
        if let Some(v) = env_parse("PARCHIVE_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = env_parse("PARCHIVE_FAILURE_POLICY")? {
            self.failure_policy = v;
        }
        if let Some(v) = env_parse("PARCHIVE_SHUTDOWN_TIMEOUT_SECS")? {
            self.shutdown_timeout_secs = v;
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn default_enabled() -> bool {
    true
}

fn default_processor_name() -> String {
    "realtime".to_string()
}

fn default_sorting_threshold_ms() -> i64 {
    1000
}

fn default_past_jump_threshold_secs() -> i64 {
    86_400 // one day
}

fn default_max_segment_size() -> usize {
    5000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

/// Object store archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Key prefix for every segment object
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Local directory to store segments in; `None` keeps them in memory
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_compression")]
    pub compression: Compression,

    #[serde(default)]
    pub intervals: IntervalScheme,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            root: None,
            compression: default_compression(),
            intervals: IntervalScheme::default(),
        }
    }
}

fn default_prefix() -> String {
    "parchive".to_string()
}

fn default_compression() -> Compression {
    Compression::Lz4
}

/// Group registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// SQLite database file; `None` uses an in-memory database
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    10_000
}

/// Whole service configuration, one table per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParchiveConfig {
    #[serde(default)]
    pub filler: FillerConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Address of the `/metrics` endpoint; `None` disables it
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl ParchiveConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: ParchiveConfig = toml::from_str(contents)?;
        config.filler.apply_env_overrides()?;
        if let Ok(addr) = std::env::var("PARCHIVE_METRICS_ADDR") {
            config.metrics_addr = Some(addr);
        }
        config.filler.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

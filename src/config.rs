//! Configuration types for evidence-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (chunking, parallelism, budgets)
///
/// Governs how a single remote file is acquired by the
/// [`Downloader`](crate::download::Downloader). Used as a nested sub-config
/// within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Concurrent range fetchers per download task (default: 5)
    #[serde(default = "default_chunk_workers")]
    pub chunk_workers: usize,

    /// Size of each range request in the unknown-size strategy (default: 1 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Wall-clock budget for the unknown-size strategy (default: 120 seconds)
    ///
    /// When exceeded, in-flight range requests are abandoned and the attempt
    /// fails with a timeout.
    #[serde(default = "default_max_wall_clock", with = "duration_serde")]
    pub max_wall_clock: Duration,

    /// Skip range probing and always use a single streamed GET (default: false)
    #[serde(default)]
    pub force_single_stream: bool,

    /// Upper bound on concurrent network operations across every download
    /// task and every record worker (default: 20)
    ///
    /// Record workers multiply with per-task fetchers, so this cap is what keeps
    /// the fan-out bounded.
    #[serde(default = "default_max_network_concurrency")]
    pub max_network_concurrency: usize,

    /// Buffer size for streamed writes to disk (default: 64 KiB)
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    /// Verify free disk space before pre-sizing a multi-part destination (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_workers: default_chunk_workers(),
            chunk_size: default_chunk_size(),
            max_wall_clock: default_max_wall_clock(),
            force_single_stream: false,
            max_network_concurrency: default_max_network_concurrency(),
            stream_buffer_size: default_stream_buffer_size(),
            check_disk_space: true,
        }
    }
}

/// Record worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of concurrent record workers (default: 10)
    #[serde(default = "default_record_workers")]
    pub record_workers: usize,

    /// Shared output directory holding committed artifacts (default: "./data")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Root under which per-record staging areas are created (default: "./temp")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Capacity of the channel feeding records to workers (default: 64)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            record_workers: default_record_workers(),
            output_dir: default_output_dir(),
            staging_dir: default_staging_dir(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// HTTP client settings shared by every request the crate issues
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 5 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Per-reference processing limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Maximum number of references per turn that receive a summary (default: 10)
    ///
    /// References past this limit are kept with an empty summary.
    #[serde(default = "default_max_summaries")]
    pub max_summaries: usize,

    /// Total timeout for fetching a non-PDF page (default: 25 seconds)
    #[serde(default = "default_page_timeout", with = "duration_serde")]
    pub page_timeout: Duration,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            max_summaries: default_max_summaries(),
            page_timeout: default_page_timeout(),
        }
    }
}

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - chunking, parallelism, wall-clock budget
/// - [`orchestrator`](OrchestratorConfig) - record workers and directories
/// - [`http`](HttpConfig) - client settings
/// - [`references`](ReferenceConfig) - per-reference limits
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Record worker pool
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// HTTP client
    #[serde(default)]
    pub http: HttpConfig,

    /// Reference processing
    #[serde(default)]
    pub references: ReferenceConfig,
}

impl DownloadConfig {
    /// Reject download settings that would stall or overflow range arithmetic.
    pub fn validate(&self) -> Result<()> {
        reject_first(&[
            (
                self.chunk_workers == 0,
                "download.chunk_workers",
                "chunk_workers must be at least 1",
            ),
            (
                self.chunk_size == 0,
                "download.chunk_size",
                "chunk_size must be greater than zero",
            ),
            (
                self.max_wall_clock.is_zero(),
                "download.max_wall_clock",
                "max_wall_clock must be greater than zero",
            ),
            (
                self.max_network_concurrency == 0,
                "download.max_network_concurrency",
                "max_network_concurrency must be at least 1",
            ),
        ])
    }
}

impl Config {
    /// Reject settings that would stall or divide by zero at runtime.
    pub fn validate(&self) -> Result<()> {
        self.download.validate()?;
        reject_first(&[
            (
                self.orchestrator.record_workers == 0,
                "orchestrator.record_workers",
                "record_workers must be at least 1",
            ),
            (
                self.orchestrator.output_dir == self.orchestrator.staging_dir,
                "orchestrator.staging_dir",
                "staging_dir must differ from output_dir",
            ),
        ])
    }

    /// Load a configuration from a JSON document, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn reject_first(checks: &[(bool, &str, &str)]) -> Result<()> {
    match checks.iter().find(|(failed, _, _)| *failed) {
        Some((_, key, message)) => Err(Error::Config {
            message: message.to_string(),
            key: Some(key.to_string()),
        }),
        None => Ok(()),
    }
}

fn default_chunk_workers() -> usize {
    5
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_max_wall_clock() -> Duration {
    Duration::from_secs(120)
}

fn default_max_network_concurrency() -> usize {
    20
}

fn default_stream_buffer_size() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

fn default_record_workers() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_queue_capacity() -> usize {
    64
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_user_agent() -> String {
    format!("evidence-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_summaries() -> usize {
    10
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(25)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

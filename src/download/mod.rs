//! Adaptive file downloader -- probe, pick a strategy, fall back deterministically.
//!
//! Split into focused submodules:
//! - [`probe`] - Range capability and size discovery
//! - [`chunk`] - Single range fetches with positioned writes
//! - [`multipart`] - Known-size concurrent parts
//! - [`unknown_size`] - Waves of fixed-size ranges until end-of-resource
//! - [`single_stream`] - Sequential streamed GET
//!
//! [`Downloader::download`] runs the strategies in a fixed order and never
//! attempts one twice:
//!
//! | Probe result | Attempts |
//! |---|---|
//! | size known, ranges supported | multi-part, unknown-size, single-stream |
//! | size unknown, ranges not known unsupported | unknown-size, single-stream |
//! | ranges unsupported (or forced) | single-stream |
//!
//! A local I/O failure ends the task immediately.

pub mod chunk;
mod multipart;
pub mod probe;
mod single_stream;
mod unknown_size;


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};

use crate::config::{Config, DownloadConfig, HttpConfig};
use crate::error::{DownloadError, Result};
use crate::types::Event;

pub use chunk::{ChunkOutcome, ChunkResult, ChunkSpec, partition};
pub use probe::{ProbeResult, RangeSupport};

use chunk::FetchContext;

/// A download strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Known size, concurrent parts
    MultiPart,
    /// Unknown size, waves of fixed-size ranges
    UnknownSize,
    /// One sequential streamed GET
    SingleStream,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::MultiPart => "multi-part",
            Strategy::UnknownSize => "unknown-size",
            Strategy::SingleStream => "single-stream",
        })
    }
}

/// One file fetch, fixed once the probe has resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Source URL
    pub url: String,
    /// Where the file is written
    pub destination: PathBuf,
    /// Probed size, if known
    pub total_size: Option<u64>,
    /// Whether the probe saw a `206` answer
    pub supports_ranges: bool,
    /// Wall-clock budget of the unknown-size strategy
    pub max_wall_clock: Duration,
}

impl DownloadTask {
    fn new(url: &str, destination: &Path, probe: &ProbeResult, max_wall_clock: Duration) -> Self {
        Self {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            total_size: probe.size(),
            supports_ranges: probe.ranges_supported(),
            max_wall_clock,
        }
    }
}

/// Terminal result of a download
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file at the path is complete
    Success(PathBuf),
    /// Every applicable strategy failed; any file left behind is not valid content
    Failed(DownloadError),
    /// The stream ended cleanly before the declared length; the file is truncated
    PartialButUsable(PathBuf),
}

impl DownloadOutcome {
    /// Path of a complete file, if the download succeeded.
    pub fn success_path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Success(path) => Some(path),
            _ => None,
        }
    }
}

/// One strategy attempt and how it ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyAttempt {
    /// Strategy tried
    pub strategy: Strategy,
    /// Failure, or `None` if the attempt produced the outcome
    pub error: Option<DownloadError>,
}

/// Outcome of [`Downloader::download`] together with how it was reached
#[derive(Clone, Debug)]
pub struct DownloadReport {
    /// Terminal outcome
    pub outcome: DownloadOutcome,
    /// What the probe found
    pub probe: ProbeResult,
    /// Attempts in the order they ran
    pub attempts: Vec<StrategyAttempt>,
}

impl DownloadReport {
    /// Strategies in the order they were tried.
    pub fn strategies(&self) -> Vec<Strategy> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }
}

/// Fallback order for a probe result.
pub fn plan_strategies(probe: &ProbeResult, force_single_stream: bool) -> Vec<Strategy> {
    if force_single_stream || probe.ranges == RangeSupport::Unsupported {
        return vec![Strategy::SingleStream];
    }
    if probe.size_known {
        vec![
            Strategy::MultiPart,
            Strategy::UnknownSize,
            Strategy::SingleStream,
        ]
    } else {
        vec![Strategy::UnknownSize, Strategy::SingleStream]
    }
}

/// Adaptive downloader (the strategy selector)
///
/// Cheap to clone: clones share the HTTP client, the network permit pool and
/// the event channel. One instance is shared by every record worker so
/// [`DownloadConfig::max_network_concurrency`] bounds the whole process.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    config: Arc<DownloadConfig>,
    permits: Arc<Semaphore>,
    event_tx: broadcast::Sender<Event>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

/// Build the HTTP client every request of the crate goes through.
pub fn build_client(http: &HttpConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(http.connect_timeout)
        .user_agent(http.user_agent.as_str())
        .build()?)
}

impl Downloader {
    /// Create a downloader with its own event channel.
    ///
    /// Fails with [`Error::Config`](crate::Error::Config) when the download settings are unusable.
    pub fn new(config: &Config) -> Result<Self> {
        config.download.validate()?;
        let client = build_client(&config.http)?;
        // Channel for broadcasting events to multiple subscribers
        // Buffer size of 1000 events - if subscribers are slow, old events are dropped
        let (event_tx, _rx) = broadcast::channel(1000);
        Ok(Self::with_client(client, config.download.clone(), event_tx))
    }

    /// Create a downloader around an existing client and event channel.
    pub fn with_client(
        client: reqwest::Client,
        config: DownloadConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_network_concurrency.max(1)));
        Self {
            client,
            config: Arc::new(config),
            permits,
            event_tx,
        }
    }

    /// Subscribe to download events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Download settings in effect.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Network operations currently allowed to start.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Reserve one slot of the process-wide network concurrency cap.
    pub(crate) async fn network_permit(
        &self,
        url: &str,
    ) -> std::result::Result<OwnedSemaphorePermit, DownloadError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Transport {
                url: url.to_string(),
                reason: "network permits closed".to_string(),
            })
    }

    fn emit(&self, event: Event) {
        // No subscribers is not an error
        self.event_tx.send(event).ok();
    }

    fn fetch_context(&self, task: &DownloadTask, file: std::fs::File) -> FetchContext {
        FetchContext {
            client: self.client.clone(),
            url: task.url.clone(),
            file: Arc::new(file),
            path: task.destination.clone(),
            permits: Arc::clone(&self.permits),
            buffer_size: self.config.stream_buffer_size.max(1),
            writes: Arc::default(),
        }
    }

    /// Probe `url`.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        probe::probe(&self.client, &self.permits, url).await
    }

    /// Fetch `url` into `destination`, falling back across strategies.
    ///
    /// Never returns an error: failures are reported as
    /// [`DownloadOutcome::Failed`] with the cause of the last attempt.
    pub async fn download(&self, url: &str, destination: &Path) -> DownloadReport {
        let probe = if self.config.force_single_stream {
            ProbeResult::unknown()
        } else {
            self.probe(url).await
        };
        let task = DownloadTask::new(url, destination, &probe, self.config.max_wall_clock);
        let plan = plan_strategies(&probe, self.config.force_single_stream);

        tracing::info!(
            url = %url,
            size = ?task.total_size,
            ranges = ?probe.ranges,
            plan = ?plan,
            "starting download"
        );

        let mut attempts: Vec<StrategyAttempt> = Vec::with_capacity(plan.len());
        for strategy in plan {
            self.emit(Event::DownloadStarted {
                url: task.url.clone(),
                strategy,
            });

            match self.attempt(strategy, &task).await {
                Ok((outcome, bytes)) => {
                    attempts.push(StrategyAttempt {
                        strategy,
                        error: None,
                    });
                    tracing::info!(url = %url, strategy = %strategy, bytes, "download complete");
                    self.emit(Event::DownloadComplete {
                        url: task.url.clone(),
                        strategy,
                        bytes,
                    });
                    return DownloadReport {
                        outcome,
                        probe,
                        attempts,
                    };
                }
                Err(e) => {
                    tracing::warn!(url = %url, strategy = %strategy, error = %e, "download strategy failed");
                    self.emit(Event::StrategyFailed {
                        url: task.url.clone(),
                        strategy,
                        error: e.to_string(),
                    });
                    let fatal = e.is_fatal();
                    attempts.push(StrategyAttempt {
                        strategy,
                        error: Some(e),
                    });
                    if fatal {
                        break;
                    }
                }
            }
        }

        let error = match attempts.last().and_then(|a| a.error.clone()) {
            Some(last) if last.is_fatal() => last,
            Some(last) => DownloadError::Exhausted {
                attempts: attempts.len(),
                last: Box::new(last),
            },
            None => DownloadError::Exhausted {
                attempts: 0,
                last: Box::new(DownloadError::Transport {
                    url: url.to_string(),
                    reason: "no applicable strategy".to_string(),
                }),
            },
        };
        tracing::warn!(url = %url, error = %error, "download failed");
        self.emit(Event::DownloadFailed {
            url: task.url.clone(),
            error: error.to_string(),
        });

        DownloadReport {
            outcome: DownloadOutcome::Failed(error),
            probe,
            attempts,
        }
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        task: &DownloadTask,
    ) -> std::result::Result<(DownloadOutcome, u64), DownloadError> {
        let path = task.destination.clone();
        match strategy {
            Strategy::MultiPart => {
                let bytes = multipart::run(self, task).await?;
                Ok((DownloadOutcome::Success(path), bytes))
            }
            Strategy::UnknownSize => {
                let summary = unknown_size::run(self, task).await?;
                Ok((DownloadOutcome::Success(path), summary.bytes))
            }
            Strategy::SingleStream => {
                let summary = single_stream::run(self, task).await?;
                if summary.is_truncated() {
                    tracing::warn!(
                        url = %task.url,
                        bytes = summary.bytes,
                        declared = ?summary.declared,
                        "stream ended before declared length"
                    );
                    Ok((DownloadOutcome::PartialButUsable(path), summary.bytes))
                } else {
                    Ok((DownloadOutcome::Success(path), summary.bytes))
                }
            }
        }
    }
}

//! Record worker pool -- claims records, runs the pipeline in staging, commits.
//!
//! Split into focused submodules:
//! - [`worker`] - Worker loop and per-record processing
//!
//! A run feeds records through a bounded channel to `record_workers` tasks.
//! Each record is handled by exactly one worker in its own staging area;
//! failures are counted and logged, never propagated to sibling workers.

mod worker;


use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, OrchestratorConfig};
use crate::download::{Downloader, build_client};
use crate::error::Result;
use crate::pipeline::{Pipeline, PipelineServices};
use crate::staging::StagingCommitter;
use crate::types::{Event, Record, RecordId, RecordStatus};

/// Final counts of one orchestrator run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Records whose artifacts were committed
    pub committed: u64,
    /// Records already committed by an earlier run
    pub skipped: u64,
    /// Records that failed (staging left in place)
    pub failed: u64,
}

impl BatchSummary {
    /// Records handled in total.
    pub fn total(&self) -> u64 {
        self.committed + self.skipped + self.failed
    }
}

/// Lock-free counters shared by the workers of one run
#[derive(Debug, Default)]
pub struct BatchStats {
    committed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl BatchStats {
    /// Count a record that reached a terminal status.
    pub fn record(&self, status: RecordStatus) {
        let counter = match status {
            RecordStatus::Committed => &self.committed,
            RecordStatus::Skipped => &self.skipped,
            RecordStatus::Failed => &self.failed,
            RecordStatus::Pending | RecordStatus::InFlight => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counts.
    pub fn snapshot(&self) -> BatchSummary {
        BatchSummary {
            committed: self.committed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Bounded pool of record workers
///
/// Cheap to clone: clones share the pipeline, the shutdown token and the
/// event channel.
#[derive(Clone, Debug)]
pub struct RecordOrchestrator {
    pipeline: Pipeline,
    committer: StagingCommitter,
    config: Arc<OrchestratorConfig>,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    /// Ids currently owned by a worker; a second claim of the same id is skipped
    in_flight: Arc<std::sync::Mutex<HashSet<RecordId>>>,
}

impl RecordOrchestrator {
    /// Build an orchestrator, its downloader and HTTP client from `config`.
    pub fn new(config: &Config, services: PipelineServices) -> Result<Self> {
        config.validate()?;

        // Channel for broadcasting events to multiple subscribers
        // Buffer size of 1000 events - if subscribers are slow, old events are dropped
        let (event_tx, _rx) = broadcast::channel(1000);
        let client = build_client(&config.http)?;
        let downloader = Downloader::with_client(client, config.download.clone(), event_tx.clone());
        let pipeline = Pipeline::new(services, downloader, config.references.clone());

        Ok(Self::with_pipeline(
            config.orchestrator.clone(),
            pipeline,
            event_tx,
        ))
    }

    /// Build an orchestrator around an existing pipeline.
    pub fn with_pipeline(
        config: OrchestratorConfig,
        pipeline: Pipeline,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            committer: StagingCommitter::new(&config.output_dir),
            pipeline,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            event_tx,
            in_flight: Arc::default(),
        }
    }

    /// Subscribe to record and download events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops workers from claiming further records when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop claiming new records; in-flight records run to completion.
    pub fn shutdown(&self) {
        tracing::info!("orchestrator shutdown requested");
        self.shutdown.cancel();
    }

    /// The shared output directory.
    pub fn output_dir(&self) -> &Path {
        self.committer.output_dir()
    }

    fn emit(&self, event: Event) {
        // No subscribers is not an error
        self.event_tx.send(event).ok();
    }

    /// Process `records` with `record_workers` concurrent workers.
    ///
    /// Completion order is not input order. Returns once every claimed record
    /// has reached a terminal status, or earlier records were left unclaimed
    /// because of a shutdown.
    pub async fn run<I>(&self, records: I) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = Record>,
    {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;

        let (tx, rx) = mpsc::channel::<Record>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(BatchStats::default());

        let worker_count = self.config.record_workers.max(1);
        let workers: Vec<_> = (0..worker_count)
            .map(|worker_id| self.spawn_worker(worker_id, Arc::clone(&rx), Arc::clone(&stats)))
            .collect();
        tracing::info!(workers = worker_count, "record workers started");

        for record in records {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown in progress, not queueing further records");
                    break;
                }
                sent = tx.send(record) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "record worker panicked");
            }
        }

        let summary = stats.snapshot();
        tracing::info!(
            committed = summary.committed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
        self.emit(Event::BatchComplete { summary });
        Ok(summary)
    }

    /// Read a JSON-lines file of records and process it.
    pub async fn run_file(&self, path: &Path) -> Result<BatchSummary> {
        let records = crate::source::read_records(path).await?;
        self.run(records).await
    }
}

//! # evidence-dl
//!
//! Batch enrichment of conversation records with web evidence, backed by an
//! adaptive HTTP downloader.
//!
//! ## Design Philosophy
//!
//! evidence-dl is designed to be:
//! - **Crash-safe** - Each record is built in its own staging area and committed
//!   to the shared output directory only when complete
//! - **Idempotent** - Records already in the output are skipped on re-runs
//! - **Adaptive** - Downloads fall back from parallel ranges to a single stream
//! - **Library-first** - External services are traits supplied by the embedder
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use evidence_dl::{Config, PipelineServices, RecordOrchestrator};
//!
//! # async fn services() -> PipelineServices { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let orchestrator = RecordOrchestrator::new(&config, services().await)?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = orchestrator.run_file(Path::new("records.jsonl")).await?;
//!     println!("committed {} records", summary.committed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Adaptive file downloader (range probing, chunked and streamed strategies)
pub mod download;
/// Error types
pub mod error;
/// Record worker pool
pub mod orchestrator;
/// Per-record enrichment pipeline and its external service traits
pub mod pipeline;
/// Cleanup of committed records
pub mod prune;
/// JSON-lines record input
pub mod source;
/// Per-record staging areas and the commit into the output directory
pub mod staging;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, OrchestratorConfig, ReferenceConfig};
pub use download::{DownloadOutcome, DownloadReport, Downloader, ProbeResult, Strategy};
pub use error::{
    CommitError, DownloadError, Error, FailureClass, PipelineError, Result, ServiceError,
};
pub use orchestrator::{BatchSummary, RecordOrchestrator};
pub use pipeline::{
    ContentExtractor, KeywordContext, KeywordDeriver, Pipeline, PipelineServices, SearchEngine,
    Summarizer,
};
pub use prune::{PruneSummary, prune_output};
pub use staging::{ReconcileSummary, StagingCommitter, reconcile_staging};
pub use types::{Event, Language, Record, RecordId, RecordStatus, Reference, SearchHit};

/// Helper function to run a batch with graceful signal handling.
///
/// Processes `records` while listening for a termination signal. On a signal
/// the orchestrator stops claiming records; in-flight records are finished
/// and committed before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use evidence_dl::{Config, PipelineServices, RecordOrchestrator, run_with_shutdown, source};
///
/// # async fn services() -> PipelineServices { unimplemented!() }
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let orchestrator = RecordOrchestrator::new(&config, services().await)?;
///     let records = source::read_records("records.jsonl".as_ref()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(orchestrator, records).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown<I>(
    orchestrator: RecordOrchestrator,
    records: I,
) -> Result<BatchSummary>
where
    I: IntoIterator<Item = types::Record>,
{
    let token = orchestrator.shutdown_token();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });

    let result = orchestrator.run(records).await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received, draining record workers"),
                _ = sigint.recv() => tracing::info!("SIGINT received, draining record workers"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "could not register every signal handler");
            only.recv().await;
            tracing::info!("termination signal received, draining record workers");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "no signal handlers registered, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        // Never cancel the batch because the listener could not be installed
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl+C received, draining record workers");
}

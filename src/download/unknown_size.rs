//! Unknown-size strategy: serialized waves of fixed-size ranges until the resource ends.

use futures::future::join_all;

use super::chunk::{ChunkOutcome, ChunkResult, ChunkSpec, FetchContext, fetch_chunk};
use super::{DownloadTask, Downloader};
use crate::error::DownloadError;

/// Bytes and waves of a finished unknown-size download
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct WaveSummary {
    pub(super) bytes: u64,
    pub(super) waves: usize,
}

/// How a resolved wave steers the loop
#[derive(Debug, PartialEq, Eq)]
pub(super) enum WaveVerdict {
    /// Every range was served in full; issue the next wave
    Continue(u64),
    /// The server signalled end-of-resource with a 416 or a short tail range
    End(u64),
}

/// Download `task` in waves, bounded by the task's wall-clock budget.
///
/// On timeout the in-flight fetchers are dropped, which closes their
/// connections. Writes they already handed to blocking threads are awaited
/// before returning, so the next strategy owns the destination alone.
pub(super) async fn run(
    downloader: &Downloader,
    task: &DownloadTask,
) -> Result<WaveSummary, DownloadError> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&task.destination)
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;
    let ctx = downloader.fetch_context(task, file);

    match tokio::time::timeout(task.max_wall_clock, waves(downloader, task, &ctx)).await {
        Ok(result) => result,
        Err(_) => {
            ctx.settle().await;
            tracing::warn!(
                url = %task.url,
                budget = ?task.max_wall_clock,
                "unknown-size download exceeded wall-clock budget"
            );
            Err(DownloadError::Timeout {
                budget: task.max_wall_clock,
            })
        }
    }
}

async fn waves(
    downloader: &Downloader,
    task: &DownloadTask,
    ctx: &FetchContext,
) -> Result<WaveSummary, DownloadError> {
    let chunk_size = downloader.config.chunk_size.max(1);
    let workers = downloader.config.chunk_workers;
    let mut offset = 0;
    let mut bytes = 0;
    let mut waves = 0;

    loop {
        let specs = wave_specs(offset, chunk_size, workers);
        offset += chunk_size * specs.len() as u64;
        waves += 1;

        let results = join_all(specs.iter().map(|spec| fetch_chunk(ctx, *spec))).await;
        match evaluate(&results)? {
            WaveVerdict::Continue(written) => {
                bytes += written;
                tracing::debug!(url = %task.url, wave = waves, bytes, "wave complete");
            }
            WaveVerdict::End(written) => {
                bytes += written;
                tracing::debug!(url = %task.url, waves, bytes, "end of resource");
                return Ok(WaveSummary { bytes, waves });
            }
        }
    }
}

/// The next `workers` contiguous specs of `chunk_size` bytes starting at `offset`.
///
/// A zero `chunk_size` is treated as one byte.
pub(super) fn wave_specs(offset: u64, chunk_size: u64, workers: usize) -> Vec<ChunkSpec> {
    let chunk_size = chunk_size.max(1);
    (0..workers.max(1) as u64)
        .map(|i| {
            let start = offset + i * chunk_size;
            ChunkSpec::new(start, start + chunk_size - 1)
        })
        .collect()
}

/// Any failure fails the attempt. A 416 or a range served short ends the download.
pub(super) fn evaluate(results: &[ChunkResult]) -> Result<WaveVerdict, DownloadError> {
    if let Some(failed) = results.iter().find_map(|r| match &r.outcome {
        ChunkOutcome::Failed(e) => Some((r.spec, e)),
        _ => None,
    }) {
        let (spec, cause) = failed;
        return Err(DownloadError::ChunkFailed {
            start: spec.start,
            end: spec.end,
            cause: Box::new(cause.clone()),
        });
    }

    let written = results.iter().map(|r| r.bytes_written).sum();
    if results
        .iter()
        .any(|r| r.outcome == ChunkOutcome::RangeNotSatisfiable || r.is_tail())
    {
        Ok(WaveVerdict::End(written))
    } else {
        Ok(WaveVerdict::Continue(written))
    }
}

//! Known-size strategy: pre-size the destination, fetch every part concurrently, join.

use futures::future::join_all;

use super::chunk::{ChunkOutcome, ChunkResult, fetch_chunk, partition};
use super::{DownloadTask, Downloader};
use crate::error::DownloadError;
use crate::utils::get_available_space;

/// Download `task` as `chunk_workers` concurrent ranges.
///
/// Returns the number of bytes written. The attempt succeeds only if every part
/// was written in full; a single failed part fails the whole attempt.
pub(super) async fn run(downloader: &Downloader, task: &DownloadTask) -> Result<u64, DownloadError> {
    let total_size = task.total_size.ok_or_else(|| DownloadError::BadContentRange {
        start: 0,
        end: 0,
        reason: "multi-part download requires a known size".to_string(),
    })?;

    if downloader.config.check_disk_space {
        check_disk_space(task, total_size)?;
    }

    // Truncate first so a longer file from an earlier attempt cannot survive
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&task.destination)
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;
    file.set_len(total_size)
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;

    let specs = partition(total_size, downloader.config.chunk_workers);
    tracing::debug!(
        url = %task.url,
        total_size,
        parts = specs.len(),
        "starting multi-part download"
    );

    let ctx = downloader.fetch_context(task, file);
    let results = join_all(specs.iter().map(|spec| fetch_chunk(&ctx, *spec))).await;

    aggregate(&results)
}

/// Every part must be complete and full; otherwise report the first bad part.
pub(super) fn aggregate(results: &[ChunkResult]) -> Result<u64, DownloadError> {
    let mut written = 0;
    for result in results {
        if result.is_full() {
            written += result.bytes_written;
            continue;
        }
        let cause = match &result.outcome {
            ChunkOutcome::Failed(e) => e.clone(),
            ChunkOutcome::RangeNotSatisfiable => DownloadError::BadContentRange {
                start: result.spec.start,
                end: result.spec.end,
                reason: "range not satisfiable within the probed size".to_string(),
            },
            ChunkOutcome::Complete => DownloadError::ShortRead {
                start: result.spec.start,
                expected: result.spec.len(),
                received: result.bytes_written,
            },
        };
        return Err(DownloadError::ChunkFailed {
            start: result.spec.start,
            end: result.spec.end,
            cause: Box::new(cause),
        });
    }
    Ok(written)
}

fn check_disk_space(task: &DownloadTask, required: u64) -> Result<(), DownloadError> {
    let dir = match task.destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => std::path::Path::new("."),
    };
    match get_available_space(dir) {
        Ok(available) if available < required => {
            Err(DownloadError::InsufficientSpace { required, available })
        }
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "could not query free disk space");
            Ok(())
        }
    }
}

//! Single byte-range fetches written into a shared destination file by positioned writes.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::sync::{RwLock, Semaphore};

use crate::error::DownloadError;
use crate::utils::write_all_at;

/// One contiguous byte range scheduled for a single fetch (`end` inclusive)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSpec {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ChunkSpec {
    /// Create a spec covering `start..=end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "chunk start {start} past end {end}");
        Self { start, end }
    }

    /// Number of bytes covered.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` header value requesting this spec.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// How a single chunk fetch ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Every byte the server declared for the range was written
    Complete,
    /// Server answered 416: the range starts past the end of the resource
    RangeNotSatisfiable,
    /// Transport error, unusable status, or short read
    Failed(DownloadError),
}

/// Result of one chunk fetch; never mutated after creation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkResult {
    /// The requested range
    pub spec: ChunkSpec,
    /// Bytes written to the destination at `spec.start`
    pub bytes_written: u64,
    /// Outcome
    pub outcome: ChunkOutcome,
}

impl ChunkResult {
    fn failed(spec: ChunkSpec, bytes_written: u64, error: DownloadError) -> Self {
        Self {
            spec,
            bytes_written,
            outcome: ChunkOutcome::Failed(error),
        }
    }

    /// Whether the whole requested range was written.
    pub fn is_full(&self) -> bool {
        self.outcome == ChunkOutcome::Complete && self.bytes_written == self.spec.len()
    }

    /// Whether the server served fewer bytes than requested because the resource ends.
    pub fn is_tail(&self) -> bool {
        self.outcome == ChunkOutcome::Complete && self.bytes_written < self.spec.len()
    }
}

/// Split `[0, total_size)` into `workers` nearly equal contiguous specs.
///
/// Every part gets `total_size / workers` bytes and the last part absorbs the
/// remainder. The worker count is clamped to `[1, total_size]` so no spec is
/// empty; a zero-byte resource yields no specs.
pub fn partition(total_size: u64, workers: usize) -> Vec<ChunkSpec> {
    if total_size == 0 {
        return Vec::new();
    }
    let parts = (workers.max(1) as u64).min(total_size);
    let part_size = total_size / parts;

    (0..parts)
        .map(|i| {
            let start = i * part_size;
            let end = if i == parts - 1 {
                total_size - 1
            } else {
                (i + 1) * part_size - 1
            };
            ChunkSpec::new(start, end)
        })
        .collect()
}

/// Parsed `Content-Range` header of a 206 response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub(crate) start: u64,
    pub(crate) end: u64,
    /// `None` when the server sent `/*`
    pub(crate) total: Option<u64>,
}

/// Parse `bytes START-END/TOTAL` or `bytes START-END/*`.
pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, end, total })
}

/// Parse the `bytes */TOTAL` form a 416 response may carry.
pub(crate) fn parse_unsatisfied_range(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    rest.strip_prefix("*/")?.trim().parse().ok()
}

/// Everything the fetchers of one download task share.
pub(crate) struct FetchContext {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) file: Arc<std::fs::File>,
    pub(crate) path: PathBuf,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) buffer_size: usize,
    /// Read-held by every write on a blocking thread
    pub(crate) writes: Arc<RwLock<()>>,
}

impl FetchContext {
    /// Write `data` at `offset` on a blocking thread so async workers keep driving fetches.
    ///
    /// The blocking write keeps running if this future is dropped; it holds a
    /// read guard of `writes` until the bytes are on disk.
    async fn write_at(&self, data: Vec<u8>, offset: u64) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        let guard = Arc::clone(&self.writes).read_owned().await;
        tokio::task::spawn_blocking(move || {
            let result = write_all_at(&file, &data, offset);
            drop(guard);
            result
        })
        .await
        .map_err(|e| DownloadError::LocalIo {
            path: path.clone(),
            reason: format!("write task panicked: {e}"),
        })?
        .map_err(|e| DownloadError::local_io(&path, &e))
    }

    /// Wait until every write already handed to a blocking thread has finished.
    ///
    /// After this returns, abandoned fetchers can no longer touch the destination.
    pub(crate) async fn settle(&self) {
        drop(self.writes.write().await);
    }
}

/// Fetch one range and write it at `spec.start`.
///
/// Only `206 Partial Content` is accepted. The declared `Content-Range` must
/// start at the requested offset and stay within the request; a range ending
/// early marks the tail of the resource. Receiving fewer bytes than declared is
/// a short read.
pub(crate) async fn fetch_chunk(ctx: &FetchContext, spec: ChunkSpec) -> ChunkResult {
    let _permit = match ctx.permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return ChunkResult::failed(
                spec,
                0,
                DownloadError::Transport {
                    url: ctx.url.clone(),
                    reason: "network permits closed".to_string(),
                },
            );
        }
    };

    let response = match ctx
        .client
        .get(&ctx.url)
        .header(RANGE, spec.header_value())
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return ChunkResult::failed(spec, 0, DownloadError::transport(&ctx.url, &e)),
    };

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        tracing::debug!(url = %ctx.url, start = spec.start, "range not satisfiable");
        return ChunkResult {
            spec,
            bytes_written: 0,
            outcome: ChunkOutcome::RangeNotSatisfiable,
        };
    }
    if status == StatusCode::OK {
        return ChunkResult::failed(
            spec,
            0,
            DownloadError::RangesUnsupported {
                url: ctx.url.clone(),
            },
        );
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return ChunkResult::failed(
            spec,
            0,
            DownloadError::UnexpectedStatus {
                url: ctx.url.clone(),
                status: status.as_u16(),
            },
        );
    }

    let declared = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);
    let declared = match declared {
        Some(cr) if cr.start == spec.start && cr.end <= spec.end => cr,
        Some(cr) => {
            return ChunkResult::failed(
                spec,
                0,
                DownloadError::BadContentRange {
                    start: spec.start,
                    end: spec.end,
                    reason: format!("server sent bytes {}-{}", cr.start, cr.end),
                },
            );
        }
        None => {
            return ChunkResult::failed(
                spec,
                0,
                DownloadError::BadContentRange {
                    start: spec.start,
                    end: spec.end,
                    reason: "missing or malformed Content-Range".to_string(),
                },
            );
        }
    };
    let expected = declared.end - declared.start + 1;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(ctx.buffer_size.min(expected as usize));
    let mut received: u64 = 0;
    let mut written: u64 = 0;

    while let Some(item) = stream.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                return ChunkResult::failed(spec, written, DownloadError::transport(&ctx.url, &e));
            }
        };
        received += bytes.len() as u64;
        if received > expected {
            return ChunkResult::failed(
                spec,
                written,
                DownloadError::BadContentRange {
                    start: spec.start,
                    end: spec.end,
                    reason: format!("body exceeds declared {expected} bytes"),
                },
            );
        }
        buffer.extend_from_slice(&bytes);

        if buffer.len() >= ctx.buffer_size {
            let data = std::mem::take(&mut buffer);
            let len = data.len() as u64;
            if let Err(e) = ctx.write_at(data, spec.start + written).await {
                return ChunkResult::failed(spec, written, e);
            }
            written += len;
        }
    }

    if !buffer.is_empty() {
        let len = buffer.len() as u64;
        if let Err(e) = ctx.write_at(buffer, spec.start + written).await {
            return ChunkResult::failed(spec, written, e);
        }
        written += len;
    }

    if received < expected {
        return ChunkResult::failed(
            spec,
            written,
            DownloadError::ShortRead {
                start: spec.start,
                expected,
                received,
            },
        );
    }

    tracing::debug!(
        url = %ctx.url,
        start = spec.start,
        end = spec.end,
        bytes = written,
        "chunk complete"
    );

    ChunkResult {
        spec,
        bytes_written: written,
        outcome: ChunkOutcome::Complete,
    }
}

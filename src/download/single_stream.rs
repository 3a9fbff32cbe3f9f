//! Sequential fallback: one streamed GET written straight to disk.

use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use tokio::io::AsyncWriteExt;

use super::{DownloadTask, Downloader};
use crate::error::DownloadError;
use crate::types::Event;

/// Bytes written and the length the server declared, if any
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct StreamSummary {
    pub(super) bytes: u64,
    pub(super) declared: Option<u64>,
}

impl StreamSummary {
    /// The stream ended cleanly before the declared length.
    pub(super) fn is_truncated(&self) -> bool {
        self.declared.is_some_and(|declared| self.bytes < declared)
    }
}

/// Stream `task.url` into `task.destination`, publishing progress after every flush.
///
/// A transport error mid-stream fails the attempt; there is no internal retry.
pub(super) async fn run(
    downloader: &Downloader,
    task: &DownloadTask,
) -> Result<StreamSummary, DownloadError> {
    let _permit = downloader.network_permit(&task.url).await?;

    let response = downloader
        .client
        .get(&task.url)
        .send()
        .await
        .map_err(|e| DownloadError::transport(&task.url, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::UnexpectedStatus {
            url: task.url.clone(),
            status: status.as_u16(),
        });
    }

    let declared: Option<u64> = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let total = declared.or(task.total_size);

    let mut file = tokio::fs::File::create(&task.destination)
        .await
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;

    let buffer_size = downloader.config.stream_buffer_size.max(1);
    let mut buffer: Vec<u8> = Vec::with_capacity(buffer_size);
    let mut bytes: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(item) = stream.next().await {
        let chunk = item.map_err(|e| DownloadError::transport(&task.url, &e))?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() >= buffer_size {
            bytes += flush(&mut file, &mut buffer, task).await?;
            downloader.emit(Event::DownloadProgress {
                url: task.url.clone(),
                bytes,
                total,
            });
        }
    }

    if !buffer.is_empty() {
        bytes += flush(&mut file, &mut buffer, task).await?;
        downloader.emit(Event::DownloadProgress {
            url: task.url.clone(),
            bytes,
            total,
        });
    }
    file.flush()
        .await
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;

    tracing::debug!(url = %task.url, bytes, declared = ?declared, "single stream finished");
    Ok(StreamSummary { bytes, declared })
}

async fn flush(
    file: &mut tokio::fs::File,
    buffer: &mut Vec<u8>,
    task: &DownloadTask,
) -> Result<u64, DownloadError> {
    file.write_all(buffer)
        .await
        .map_err(|e| DownloadError::local_io(&task.destination, &e))?;
    let len = buffer.len() as u64;
    buffer.clear();
    Ok(len)
}

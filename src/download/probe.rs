//! Range capability and size discovery for a remote resource.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderName, RANGE};
use tokio::sync::Semaphore;

use super::chunk::{parse_content_range, parse_unsatisfied_range};

/// What the server said about byte-range requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeSupport {
    /// Server answered a ranged request with `206 Partial Content`
    Supported,
    /// Server answered a ranged request with the full body
    Unsupported,
    /// Probe failed or the answer was inconclusive
    Unknown,
}

/// Result of probing a URL
///
/// Probing never fails: any error collapses into "size unknown, range support
/// unknown", which routes the download to the unknown-size strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    /// Whether `total_size` is meaningful
    pub size_known: bool,
    /// Total resource size in bytes (0 when unknown)
    pub total_size: u64,
    /// Range request support
    pub ranges: RangeSupport,
}

impl ProbeResult {
    /// Nothing could be determined.
    pub fn unknown() -> Self {
        Self {
            size_known: false,
            total_size: 0,
            ranges: RangeSupport::Unknown,
        }
    }

    fn known(total_size: u64, ranges: RangeSupport) -> Self {
        Self {
            size_known: true,
            total_size,
            ranges,
        }
    }

    fn without_size(ranges: RangeSupport) -> Self {
        Self {
            size_known: false,
            total_size: 0,
            ranges,
        }
    }

    /// Whether the server is known to honour range requests.
    pub fn ranges_supported(&self) -> bool {
        self.ranges == RangeSupport::Supported
    }

    /// The total size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size_known.then_some(self.total_size)
    }
}

/// Probe `url` with a one-byte ranged GET.
///
/// The response body is never read; dropping the response releases the connection.
pub(crate) async fn probe(client: &reqwest::Client, permits: &Semaphore, url: &str) -> ProbeResult {
    let Ok(_permit) = permits.acquire().await else {
        return ProbeResult::unknown();
    };

    let response = match client.get(url).header(RANGE, "bytes=0-0").send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "range probe failed");
            return ProbeResult::unknown();
        }
    };

    let result = interpret(response.status(), response.headers());
    tracing::debug!(
        url = %url,
        status = response.status().as_u16(),
        size_known = result.size_known,
        total_size = result.total_size,
        ranges = ?result.ranges,
        "range probe"
    );
    result
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Map a probe response onto a [`ProbeResult`].
fn interpret(status: StatusCode, headers: &HeaderMap) -> ProbeResult {
    let header = |name: HeaderName| header_str(headers, name);

    match status {
        StatusCode::PARTIAL_CONTENT => match header(CONTENT_RANGE).and_then(parse_content_range) {
            Some(range) => match range.total {
                Some(total) => ProbeResult::known(total, RangeSupport::Supported),
                None => ProbeResult::without_size(RangeSupport::Supported),
            },
            None => ProbeResult::without_size(RangeSupport::Unknown),
        },
        // Byte 0 is unsatisfiable only for an empty resource
        StatusCode::RANGE_NOT_SATISFIABLE => {
            match header(CONTENT_RANGE).and_then(parse_unsatisfied_range) {
                Some(total) => ProbeResult::known(total, RangeSupport::Supported),
                None => ProbeResult::unknown(),
            }
        }
        StatusCode::OK => match header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()) {
            Some(total) => ProbeResult::known(total, RangeSupport::Unsupported),
            None => ProbeResult::without_size(RangeSupport::Unsupported),
        },
        _ => ProbeResult::unknown(),
    }
}

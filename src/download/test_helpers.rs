//! Shared test helpers: a wiremock responder that serves byte ranges.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::config::{Config, DownloadConfig};
use crate::download::Downloader;

/// How the mock server treats `Range` headers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RangeMode {
    /// Honour every range request
    Honest,
    /// Ignore ranges and always send the full body with 200
    NoRanges,
    /// Answer the `bytes=0-0` probe with 206 but ignore every other range
    ProbeOnly,
    /// Honour ranges except the one starting at this offset, which gets a 500
    FailAt(u64),
}

/// Responder serving a fixed body with configurable range behavior
#[derive(Clone)]
pub(crate) struct RangeServer {
    pub(crate) body: Arc<Vec<u8>>,
    pub(crate) mode: RangeMode,
    /// Send `/*` instead of the total size in `Content-Range`
    pub(crate) hide_size: bool,
    pub(crate) delay: Option<Duration>,
}

impl RangeServer {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            mode: RangeMode::Honest,
            hide_size: false,
            delay: None,
        }
    }

    pub(crate) fn mode(mut self, mode: RangeMode) -> Self {
        self.mode = mode;
        self
    }

    pub(crate) fn hide_size(mut self) -> Self {
        self.hide_size = true;
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Mount on `server` under `route`.
    pub(crate) async fn mount(self, server: &MockServer, route: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(self)
            .mount(server)
            .await;
    }

    fn full_body(&self) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(self.body.as_slice())
    }

    fn total(&self) -> String {
        if self.hide_size {
            "*".to_string()
        } else {
            self.body.len().to_string()
        }
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

impl Respond for RangeServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let template = match (self.mode, range) {
            (_, None) | (RangeMode::NoRanges, _) => self.full_body(),
            (RangeMode::ProbeOnly, Some((start, end))) if start != 0 || end != Some(0) => {
                self.full_body()
            }
            (RangeMode::FailAt(offset), Some((start, _))) if start == offset => {
                ResponseTemplate::new(500)
            }
            (_, Some((start, end))) => {
                let len = self.body.len() as u64;
                if start >= len {
                    let template = ResponseTemplate::new(416);
                    if self.hide_size {
                        template
                    } else {
                        template.insert_header("Content-Range", format!("bytes */{len}"))
                    }
                } else {
                    let end = end.unwrap_or(len - 1).min(len - 1);
                    ResponseTemplate::new(206)
                        .insert_header(
                            "Content-Range",
                            format!("bytes {start}-{end}/{}", self.total()),
                        )
                        .set_body_bytes(&self.body[start as usize..=end as usize])
                }
            }
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Deterministic pseudo-random bytes, so misplaced writes are detectable.
pub(crate) fn sample_body(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Download config tuned for tests.
pub(crate) fn test_download_config(chunk_workers: usize, chunk_size: u64) -> DownloadConfig {
    DownloadConfig {
        chunk_workers,
        chunk_size,
        max_wall_clock: Duration::from_secs(10),
        stream_buffer_size: 4096,
        ..DownloadConfig::default()
    }
}

/// Downloader over `download` with default HTTP settings.
pub(crate) fn test_downloader(download: DownloadConfig) -> Downloader {
    let config = Config {
        download,
        ..Config::default()
    };
    Downloader::new(&config).unwrap()
}

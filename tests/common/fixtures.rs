//! Fixtures: in-process service fakes, a byte-range mock server and sample records

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use evidence_dl::types::{Conversation, Locale, Turn};
use evidence_dl::{
    Config, ContentExtractor, KeywordContext, KeywordDeriver, Language, PipelineServices, Record,
    RecordId, SearchEngine, SearchHit, ServiceError, Summarizer,
};
use serde_json::Map;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Keywords are the words of the current query
pub struct EchoKeywords;

#[async_trait::async_trait]
impl KeywordDeriver for EchoKeywords {
    async fn derive_keywords(&self, context: &KeywordContext) -> Result<String, ServiceError> {
        Ok(context.current_query().unwrap_or_default().to_string())
    }
}

/// Returns a fixed hit list for every query and counts calls
pub struct StaticSearch {
    pub hits: Vec<SearchHit>,
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SearchEngine for StaticSearch {
    async fn search(&self, _keywords: &str, _locale: Locale) -> Result<Vec<SearchHit>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

/// Summary is the first few words of the text
pub struct HeadSummarizer;

#[async_trait::async_trait]
impl Summarizer for HeadSummarizer {
    async fn summarize(
        &self,
        _question: &str,
        _title: &str,
        text: &str,
        _lang: &Language,
    ) -> Result<String, ServiceError> {
        Ok(text.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
    }
}

/// Passes HTML through; PDFs are read as text after the `%PDF` magic
pub struct PlainExtractor;

#[async_trait::async_trait]
impl ContentExtractor for PlainExtractor {
    async fn html_to_text(&self, html: &str) -> Result<String, ServiceError> {
        Ok(html.to_string())
    }

    async fn pdf_to_text(&self, path: &Path) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::new(e.to_string()))?;
        bytes
            .strip_prefix(b"%PDF")
            .map(|rest| String::from_utf8_lossy(rest).trim().to_string())
            .ok_or_else(|| ServiceError::new("not a PDF"))
    }
}

/// Services whose search returns `hits`; the search fake is returned for inspection.
pub fn services(hits: Vec<SearchHit>) -> (PipelineServices, Arc<StaticSearch>) {
    let search = Arc::new(StaticSearch {
        hits,
        calls: AtomicUsize::new(0),
    });
    let services = PipelineServices {
        keywords: Arc::new(EchoKeywords),
        search: search.clone(),
        summarizer: Arc::new(HeadSummarizer),
        extractor: Arc::new(PlainExtractor),
    };
    (services, search)
}

/// Temporary output and staging directories
pub struct Workspace {
    _root: TempDir,
    pub output: PathBuf,
    pub staging: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        Self {
            output: root.path().join("data"),
            staging: root.path().join("temp"),
            _root: root,
        }
    }

    /// Config pointing at this workspace with small chunks and `workers` record workers.
    pub fn config(&self, workers: usize) -> Config {
        let mut config = Config::default();
        config.orchestrator.record_workers = workers;
        config.orchestrator.output_dir = self.output.clone();
        config.orchestrator.staging_dir = self.staging.clone();
        config.download.chunk_workers = 4;
        config.download.chunk_size = 4096;
        config.download.max_wall_clock = Duration::from_secs(10);
        config.download.stream_buffer_size = 4096;
        config
    }
}

/// Serves a fixed body, honouring `Range` headers unless disabled
#[derive(Clone)]
pub struct RangeResponder {
    pub body: Arc<Vec<u8>>,
    pub ranges: bool,
}

impl RangeResponder {
    pub async fn mount(body: Vec<u8>, ranges: bool, server: &MockServer, route: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(Self {
                body: Arc::new(body),
                ranges,
            })
            .mount(server)
            .await;
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<u64>().ok()?, e.parse::<u64>().ok())));

        let len = self.body.len() as u64;
        match range {
            Some((start, end)) if self.ranges => {
                if start >= len {
                    return ResponseTemplate::new(416)
                        .insert_header("Content-Range", format!("bytes */{len}"));
                }
                let end = end.unwrap_or(len - 1).min(len - 1);
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{len}"))
                    .set_body_bytes(&self.body[start as usize..=end as usize])
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.as_slice()),
        }
    }
}

/// Deterministic bytes that differ at every offset modulo 251.
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A search hit for `link`.
pub fn hit(position: u32, title: &str, link: String) -> SearchHit {
    SearchHit {
        position,
        title: title.to_string(),
        snippet: String::new(),
        link,
    }
}

/// A one-turn English record.
pub fn record(id: &str, query: &str) -> Record {
    Record {
        conversation_hash: RecordId::from(id),
        conversations: Conversation {
            lang: Language::English,
            contents: vec![Turn {
                query: query.to_string(),
                answer: Some("an answer".to_string()),
                ..Turn::default()
            }],
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

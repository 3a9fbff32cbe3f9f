//! Shared test helpers: in-process fakes for the pipeline's external services.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Map;
use tokio::sync::{Notify, Semaphore};

use super::{ContentExtractor, KeywordContext, KeywordDeriver, PipelineServices, SearchEngine, Summarizer};
use crate::error::ServiceError;
use crate::types::{Conversation, Language, Locale, Record, RecordId, SearchHit, Turn};

/// Queries containing this marker make keyword derivation fail
pub(crate) const FAIL_KEYWORDS: &str = "[fail-keywords]";

/// Titles containing this marker make summarization fail
pub(crate) const FAIL_SUMMARY: &str = "[fail-summary]";

/// A hit title containing this gets an irrelevance verdict in the record's language
pub(crate) const OFF_TOPIC: &str = "[off-topic]";

/// Joins the queries of the context
#[derive(Default)]
pub(crate) struct FakeKeywords {
    pub(crate) calls: AtomicUsize,
    pub(crate) contexts: std::sync::Mutex<Vec<KeywordContext>>,
}

#[async_trait::async_trait]
impl KeywordDeriver for FakeKeywords {
    async fn derive_keywords(&self, context: &KeywordContext) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.contexts.lock() {
            seen.push(context.clone());
        }
        let query = context.current_query().unwrap_or_default();
        if query.contains(FAIL_KEYWORDS) {
            return Err(ServiceError::new("keyword model unavailable"));
        }
        Ok(query.split_whitespace().collect::<Vec<_>>().join(", "))
    }
}

/// Pauses a call until the test releases it
pub(crate) struct Gate {
    pub(crate) entered: Notify,
    pub(crate) release: Semaphore,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

/// Returns the same hits for every query
#[derive(Default)]
pub(crate) struct FakeSearch {
    pub(crate) hits: Vec<SearchHit>,
    pub(crate) fail: bool,
    pub(crate) gate: Option<Arc<Gate>>,
    pub(crate) calls: AtomicUsize,
    pub(crate) locales: std::sync::Mutex<Vec<Locale>>,
}

impl FakeSearch {
    pub(crate) fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl SearchEngine for FakeSearch {
    async fn search(&self, _keywords: &str, locale: Locale) -> Result<Vec<SearchHit>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.locales.lock() {
            seen.push(locale);
        }
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if self.fail {
            return Err(ServiceError::new("search quota exhausted"));
        }
        Ok(self.hits.clone())
    }
}

/// Echoes the title
#[derive(Default)]
pub(crate) struct FakeSummarizer {
    pub(crate) calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        _question: &str,
        title: &str,
        _text: &str,
        lang: &Language,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if title.contains(FAIL_SUMMARY) {
            return Err(ServiceError::new("summarizer refused"));
        }
        if title.contains(OFF_TOPIC) {
            let verdict = match lang {
                Language::Chinese => "不相关",
                _ => "irrelevant",
            };
            return Ok(verdict.to_string());
        }
        Ok(format!("summary of {title}"))
    }
}

/// Strips tags from HTML; reads "PDFs" as UTF-8 text after the `%PDF` magic
#[derive(Default)]
pub(crate) struct FakeExtractor;

#[async_trait::async_trait]
impl ContentExtractor for FakeExtractor {
    async fn html_to_text(&self, html: &str) -> Result<String, ServiceError> {
        let mut text = String::with_capacity(html.len());
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    async fn pdf_to_text(&self, path: &Path) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::new(e.to_string()))?;
        match bytes.strip_prefix(b"%PDF") {
            Some(rest) => Ok(String::from_utf8_lossy(rest).trim().to_string()),
            None => Err(ServiceError::new("not a PDF")),
        }
    }
}

/// Every fake, kept so tests can inspect call counts
#[derive(Clone)]
pub(crate) struct Fakes {
    pub(crate) keywords: Arc<FakeKeywords>,
    pub(crate) search: Arc<FakeSearch>,
    pub(crate) summarizer: Arc<FakeSummarizer>,
    pub(crate) extractor: Arc<FakeExtractor>,
}

impl Fakes {
    pub(crate) fn new(search: FakeSearch) -> Self {
        Self {
            keywords: Arc::new(FakeKeywords::default()),
            search: Arc::new(search),
            summarizer: Arc::new(FakeSummarizer::default()),
            extractor: Arc::new(FakeExtractor),
        }
    }

    pub(crate) fn services(&self) -> PipelineServices {
        PipelineServices {
            keywords: self.keywords.clone(),
            search: self.search.clone(),
            summarizer: self.summarizer.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// A search hit pointing at `link`.
pub(crate) fn hit(position: u32, title: &str, link: String) -> SearchHit {
    SearchHit {
        position,
        title: title.to_string(),
        snippet: format!("snippet {position}"),
        link,
    }
}

/// A record with one turn per query, each answered.
pub(crate) fn record(id: &str, lang: Language, queries: &[&str]) -> Record {
    Record {
        conversation_hash: RecordId::from(id),
        conversations: Conversation {
            lang,
            contents: queries
                .iter()
                .enumerate()
                .map(|(i, q)| Turn {
                    query: q.to_string(),
                    answer: Some(format!("answer {i}")),
                    ..Turn::default()
                })
                .collect(),
            extra: Map::new(),
        },
        extra: Map::new(),
    }
}

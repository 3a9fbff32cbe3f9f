//! Per-record enrichment pipeline -- keywords, search, reference acquisition.
//!
//! Split into focused submodules:
//! - [`keywords`] - Conversation context handed to keyword derivation
//! - [`reference`] - Fetching, extracting and summarizing search hits
//! - [`record`] - The per-record run writing artifacts into a staging area
//!
//! External services (keyword derivation, search, extraction, summarization)
//! sit behind the traits below so embedding applications can plug in their own
//! clients and tests can use fakes.

pub mod keywords;
mod record;
mod reference;


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::path::Path;
use std::sync::Arc;

use crate::config::ReferenceConfig;
use crate::download::Downloader;
use crate::error::ServiceError;
use crate::types::{Language, Locale, SearchHit};

pub use keywords::{Exchange, KeywordContext};
pub use record::Pipeline;

/// Turns a conversation prefix into search keywords
#[async_trait::async_trait]
pub trait KeywordDeriver: Send + Sync {
    /// Derive search keywords for the last query in `context`.
    async fn derive_keywords(&self, context: &KeywordContext) -> Result<String, ServiceError>;
}

/// Web search
#[async_trait::async_trait]
pub trait SearchEngine: Send + Sync {
    /// Organic results for `keywords`, in rank order.
    async fn search(&self, keywords: &str, locale: Locale) -> Result<Vec<SearchHit>, ServiceError>;
}

/// Question-focused summarization of a document
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text` (titled `title`) with respect to `question`.
    async fn summarize(
        &self,
        question: &str,
        title: &str,
        text: &str,
        lang: &Language,
    ) -> Result<String, ServiceError>;
}

/// Text extraction from fetched content
#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Readable text of an HTML page.
    async fn html_to_text(&self, html: &str) -> Result<String, ServiceError>;

    /// Text of a downloaded PDF.
    async fn pdf_to_text(&self, path: &Path) -> Result<String, ServiceError>;
}

/// The external services a [`Pipeline`] calls
#[derive(Clone)]
pub struct PipelineServices {
    /// Keyword derivation
    pub keywords: Arc<dyn KeywordDeriver>,
    /// Web search
    pub search: Arc<dyn SearchEngine>,
    /// Summarization
    pub summarizer: Arc<dyn Summarizer>,
    /// Text extraction
    pub extractor: Arc<dyn ContentExtractor>,
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices").finish_non_exhaustive()
    }
}

/// What one reference fetch needs besides the hit itself.
pub(crate) struct ReferenceContext<'a> {
    pub(crate) services: &'a PipelineServices,
    pub(crate) downloader: &'a Downloader,
    pub(crate) config: &'a ReferenceConfig,
}

//! Core types for evidence-dl

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::download::Strategy;
use crate::orchestrator::BatchSummary;

/// Unique identifier for a record (the conversation hash)
///
/// Doubles as the file stem of the record's canonical artifact and as the name of
/// its staging area, so it must be a single path component.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create a new RecordId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier can be used as a single file-name component
    #[must_use]
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation language
///
/// Serialized as the plain language name used by the input data
/// (`"English"`, `"Chinese"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    /// English
    English,
    /// Chinese
    Chinese,
    /// Any other language, kept verbatim
    Other(String),
}

impl Language {
    /// Search locale used for this language
    ///
    /// Languages without a dedicated locale search with the English one.
    pub fn locale(&self) -> Locale {
        match self {
            Language::Chinese => Locale {
                language: "zh-cn",
                country: "cn",
            },
            Language::English | Language::Other(_) => Locale {
                language: "en",
                country: "us",
            },
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        match value.as_str() {
            "English" => Language::English,
            "Chinese" => Language::Chinese,
            _ => Language::Other(value),
        }
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        match value {
            Language::English => "English".to_string(),
            Language::Chinese => "Chinese".to_string(),
            Language::Other(other) => other,
        }
    }
}

/// Search engine locale (interface language and country)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Locale {
    /// Interface language code (e.g., "en", "zh-cn")
    pub language: &'static str,
    /// Country code (e.g., "us", "cn")
    pub country: &'static str,
}

/// One input record: a conversation to enrich with web evidence
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier
    pub conversation_hash: RecordId,

    /// The conversation itself
    pub conversations: Conversation,

    /// Fields the pipeline does not interpret, preserved on output
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Conversation body of a [`Record`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation language
    pub lang: Language,

    /// Turns in conversation order
    pub contents: Vec<Turn>,

    /// Fields the pipeline does not interpret (turn count, topic, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One question/answer exchange
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// The user's question
    pub query: String,

    /// The recorded answer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Web evidence gathered for this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,

    /// Fields the pipeline does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One organic search result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Rank reported by the search engine
    pub position: u32,
    /// Result title
    pub title: String,
    /// Result snippet
    #[serde(default)]
    pub snippet: String,
    /// Result URL
    pub link: String,
}

/// Kind of content behind a reference URL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// PDF document, downloaded to disk before extraction
    #[serde(rename = "PDF")]
    Pdf,
    /// Plain text file
    Text,
    /// Markdown file
    Markdown,
    /// Any other web page
    WebPage,
}

impl ReferenceKind {
    /// Classify a URL by its (case-insensitive) suffix.
    #[must_use]
    pub fn classify(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.ends_with("pdf") {
            ReferenceKind::Pdf
        } else if lower.ends_with("txt") {
            ReferenceKind::Text
        } else if lower.ends_with("md") {
            ReferenceKind::Markdown
        } else {
            ReferenceKind::WebPage
        }
    }
}

/// A search result enriched with its fetched content and summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Random identifier, unique within a record
    pub ref_id: String,
    /// Position in the search hit list
    pub idx: usize,
    /// Rank reported by the search engine
    pub index: u32,
    /// Result title
    pub title: String,
    /// Result snippet
    pub snippet: String,
    /// Result URL
    pub url: String,
    /// Content kind
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    /// Extracted text
    pub main_body: String,
    /// Summary with respect to the turn's question (empty past the summary limit)
    pub summary: String,
}

impl Reference {
    /// Whether the summarizer judged this reference unrelated to the question.
    pub fn is_judged_irrelevant(&self) -> bool {
        is_irrelevant_verdict(&self.summary)
    }

    /// Whether the reference carries no usable summary.
    pub fn lacks_summary(&self) -> bool {
        self.summary.trim().is_empty() || self.is_judged_irrelevant()
    }
}

/// Whether a summarizer answer is a verdict of irrelevance rather than a summary.
///
/// Summarizers answer "irrelevant" (English records) or "不相关" (Chinese records).
pub fn is_irrelevant_verdict(summary: &str) -> bool {
    let summary = summary.trim();
    summary.eq_ignore_ascii_case("irrelevant") || summary == "不相关"
}

/// Lifecycle state of a record within one orchestrator run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Waiting in the input queue
    Pending,
    /// Claimed by a worker; its staging area exists
    InFlight,
    /// All artifacts relocated into the output directory
    Committed,
    /// Output already existed; nothing was done
    Skipped,
    /// Pipeline or commit failed; staging area left for inspection
    Failed,
}

/// Event emitted during record and download lifecycles
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker claimed a record
    RecordStarted {
        /// Record ID
        id: RecordId,
    },

    /// A record was already committed by an earlier run
    RecordSkipped {
        /// Record ID
        id: RecordId,
    },

    /// A record's artifacts were committed
    RecordCommitted {
        /// Record ID
        id: RecordId,
        /// Number of artifacts relocated
        artifacts: usize,
    },

    /// A record failed and its staging area was left in place
    RecordFailed {
        /// Record ID
        id: RecordId,
        /// Error message
        error: String,
    },

    /// A download strategy attempt started
    DownloadStarted {
        /// Source URL
        url: String,
        /// Strategy being attempted
        strategy: Strategy,
    },

    /// Incremental progress of a streamed download
    DownloadProgress {
        /// Source URL
        url: String,
        /// Bytes written so far
        bytes: u64,
        /// Total size, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// A strategy attempt failed; the selector may fall back
    StrategyFailed {
        /// Source URL
        url: String,
        /// Strategy that failed
        strategy: Strategy,
        /// Error message
        error: String,
    },

    /// A download finished successfully
    DownloadComplete {
        /// Source URL
        url: String,
        /// Strategy that succeeded
        strategy: Strategy,
        /// Final file size
        bytes: u64,
    },

    /// A download failed after every applicable strategy
    DownloadFailed {
        /// Source URL
        url: String,
        /// Error message
        error: String,
    },

    /// An orchestrator run finished
    BatchComplete {
        /// Final counts
        summary: BatchSummary,
    },
}

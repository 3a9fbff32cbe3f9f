//! Error types for evidence-dl
//!
//! This module provides the error taxonomy used across the crate:
//! - [`DownloadError`] - per-attempt download failures, classified by [`FailureClass`]
//! - [`CommitError`] - staging-area relocation failures, including partial commits
//! - [`PipelineError`] - per-record and per-reference pipeline failures
//! - [`ServiceError`] - failures reported by external collaborators (search, summarization, ...)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for evidence-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for evidence-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.chunk_size")
        key: Option<String>,
    },

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Staging commit error
    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    /// Record pipeline error
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed input record
    #[error("invalid record on line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number in the input file
        line: usize,
        /// Why the line could not be parsed
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a download failure
///
/// Drives the strategy selector: every class except [`FailureClass::LocalIo`]
/// is eligible for fallback to the next strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, connection resets, DNS failures
    TransientNetwork,
    /// Unexpected status codes or malformed range responses
    Protocol,
    /// Wall-clock budget exceeded
    ResourceExhaustion,
    /// Disk write or allocation failure
    LocalIo,
}

/// Download-related errors
///
/// Reasons are kept as strings so a failure can be recorded in a
/// [`ChunkResult`](crate::download::ChunkResult) and cloned into reports.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DownloadError {
    /// Transport-level failure (connect, reset, body stream error)
    #[error("transport error for {url}: {reason}")]
    Transport {
        /// The URL being fetched
        url: String,
        /// Underlying error message
        reason: String,
    },

    /// Server answered with a status the strategy cannot use
    #[error("unexpected HTTP status {status} for {url}")]
    UnexpectedStatus {
        /// The URL being fetched
        url: String,
        /// The HTTP status code received
        status: u16,
    },

    /// Server ignored the `Range` header and sent the whole resource
    #[error("server ignored range request for {url}")]
    RangesUnsupported {
        /// The URL being fetched
        url: String,
    },

    /// `Content-Range` header missing, malformed, or not matching the request
    #[error("bad content range for bytes {start}-{end}: {reason}")]
    BadContentRange {
        /// Requested start offset
        start: u64,
        /// Requested end offset (inclusive)
        end: u64,
        /// What was wrong with the header
        reason: String,
    },

    /// Body ended before the declared number of bytes arrived
    #[error("short read at offset {start}: expected {expected} bytes, received {received}")]
    ShortRead {
        /// Offset the range started at
        start: u64,
        /// Bytes the server declared
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Wall-clock budget exceeded
    #[error("download exceeded wall-clock budget of {budget:?}")]
    Timeout {
        /// The configured budget
        budget: Duration,
    },

    /// Not enough free space for the destination file
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the download
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Local file operation failed
    #[error("local I/O error on {path}: {reason}")]
    LocalIo {
        /// File being written
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },

    /// One chunk of a parallel attempt failed
    #[error("chunk {start}-{end} failed: {cause}")]
    ChunkFailed {
        /// Chunk start offset
        start: u64,
        /// Chunk end offset (inclusive)
        end: u64,
        /// What went wrong with the chunk
        cause: Box<DownloadError>,
    },

    /// Every applicable strategy failed
    #[error("all {attempts} download strategies failed, last error: {last}")]
    Exhausted {
        /// Number of strategies attempted
        attempts: usize,
        /// The failure of the final attempt
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Build a transport error from a reqwest failure.
    pub(crate) fn transport(url: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }

    /// Build a local I/O error for `path`.
    pub(crate) fn local_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::LocalIo {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Classify this failure.
    pub fn class(&self) -> FailureClass {
        match self {
            DownloadError::Transport { .. } => FailureClass::TransientNetwork,
            DownloadError::UnexpectedStatus { .. }
            | DownloadError::RangesUnsupported { .. }
            | DownloadError::BadContentRange { .. }
            | DownloadError::ShortRead { .. } => FailureClass::Protocol,
            DownloadError::Timeout { .. } => FailureClass::ResourceExhaustion,
            DownloadError::InsufficientSpace { .. } | DownloadError::LocalIo { .. } => {
                FailureClass::LocalIo
            }
            DownloadError::ChunkFailed { cause, .. } => cause.class(),
            DownloadError::Exhausted { last, .. } => last.class(),
        }
    }

    /// Whether this failure ends the task instead of triggering fallback.
    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::LocalIo
    }
}

/// Staging commit errors
#[derive(Debug, Error)]
pub enum CommitError {
    /// The staging area could not be listed
    #[error("failed to read staging area {path}: {source}")]
    ReadStaging {
        /// The staging directory
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A relocation failed after zero or more artifacts were already moved
    ///
    /// Already-relocated artifacts stay in the output directory and the rest stay
    /// in staging. Nothing is deleted; a reconciliation pass can finish the commit.
    #[error(
        "partial commit from {staging}: {relocated} relocated, {remaining} remaining, failed on {failed}: {reason}"
    )]
    Partial {
        /// The staging directory
        staging: PathBuf,
        /// Artifacts already in the output directory
        relocated: usize,
        /// Artifacts still in staging (including the one that failed)
        remaining: usize,
        /// The artifact whose relocation failed
        failed: PathBuf,
        /// Why it failed
        reason: String,
    },

    /// The emptied staging directory could not be removed
    #[error("failed to remove staging area {path}: {source}")]
    RemoveStaging {
        /// The staging directory
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Per-record and per-reference pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Keyword derivation failed for a turn
    #[error("keyword derivation failed for turn {turn}: {reason}")]
    Keywords {
        /// Zero-based turn index
        turn: usize,
        /// Collaborator error message
        reason: String,
    },

    /// Search failed for a turn
    #[error("search failed for turn {turn}: {reason}")]
    Search {
        /// Zero-based turn index
        turn: usize,
        /// Collaborator error message
        reason: String,
    },

    /// A staged artifact could not be written or read
    #[error("artifact {path}: {reason}")]
    Artifact {
        /// The artifact path
        path: PathBuf,
        /// Underlying error message
        reason: String,
    },

    /// A single reference could not be acquired (dropped, never fatal to the record)
    #[error("reference {url} dropped: {reason}")]
    Reference {
        /// The reference URL
        url: String,
        /// Why it was dropped
        reason: String,
    },
}

impl PipelineError {
    /// Build an artifact error for `path`.
    pub(crate) fn artifact(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Artifact {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Build a reference-level error.
    pub(crate) fn reference(url: &str, reason: impl ToString) -> Self {
        Self::Reference {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error reported by an external collaborator (keywording, search, extraction, summarization)
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    /// Human-readable failure description
    pub message: String,
}

impl ServiceError {
    /// Create a new service error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

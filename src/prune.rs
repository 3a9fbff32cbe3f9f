//! Cleanup pass over committed records: drop references without a usable summary.
//!
//! Run it once a batch has finished. It rewrites canonical record files in
//! place, so no orchestrator may be committing into the same directory.

use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::types::Record;

/// Counts from one [`prune_output`] pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    /// JSON files inspected
    pub files: usize,
    /// Zero-byte JSON files (left untouched)
    pub empty_files: usize,
    /// Files holding a record
    pub records: usize,
    /// Records rewritten because at least one reference was removed
    pub rewritten: usize,
    /// References removed across all records
    pub references_removed: usize,
}

/// Remove references whose summary is empty or an irrelevance verdict from
/// every record in `output_dir`.
///
/// Non-record artifacts (keyword and search caches, downloaded documents) are
/// left alone. A rewrite goes through a hidden temporary file renamed over the
/// record, so each record file is either the old or the new version.
pub async fn prune_output(output_dir: &Path) -> crate::Result<PruneSummary> {
    let mut summary = PruneSummary::default();

    let mut entries = fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        summary.files += 1;

        let path = entry.path();
        if entry.metadata().await?.len() == 0 {
            warn!(path = %path.display(), "empty record file");
            summary.empty_files += 1;
            continue;
        }

        let bytes = fs::read(&path).await?;
        let Ok(mut record) = serde_json::from_slice::<Record>(&bytes) else {
            debug!(path = %path.display(), "not a record, skipping");
            continue;
        };
        summary.records += 1;

        let removed = prune_record(&mut record);
        if removed == 0 {
            continue;
        }

        let partial = output_dir.join(format!(".{name}.partial"));
        fs::write(&partial, serde_json::to_vec_pretty(&record)?).await?;
        fs::rename(&partial, &path).await?;
        debug!(record_id = %record.conversation_hash, removed, "pruned references");
        summary.rewritten += 1;
        summary.references_removed += removed;
    }

    info!(
        files = summary.files,
        empty_files = summary.empty_files,
        records = summary.records,
        rewritten = summary.rewritten,
        references_removed = summary.references_removed,
        "output pruning finished"
    );
    Ok(summary)
}

/// Drop the references of every turn that lack a summary; returns how many went.
pub fn prune_record(record: &mut Record) -> usize {
    record
        .conversations
        .contents
        .iter_mut()
        .map(|turn| {
            let before = turn.references.len();
            turn.references.retain(|r| !r.lacks_summary());
            before - turn.references.len()
        })
        .sum()
}

//! Record input: one JSON document per line.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::Record;

/// Parse JSON-lines text into records. Blank lines are skipped.
///
/// Fails on the first malformed line, reporting its 1-based line number.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| Error::InvalidRecord {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Read every record from the JSON-lines file at `path`.
pub async fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = tokio::fs::read_to_string(path).await?;
    let records = parse_records(&text)?;
    tracing::info!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}

//! Per-record staging areas and the commit that publishes them.
//!
//! Every artifact of a record is written into `staging_root/{id}/` first. The
//! [`StagingCommitter`] then renames the artifacts one by one into the shared
//! output directory, the canonical `{id}.json` last, and removes the emptied
//! staging directory. Because the canonical artifact is the idempotency
//! signal, a record never looks committed before all its other artifacts are
//! in place.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{CommitError, PipelineError};
use crate::types::RecordId;

/// File name of a record's canonical artifact.
pub fn canonical_name(id: &RecordId) -> String {
    format!("{id}.json")
}

/// File name of the cached search results of one turn.
pub fn search_artifact_name(id: &RecordId, turn: usize) -> String {
    format!("{id}_search_{turn}.json")
}

/// File name of the derived keywords of one turn.
pub fn keyword_artifact_name(id: &RecordId, turn: usize) -> String {
    format!("{id}_keyword_{turn}.json")
}

fn is_search_cache(id: &RecordId, name: &str) -> bool {
    name.strip_prefix(id.as_str())
        .and_then(|rest| rest.strip_prefix("_search_"))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|turn| !turn.is_empty() && turn.bytes().all(|b| b.is_ascii_digit()))
}

/// State a staging area was found in when opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingState {
    /// Newly created, or reclaimed from a failed run
    Fresh,
    /// Holds the canonical artifact: the pipeline finished and only the commit is left
    ReadyToCommit,
}

/// Private working directory of one in-flight record
#[derive(Debug)]
pub struct StagingArea {
    id: RecordId,
    dir: PathBuf,
}

impl StagingArea {
    /// Open the staging area of `id` under `staging_root`.
    ///
    /// A leftover area that holds the canonical artifact is returned as
    /// [`StagingState::ReadyToCommit`]. Any other leftover is reclaimed: cached
    /// search results are kept and everything else is removed.
    pub async fn open(
        staging_root: &Path,
        id: &RecordId,
    ) -> Result<(Self, StagingState), PipelineError> {
        let area = Self {
            id: id.clone(),
            dir: staging_root.join(id.as_str()),
        };

        if !fs::try_exists(&area.dir).await.unwrap_or(false) {
            fs::create_dir_all(&area.dir)
                .await
                .map_err(|e| PipelineError::artifact(&area.dir, e))?;
            return Ok((area, StagingState::Fresh));
        }

        if area.has_canonical().await {
            debug!(record_id = %id, "staging area holds a finished record");
            return Ok((area, StagingState::ReadyToCommit));
        }

        let removed = area.reclaim().await?;
        debug!(record_id = %id, removed, "reclaimed stale staging area");
        Ok((area, StagingState::Fresh))
    }

    /// Remove everything except cached search results; returns the number of entries removed.
    async fn reclaim(&self) -> Result<usize, PipelineError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PipelineError::artifact(&self.dir, e))?;
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::artifact(&self.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name();
            if is_search_cache(&self.id, &name.to_string_lossy()) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PipelineError::artifact(&path, e))?;
            let result = if file_type.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            result.map_err(|e| PipelineError::artifact(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Record this area belongs to.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Directory of this area.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of an artifact named `name` inside this area.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Path of the canonical artifact inside this area.
    pub fn canonical_path(&self) -> PathBuf {
        self.artifact_path(&canonical_name(&self.id))
    }

    /// Whether the canonical artifact has been written.
    pub async fn has_canonical(&self) -> bool {
        fs::try_exists(self.canonical_path()).await.unwrap_or(false)
    }

    /// Serialize `value` as pretty JSON into the artifact `name`.
    ///
    /// The bytes go to a hidden temporary file that is renamed into place, so an
    /// artifact is either absent or complete.
    pub async fn write_json<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, PipelineError> {
        let path = self.artifact_path(name);
        let partial = self.artifact_path(&format!(".{name}.partial"));
        let json = serde_json::to_vec_pretty(value).map_err(|e| PipelineError::artifact(&path, e))?;

        fs::write(&partial, json)
            .await
            .map_err(|e| PipelineError::artifact(&partial, e))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| PipelineError::artifact(&path, e))?;
        Ok(path)
    }

    /// Load the artifact `name`, or `None` if it is missing or unreadable.
    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.artifact_path(name);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable staged artifact");
                None
            }
        }
    }
}

/// Artifacts published by a successful commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReport {
    /// Record the artifacts belong to
    pub id: RecordId,
    /// Destination paths in relocation order (canonical last)
    pub relocated: Vec<PathBuf>,
}

/// Publishes staging areas into the shared output directory
#[derive(Clone, Debug)]
pub struct StagingCommitter {
    output_dir: PathBuf,
}

impl StagingCommitter {
    /// Create a committer targeting `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// The shared output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether `id` already has a committed canonical artifact.
    pub async fn is_committed(&self, id: &RecordId) -> bool {
        fs::try_exists(self.output_dir.join(canonical_name(id)))
            .await
            .unwrap_or(false)
    }

    /// Move every artifact of `area` into the output directory, then remove `area`.
    ///
    /// Artifacts are renamed one at a time, the canonical artifact last. An
    /// existing destination is never overwritten. The first failure stops the
    /// commit and leaves every file where it is.
    pub async fn commit(&self, area: StagingArea) -> Result<CommitReport, CommitError> {
        let staging = area.dir.clone();
        let canonical = canonical_name(&area.id);

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&staging)
            .await
            .map_err(|e| CommitError::ReadStaging {
                path: staging.clone(),
                source: e,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CommitError::ReadStaging {
                path: staging.clone(),
                source: e,
            })?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != canonical {
                names.push(name);
            }
        }
        names.sort();
        names.push(canonical);

        let total = names.len();
        let mut relocated = Vec::with_capacity(total);
        for name in &names {
            let source = staging.join(name);
            let destination = self.output_dir.join(name);

            if let Err(reason) = relocate(&source, &destination).await {
                let err = CommitError::Partial {
                    staging: staging.clone(),
                    relocated: relocated.len(),
                    remaining: total - relocated.len(),
                    failed: source,
                    reason,
                };
                warn!(record_id = %area.id, error = %err, "partial commit");
                return Err(err);
            }
            relocated.push(destination);
        }

        fs::remove_dir(&staging)
            .await
            .map_err(|e| CommitError::RemoveStaging {
                path: staging.clone(),
                source: e,
            })?;

        info!(
            record_id = %area.id,
            artifacts = relocated.len(),
            output_dir = %self.output_dir.display(),
            "committed record"
        );
        Ok(CommitReport {
            id: area.id,
            relocated,
        })
    }
}

/// Rename `source` to `destination` unless `destination` already exists.
async fn relocate(source: &Path, destination: &Path) -> Result<(), String> {
    match fs::try_exists(destination).await {
        Ok(false) => {}
        Ok(true) => return Err("destination already exists".to_string()),
        Err(e) => return Err(e.to_string()),
    }
    fs::rename(source, destination)
        .await
        .map_err(|e| e.to_string())?;
    debug!(?source, ?destination, "relocated artifact");
    Ok(())
}

/// Counts from a [`reconcile_staging`] pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Interrupted commits finished by this pass
    pub recommitted: usize,
    /// Empty staging directories of already-committed records removed
    pub removed_empty: usize,
    /// Staging areas of failed records left for the next run
    pub left_for_retry: usize,
    /// Staging areas whose commit failed again
    pub failed: usize,
}

/// Finish interrupted commits left under `staging_root`.
///
/// A staging area holding its canonical artifact is committed again. An empty
/// staging area of a committed record is removed. Everything else belongs to a
/// failed record and is left untouched for a retry.
pub async fn reconcile_staging(
    staging_root: &Path,
    output_dir: &Path,
) -> crate::Result<ReconcileSummary> {
    let committer = StagingCommitter::new(output_dir);
    let mut summary = ReconcileSummary::default();

    if !fs::try_exists(staging_root).await? {
        return Ok(summary);
    }
    fs::create_dir_all(output_dir).await?;

    let mut entries = fs::read_dir(staging_root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let id = RecordId::new(entry.file_name().to_string_lossy().into_owned());
        let area = StagingArea {
            id: id.clone(),
            dir: entry.path(),
        };

        if area.has_canonical().await {
            match committer.commit(area).await {
                Ok(report) => {
                    info!(record_id = %id, artifacts = report.relocated.len(), "reconciled interrupted commit");
                    summary.recommitted += 1;
                }
                Err(e) => {
                    warn!(record_id = %id, error = %e, "reconciliation commit failed");
                    summary.failed += 1;
                }
            }
            continue;
        }

        let is_empty = fs::read_dir(&area.dir).await?.next_entry().await?.is_none();
        if is_empty && committer.is_committed(&id).await {
            fs::remove_dir(&area.dir).await?;
            summary.removed_empty += 1;
        } else {
            summary.left_for_retry += 1;
        }
    }

    info!(
        recommitted = summary.recommitted,
        removed_empty = summary.removed_empty,
        left_for_retry = summary.left_for_retry,
        failed = summary.failed,
        "staging reconciliation finished"
    );
    Ok(summary)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct Dirs {
        _root: TempDir,
        staging: PathBuf,
        output: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = TempDir::new().unwrap();
        let staging = root.path().join("temp");
        let output = root.path().join("data");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        Dirs {
            _root: root,
            staging,
            output,
        }
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    async fn staged_record(staging: &Path, id: &RecordId) -> StagingArea {
        let (area, state) = StagingArea::open(staging, id).await.unwrap();
        assert_eq!(state, StagingState::Fresh);
        area.write_json(&keyword_artifact_name(id, 0), &json!(["rust"]))
            .await
            .unwrap();
        std::fs::write(area.artifact_path("doc.pdf"), b"%PDF-1.7").unwrap();
        area.write_json(&canonical_name(id), &json!({"conversation_hash": id}))
            .await
            .unwrap();
        area
    }

    // -----------------------------------------------------------------------
    // Artifact naming
    // -----------------------------------------------------------------------

    #[test]
    fn search_cache_names_are_recognized_exactly() {
        let id = RecordId::from("abc");

        assert!(is_search_cache(&id, &search_artifact_name(&id, 3)));
        assert!(!is_search_cache(&id, &keyword_artifact_name(&id, 3)));
        assert!(!is_search_cache(&id, "abc_search_.json"));
        assert!(!is_search_cache(&id, "abcd_search_1.json"));
    }

    // -----------------------------------------------------------------------
    // Opening and reclaiming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stale_area_keeps_only_search_cache() {
        let d = dirs();
        let id = RecordId::from("r1");
        let (area, _) = StagingArea::open(&d.staging, &id).await.unwrap();
        area.write_json(&search_artifact_name(&id, 0), &json!([]))
            .await
            .unwrap();
        area.write_json(&keyword_artifact_name(&id, 0), &json!("kw"))
            .await
            .unwrap();
        std::fs::write(area.artifact_path("half.pdf"), b"%PDF").unwrap();
        drop(area);

        let (area, state) = StagingArea::open(&d.staging, &id).await.unwrap();

        assert_eq!(state, StagingState::Fresh);
        assert_eq!(names_in(area.path()), vec!["r1_search_0.json".to_string()]);
    }

    #[tokio::test]
    async fn area_with_canonical_is_ready_to_commit() {
        let d = dirs();
        let id = RecordId::from("r2");
        drop(staged_record(&d.staging, &id).await);

        let (area, state) = StagingArea::open(&d.staging, &id).await.unwrap();

        assert_eq!(state, StagingState::ReadyToCommit);
        assert_eq!(names_in(area.path()).len(), 3, "nothing is reclaimed");
    }

    #[tokio::test]
    async fn write_json_leaves_no_partial_files() {
        let d = dirs();
        let id = RecordId::from("r3");
        let (area, _) = StagingArea::open(&d.staging, &id).await.unwrap();

        area.write_json("x.json", &json!({"a": 1})).await.unwrap();

        assert_eq!(names_in(area.path()), vec!["x.json".to_string()]);
        let back: serde_json::Value = area.read_json("x.json").await.unwrap();
        assert_eq!(back["a"], 1);
        assert!(area.read_json::<serde_json::Value>("missing.json").await.is_none());
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn commit_moves_everything_canonical_last_and_removes_staging() {
        let d = dirs();
        let id = RecordId::from("r4");
        let area = staged_record(&d.staging, &id).await;
        let staging_dir = area.path().to_path_buf();
        let committer = StagingCommitter::new(&d.output);

        let report = committer.commit(area).await.unwrap();

        assert_eq!(report.relocated.len(), 3);
        assert_eq!(report.relocated.last().unwrap(), &d.output.join("r4.json"));
        assert!(!staging_dir.exists(), "emptied staging area is removed");
        assert_eq!(
            names_in(&d.output),
            vec!["doc.pdf", "r4.json", "r4_keyword_0.json"]
        );
        assert!(committer.is_committed(&id).await);
    }

    #[tokio::test]
    async fn commit_never_overwrites_and_reports_partial() {
        let d = dirs();
        let id = RecordId::from("r5");
        let area = staged_record(&d.staging, &id).await;
        let staging_dir = area.path().to_path_buf();
        // Collides with the second artifact in relocation order
        std::fs::write(d.output.join("r5_keyword_0.json"), b"older").unwrap();

        let err = StagingCommitter::new(&d.output)
            .commit(area)
            .await
            .unwrap_err();

        match err {
            CommitError::Partial {
                relocated,
                remaining,
                ..
            } => {
                assert_eq!(relocated, 1);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected partial commit, got {other:?}"),
        }
        assert_eq!(
            std::fs::read(d.output.join("r5_keyword_0.json")).unwrap(),
            b"older"
        );
        assert!(
            !d.output.join("r5.json").exists(),
            "canonical artifact must not appear after a failed commit"
        );
        assert_eq!(names_in(&staging_dir), vec!["r5.json", "r5_keyword_0.json"]);
    }

    #[tokio::test]
    async fn commit_into_missing_output_dir_is_partial_with_nothing_moved() {
        let d = dirs();
        let id = RecordId::from("r6");
        let area = staged_record(&d.staging, &id).await;
        let committer = StagingCommitter::new(d.output.join("missing"));

        let err = committer.commit(area).await.unwrap_err();

        assert!(matches!(err, CommitError::Partial { relocated: 0, .. }));
        assert_eq!(names_in(&d.staging.join("r6")).len(), 3);
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn reconcile_finishes_commits_and_leaves_failed_records() {
        let d = dirs();
        drop(staged_record(&d.staging, &RecordId::from("done")).await);
        let (failed, _) = StagingArea::open(&d.staging, &RecordId::from("failed"))
            .await
            .unwrap();
        std::fs::write(failed.artifact_path("x.pdf"), b"%PDF").unwrap();
        // Interrupted after the last rename, before removing the directory
        std::fs::create_dir_all(d.staging.join("empty")).unwrap();
        std::fs::write(d.output.join("empty.json"), b"{}").unwrap();

        let summary = reconcile_staging(&d.staging, &d.output).await.unwrap();

        assert_eq!(
            summary,
            ReconcileSummary {
                recommitted: 1,
                removed_empty: 1,
                left_for_retry: 1,
                failed: 0,
            }
        );
        assert!(d.output.join("done.json").exists());
        assert_eq!(names_in(&d.staging), vec!["failed"]);
    }

    #[tokio::test]
    async fn reconcile_of_missing_staging_root_is_a_no_op() {
        let d = dirs();

        let summary = reconcile_staging(&d.staging.join("nope"), &d.output)
            .await
            .unwrap();

        assert_eq!(summary, ReconcileSummary::default());
    }
}

//! Assertions over the output and staging directories

use std::path::Path;

use walkdir::WalkDir;

/// File names (not paths) of every regular file under `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Assert no temporary write file is visible anywhere under `dir`.
pub fn assert_no_partial_files(dir: &Path) {
    let partial: Vec<String> = file_names(dir)
        .into_iter()
        .filter(|name| name.ends_with(".partial"))
        .collect();
    assert!(partial.is_empty(), "partial files left behind: {partial:?}");
}

/// Assert `dir` holds no record staging areas.
pub fn assert_staging_empty(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "staging not cleaned up: {leftovers:?}");
}

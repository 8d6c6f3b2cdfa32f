//! Filename-info extraction and the `#1` placeholder rename.
//!
//! Runs on the derived-info watcher's callback thread, so it is kept to a
//! single bounded directory walk per compare folder.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::daemon::event_log::{EventLog, EventLogKind};
use crate::daemon::paths;

/// Placeholder substituted in compare-folder file names.
pub const PLACEHOLDER: &str = "#1";

static FILE_INFO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{8}_\d{6})_([A-Za-z0-9.]+)_([A-Za-z0-9]+)_").expect("valid file info pattern")
});

/// Pieces extracted from a `<date>_<time>_<compare>_<extract>_...` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub timestamp: String,
    pub compare_tag: String,
    pub extract_tag: String,
}

/// Extract `FileInfo` from a bare file name. `None` when the shape does not match.
pub fn extract_file_info(file_name: &str) -> Option<FileInfo> {
    let caps = FILE_INFO_PATTERN.captures(file_name)?;
    Some(FileInfo {
        timestamp: caps[1].to_string(),
        compare_tag: caps[2].to_string(),
        extract_tag: caps[3].to_string(),
    })
}

/// Rename every file under `target_folder` whose name contains the timestamp,
/// the compare tag and the placeholder, replacing the placeholder with the
/// extract tag. Returns the new paths.
///
/// Existing files at the new name are overwritten by the rename.
pub fn replace_text_in_files(
    info: &FileInfo,
    target_folder: &Path,
    log: &dyn EventLog,
) -> Vec<PathBuf> {
    log.log_debug(&format!(
        "Attempting placeholder rename in {} for {}_{}",
        target_folder.display(),
        info.timestamp,
        info.compare_tag
    ));

    let candidates: Vec<PathBuf> = WalkDir::new(target_folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.contains(&info.timestamp)
                && name.contains(&info.compare_tag)
                && name.contains(PLACEHOLDER)
        })
        .map(|entry| entry.into_path())
        .collect();

    let mut renamed = Vec::with_capacity(candidates.len());
    for old_path in candidates {
        let new_name = paths::file_name_lossy(&old_path).replace(PLACEHOLDER, &info.extract_tag);
        let new_path = old_path.with_file_name(&new_name);

        match std::fs::rename(&old_path, &new_path) {
            Ok(()) => {
                log.log_event(EventLogKind::FileRenamed, &old_path, Some(&new_path));
                renamed.push(new_path);
            }
            Err(e) => {
                log.log_debug(&format!("Failed to rename {}: {}", old_path.display(), e));
            }
        }
    }
    renamed
}

/// Side action for a new marker: rename placeholder files in every compare folder.
///
/// Returns the number of files renamed. A marker whose name does not carry
/// file info is skipped.
pub fn rename_in_compare_folders(
    marker: &Path,
    compare_folders: &[PathBuf],
    log: &dyn EventLog,
) -> usize {
    let file_name = paths::file_name_lossy(marker);
    let info = match extract_file_info(&file_name) {
        Some(info) => info,
        None => {
            log.log_debug(&format!("No file info in {}, rename skipped", file_name));
            return 0;
        }
    };

    let mut total = 0;
    for folder in compare_folders {
        total += replace_text_in_files(&info, folder, log).len();
        log.log_event(EventLogKind::FileComparison, marker, Some(folder));
    }
    total
}

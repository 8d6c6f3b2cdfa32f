//! Path normalization shared by every comparison, map key and prefix test.
//!
//! Normalization is lexical: no symlinks are resolved and the file system is
//! never touched apart from reading the current directory for relative input.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Canonical form of `path`.
///
/// Relative paths are anchored at the current directory, `.` segments are
/// dropped, `..` segments pop their parent, and trailing separators vanish.
/// On Windows both separator styles collapse to `\`. The function is total
/// and `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `/..` stays `/`.
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }

    if normalized.as_os_str().is_empty() {
        return PathBuf::from(".");
    }
    normalized
}

/// True if `path` lies at or below `prefix`, compared component-wise after normalization.
pub fn is_under(path: &Path, prefix: &Path) -> bool {
    normalize(path).starts_with(normalize(prefix))
}

/// True if any directory component of `path` equals `segment`.
pub fn has_segment(path: &Path, segment: &str) -> bool {
    let parent = match path.parent() {
        Some(parent) => parent,
        None => return false,
    };
    parent
        .components()
        .any(|c| matches!(c, Component::Normal(s) if s == OsStr::new(segment)))
}

/// File name of `path` as UTF-8, lossy. Empty when the path has no file name.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

//! Lexical path helpers.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// Does not touch the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Check if `path` is `dir` or lies below it, comparing normalized components.
///
/// `/envs/../etc` is not under `/envs`, and `/envs-old/x` is not under `/envs`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);
    normalized_path.starts_with(&normalized_dir)
}

/// Like [`is_path_under`], but `path == dir` does not count.
pub fn is_strictly_under(path: &Path, dir: &Path) -> bool {
    is_path_under(path, dir) && normalize_path(path) != normalize_path(dir)
}

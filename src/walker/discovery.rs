//! Recursive discovery of data files under the root directory
//!
//! Rules:
//! - entries whose name starts with `.` are skipped (hidden directories are not descended)
//! - only regular files with the configured extension qualify
//! - symbolic links are neither followed nor reported
//! - paths matching an exclude pattern are pruned
//!
//! Any error opening or reading a directory aborts the walk.

use crate::error::WalkError;
use crate::walker::queue::WorkItem;
use regex::Regex;
use std::path::Path;
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

/// Decides which discovered paths become work items
#[derive(Debug, Clone)]
pub struct FileFilter {
    extension: String,
    exclude_patterns: Vec<Regex>,
}

impl FileFilter {
    /// Create a filter for files ending in `.{extension}`
    pub fn new(extension: impl Into<String>, exclude_patterns: Vec<Regex>) -> Self {
        Self {
            extension: extension.into(),
            exclude_patterns,
        }
    }

    /// Extension matched by this filter (without the dot)
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Check if a path matches an exclude pattern
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclude_patterns.iter().any(|re| re.is_match(&path))
    }

    /// Check if a file name carries the wanted extension
    pub fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.to_string_lossy() == self.extension)
    }

    /// Whether the walk should keep this entry (and descend into it)
    fn keeps(&self, entry: &DirEntry) -> bool {
        // The root is always walked, even if it is ".", "..", or excluded
        if entry.depth() == 0 {
            return true;
        }
        !is_hidden(entry) && !self.is_excluded(entry.path())
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Walk `root` and hand every eligible file to `emit`
///
/// Returns the number of files emitted.
pub fn discover<F>(root: &Path, filter: &FileFilter, mut emit: F) -> Result<u64, WalkError>
where
    F: FnMut(WorkItem),
{
    let mut files = 0u64;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| filter.keeps(entry));

    for entry in walker {
        let entry = entry.map_err(|e| WalkError::ReadDirFailed {
            path: e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            reason: e
                .io_error()
                .map(|io| io.to_string())
                .unwrap_or_else(|| e.to_string()),
        })?;

        if entry.file_type().is_dir() {
            trace!(path = %entry.path().display(), "Entering directory");
            continue;
        }

        if entry.file_type().is_file() && filter.has_extension(entry.path()) {
            files += 1;
            emit(WorkItem::new(entry.into_path()));
        }
    }

    debug!(
        root = %root.display(),
        extension = filter.extension(),
        files,
        "Discovery finished"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn collect(root: &Path, filter: &FileFilter) -> Vec<PathBuf> {
        let mut found = Vec::new();
        discover(root, filter, |item| found.push(item.path)).unwrap();
        found.sort();
        found
    }

    #[test]
    fn test_recurses_and_filters_extension() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.dat"), "1 2 3").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join("nested/b.dat"), "5").unwrap();
        fs::write(root.join("nested/deeper/c.dat"), "").unwrap();
        fs::write(root.join("nested/deeper/c.dat.bak"), "").unwrap();

        let filter = FileFilter::new("dat", Vec::new());
        let found = collect(root, &filter);

        assert_eq!(
            found,
            vec![
                root.join("a.dat"),
                root.join("nested/b.dat"),
                root.join("nested/deeper/c.dat"),
            ]
        );
    }

    #[test]
    fn test_skips_hidden_entries() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join(".cache/x.dat"), "1").unwrap();
        fs::write(root.join(".hidden.dat"), "1").unwrap();
        fs::write(root.join("visible.dat"), "1").unwrap();

        let filter = FileFilter::new("dat", Vec::new());
        assert_eq!(collect(root, &filter), vec![root.join("visible.dat")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("far.dat"), "1").unwrap();
        fs::write(root.join("real.dat"), "1").unwrap();
        std::os::unix::fs::symlink(root.join("real.dat"), root.join("link.dat")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("linked_dir")).unwrap();

        let filter = FileFilter::new("dat", Vec::new());
        assert_eq!(collect(root, &filter), vec![root.join("real.dat")]);
    }

    #[test]
    fn test_exclude_prunes_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("snapshot")).unwrap();
        fs::write(root.join("snapshot/old.dat"), "1").unwrap();
        fs::write(root.join("new.dat"), "1").unwrap();

        let filter = FileFilter::new("dat", vec![Regex::new("snapshot").unwrap()]);
        assert!(filter.is_excluded(&root.join("snapshot/old.dat")));
        assert_eq!(collect(root, &filter), vec![root.join("new.dat")]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let filter = FileFilter::new("dat", Vec::new());
        let count = discover(dir.path(), &filter, |_| panic!("nothing to emit")).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone");
        let filter = FileFilter::new("dat", Vec::new());

        let err = discover(&missing, &filter, |_| {}).unwrap_err();
        let WalkError::ReadDirFailed { path, .. } = err;
        assert_eq!(path, missing);
    }
}

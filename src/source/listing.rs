//! Input file discovery and the processed-file marker.

use snafu::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{LoaderError, PatternSnafu};

/// Whether `path` has already been marked processed (its name starts with a dot).
pub fn is_processed(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Regular files matching `pattern` that are not yet processed, sorted by path.
pub fn list_files(pattern: &str) -> Result<Vec<PathBuf>, LoaderError> {
    let entries = glob::glob(pattern).context(PatternSnafu { pattern })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if !path.is_file() => {
                debug!("Skipping non-file {}", path.display());
            }
            Ok(path) if is_processed(&path) => {
                debug!("Skipping processed file {}", path.display());
            }
            Ok(path) => files.push(path),
            Err(e) => warn!("Skipping unreadable match: {}", e),
        }
    }

    files.sort();
    Ok(files)
}

/// Mark a file processed by prefixing its basename with a dot, in place.
///
/// Returns the new path.
pub fn dot_rename(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;

    let mut dotted = std::ffi::OsString::from(".");
    dotted.push(name);
    let target = path.with_file_name(dotted);
    std::fs::rename(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_skips_processed_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "20170929000200.tsv.gz",
            "20170929000000.tsv.gz",
            ".20170929000100.tsv.gz",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.tsv.gz")).unwrap();

        let pattern = format!("{}/*.tsv.gz", dir.path().display());
        let files = list_files(&pattern).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();

        assert_eq!(names, vec!["20170929000000.tsv.gz", "20170929000200.tsv.gz"]);
    }

    #[test]
    fn test_list_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.tsv.gz", dir.path().display());
        assert!(list_files(&pattern).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = list_files("data/[*.tsv.gz").unwrap_err();
        assert!(matches!(err, LoaderError::Pattern { .. }));
    }

    #[test]
    fn test_dot_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20170929000000.tsv.gz");
        std::fs::write(&path, b"x").unwrap();

        let renamed = dot_rename(&path).unwrap();

        assert_eq!(renamed, dir.path().join(".20170929000000.tsv.gz"));
        assert!(!path.exists());
        assert!(renamed.exists());
        assert!(is_processed(&renamed));
    }
}

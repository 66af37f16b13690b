//! Seed file discovery and opening

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zsync_formats::wildcard;

use crate::error::{MatchError, Result};
use crate::target::PART_SUFFIX;

/// Open a seed file for scanning
pub fn open_seed(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => MatchError::SourceNotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => MatchError::SourcePermissionDenied(path.to_path_buf()),
        _ => MatchError::CannotOpenSource {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Leftover scratch files (`<filename>.<random>.part`) in `dir`.
///
/// `exclude` is skipped, normally the scratch file of the current run. A
/// missing or unreadable directory yields nothing.
pub fn partial_files(dir: &Path, filename: &str, exclude: Option<&Path>) -> Vec<PathBuf> {
    let pattern = format!("{filename}.*{PART_SUFFIX}");
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| wildcard::matches(&pattern, name))
        })
        .map(|entry| entry.path())
        .filter(|path| exclude != Some(path.as_path()))
        .collect();
    found.sort();

    debug!(dir = %dir.display(), count = found.len(), "found partial files");
    found
}

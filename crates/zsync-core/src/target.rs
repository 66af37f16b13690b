//! Scratch target file and final placement
//!
//! The target is assembled in a temporary file named
//! `<target-name>.<random>.part` inside the output directory, so an
//! interrupted run leaves something a later run can scan as seed data.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zsync_checksums::{Sha1Digest, Sha1Hasher};

use crate::error::{MatchError, Result};

/// Suffix of scratch files
pub const PART_SUFFIX: &str = ".part";

/// Random characters between the target name and [`PART_SUFFIX`]
const RANDOM_LEN: usize = 10;

/// What to do when the output directory already holds a file with the
/// target name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingFilePolicy {
    /// Store the new file under a timestamped name next to the old one
    #[default]
    KeepBoth,
    /// Atomically replace the old file
    Replace,
}

/// Where a finished target goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Output directory
    pub dir: PathBuf,
    /// Target file name from the control file
    pub filename: String,
    /// Conflict policy
    pub policy: ExistingFilePolicy,
    /// File whose permission bits the result inherits
    pub permissions_from: Option<PathBuf>,
}

impl Placement {
    /// Final path for the target, given the current time
    pub fn destination(&self, now: DateTime<Local>) -> PathBuf {
        let plain = self.dir.join(&self.filename);
        if self.policy == ExistingFilePolicy::KeepBoth && plain.exists() {
            self.dir.join(revised_name(&self.filename, now))
        } else {
            plain
        }
    }
}

/// `<stem>-revised-on-<timestamp>.<suffix>` where the stem ends at the first
/// `.` of `filename`
pub fn revised_name(filename: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%Y-%m-%dT%H-%M-%S");
    match filename.split_once('.') {
        Some((stem, suffix)) => format!("{stem}-revised-on-{stamp}.{suffix}"),
        None => format!("{filename}-revised-on-{stamp}"),
    }
}

/// Sparse, randomly writable file holding the target under construction
#[derive(Debug)]
pub struct TargetFile {
    file: NamedTempFile,
    length: u64,
}

impl TargetFile {
    /// Create an empty scratch file for a target of `length` bytes
    pub fn create(dir: &Path, filename: &str, length: u64) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{filename}."))
            .suffix(PART_SUFFIX)
            .rand_bytes(RANDOM_LEN)
            .tempfile_in(dir)
            .map_err(|source| match source.kind() {
                io::ErrorKind::PermissionDenied => {
                    MatchError::TargetPermissionDenied(dir.to_path_buf())
                }
                _ => MatchError::CannotOpenTarget {
                    path: dir.to_path_buf(),
                    source,
                },
            })?;

        debug!(path = %file.path().display(), length, "created scratch target");
        Ok(Self { file, length })
    }

    /// Path of the scratch file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Exact length of the finished target
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Write `data` at `offset`, dropping anything past the target length.
    ///
    /// Returns the number of bytes written.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let room = usize::try_from(self.length - offset).unwrap_or(usize::MAX);
        let data = &data[..data.len().min(room)];

        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }

    /// Read into `buf` from `offset`; returns bytes read
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Size the file to the target length and hash it
    pub fn sha1(&mut self) -> Result<Sha1Digest> {
        let file = self.file.as_file_mut();
        file.flush()?;
        file.set_len(self.length)?;
        file.seek(SeekFrom::Start(0))?;

        let mut hasher = Sha1Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Keep the scratch file on disk and return its path
    pub fn retain(self) -> Result<PathBuf> {
        let (_, path) = self.file.keep().map_err(|e| MatchError::Io(e.error))?;
        warn!(path = %path.display(), "retained scratch target");
        Ok(path)
    }

    /// Move the scratch file into its final place
    pub fn persist(self, placement: &Placement) -> Result<PathBuf> {
        let dest = placement.destination(Local::now());
        let file: File = self
            .file
            .persist(&dest)
            .map_err(|e| MatchError::Io(e.error))?;
        file.sync_all()?;

        if let Some(source) = &placement.permissions_from {
            match fs::metadata(source) {
                Ok(meta) => fs::set_permissions(&dest, meta.permissions())?,
                Err(e) => debug!(seed = %source.display(), error = %e, "no permissions to copy"),
            }
        }

        info!(path = %dest.display(), "target placed");
        Ok(dest)
    }
}

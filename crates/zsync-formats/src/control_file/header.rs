//! Control file text header
//!
//! The header is eight `Key: value` lines in a fixed order:
//!
//! ```text
//! zsync: 0.6.2
//! Filename: app.AppImage
//! MTime: Tue, 02 Jan 2024 10:00:00 +0000
//! Blocksize: 4096
//! Length: 1048576
//! Hash-Lengths: 2,4,16
//! URL: app.AppImage
//! SHA-1: 2FD4E1C67A2D28FCED849EE1BB76E7391B93EB12
//! ```
//!
//! Lines after the eighth are ignored.

use chrono::{DateTime, FixedOffset};
use std::fmt::Write as _;
use zsync_checksums::{Rsum, Sha1Digest};

use crate::error::{ControlFileError, Result};

/// Number of header lines a control file must carry.
pub const REQUIRED_HEADER_LINES: usize = 8;

/// Smallest block size accepted.
pub const MIN_BLOCK_SIZE: u32 = 1024;

const MTIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Checksum sizing from the `Hash-Lengths:` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashLengths {
    /// Consecutive matching blocks required before a match is accepted (1 or 2)
    pub seq_matches: u8,
    /// Stored bytes of the weak checksum (1..=4)
    pub weak_bytes: u8,
    /// Stored bytes of the strong checksum (3..=16)
    pub strong_bytes: u8,
}

impl Default for HashLengths {
    fn default() -> Self {
        Self {
            seq_matches: 2,
            weak_bytes: 4,
            strong_bytes: 16,
        }
    }
}

impl HashLengths {
    /// Validate and build hash lengths
    pub fn new(seq_matches: u32, weak_bytes: u32, strong_bytes: u32) -> Result<Self> {
        if !(1..=2).contains(&seq_matches)
            || !(1..=4).contains(&weak_bytes)
            || !(3..=16).contains(&strong_bytes)
        {
            return Err(ControlFileError::InvalidHashLengths {
                seq_matches,
                weak_bytes,
                strong_bytes,
            });
        }

        Ok(Self {
            seq_matches: seq_matches as u8,
            weak_bytes: weak_bytes as u8,
            strong_bytes: strong_bytes as u8,
        })
    }

    /// Size of one checksum table record
    pub fn record_size(&self) -> usize {
        usize::from(self.weak_bytes) + usize::from(self.strong_bytes)
    }

    /// Wire-form mask applied to the weak checksum
    pub fn weak_mask(&self) -> u32 {
        Rsum::weak_mask(usize::from(self.weak_bytes))
    }

    fn parse(value: &str) -> Result<Self> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(ControlFileError::InvalidHashLengthLine(value.to_string()));
        }

        let mut numbers = [0u32; 3];
        for (slot, field) in numbers.iter_mut().zip(&fields) {
            *slot = field
                .parse()
                .map_err(|_| ControlFileError::InvalidHashLengthLine(value.to_string()))?;
        }

        Self::new(numbers[0], numbers[1], numbers[2])
    }
}

/// Parsed control file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFileHeader {
    /// Version of the tool that produced the control file
    pub version: String,
    /// File name of the target
    pub filename: String,
    /// Modification time of the target
    pub mtime: DateTime<FixedOffset>,
    /// Block size in bytes (power of two, at least 1024)
    pub block_size: u32,
    /// Exact length of the target in bytes
    pub length: u64,
    /// Checksum sizing
    pub hash_lengths: HashLengths,
    /// Target URL as written, possibly relative to the control file
    pub url: String,
    /// SHA-1 of the complete target
    pub sha1: Sha1Digest,
}

impl ControlFileHeader {
    /// Parse the header text (everything before the blank line)
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();
        if lines.len() < REQUIRED_HEADER_LINES {
            return Err(ControlFileError::InvalidHeaderCount {
                expected: REQUIRED_HEADER_LINES,
                found: lines.len(),
            });
        }

        let version = field(lines[0], "zsync: ")
            .ok_or_else(|| ControlFileError::InvalidVersion(lines[0].to_string()))?
            .to_string();

        let filename = field(lines[1], "Filename: ")
            .ok_or_else(|| ControlFileError::InvalidFilename(lines[1].to_string()))?
            .to_string();

        let mtime = field(lines[2], "MTime: ")
            .and_then(|value| {
                DateTime::parse_from_rfc2822(value)
                    .or_else(|_| DateTime::parse_from_str(value, MTIME_FORMAT))
                    .ok()
            })
            .ok_or_else(|| ControlFileError::InvalidMtime(lines[2].to_string()))?;

        let block_size = field(lines[3], "Blocksize: ")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|size| *size >= MIN_BLOCK_SIZE && size.is_power_of_two())
            .ok_or_else(|| ControlFileError::InvalidBlockSize(lines[3].to_string()))?;

        let length = field(lines[4], "Length: ")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|length| *length != 0)
            .ok_or_else(|| ControlFileError::InvalidLength(lines[4].to_string()))?;

        let hash_lengths = field(lines[5], "Hash-Lengths: ")
            .ok_or_else(|| ControlFileError::InvalidHashLengthLine(lines[5].to_string()))
            .and_then(HashLengths::parse)?;

        let url = field(lines[6], "URL: ")
            .ok_or_else(|| ControlFileError::InvalidUrl(lines[6].to_string()))?
            .to_string();

        let sha1 = field(lines[7], "SHA-1: ")
            .and_then(|value| Sha1Digest::from_hex(value).ok())
            .ok_or_else(|| ControlFileError::InvalidSha1(lines[7].to_string()))?;

        Ok(Self {
            version,
            filename,
            mtime,
            block_size,
            length,
            hash_lengths,
            url,
            sha1,
        })
    }

    /// Number of blocks, counting a trailing partial block
    pub fn block_count(&self) -> u64 {
        self.length.div_ceil(u64::from(self.block_size))
    }

    /// `log2(block_size)`
    pub fn block_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    /// Serialize the header followed by the blank-line marker
    pub fn build(&self) -> Vec<u8> {
        let mut out = String::new();
        let _ = writeln!(out, "zsync: {}", self.version);
        let _ = writeln!(out, "Filename: {}", self.filename);
        let _ = writeln!(out, "MTime: {}", self.mtime.format(MTIME_FORMAT));
        let _ = writeln!(out, "Blocksize: {}", self.block_size);
        let _ = writeln!(out, "Length: {}", self.length);
        let _ = writeln!(
            out,
            "Hash-Lengths: {},{},{}",
            self.hash_lengths.seq_matches, self.hash_lengths.weak_bytes, self.hash_lengths.strong_bytes
        );
        let _ = writeln!(out, "URL: {}", self.url);
        let _ = writeln!(out, "SHA-1: {}", self.sha1.to_hex());
        out.push('\n');
        out.into_bytes()
    }
}

/// Value of `line` after `prefix`, if present and non-empty
fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "zsync: 0.6.2\n\
        Filename: appimagetool-x86_64.AppImage\n\
        MTime: Tue, 02 Jan 2024 10:00:00 +0000\n\
        Blocksize: 2048\n\
        Length: 1048577\n\
        Hash-Lengths: 2,2,5\n\
        URL: appimagetool-x86_64.AppImage\n\
        SHA-1: 2fd4e1c67a2d28fced849ee1bb76e7391b93eb12";

    fn sample_with(line: usize, replacement: &str) -> String {
        let mut lines: Vec<&str> = SAMPLE.split('\n').collect();
        lines[line] = replacement;
        lines.join("\n")
    }

    #[test]
    fn test_parse_sample() {
        let header = ControlFileHeader::parse(SAMPLE).expect("Operation should succeed");
        assert_eq!(header.version, "0.6.2");
        assert_eq!(header.filename, "appimagetool-x86_64.AppImage");
        assert_eq!(header.block_size, 2048);
        assert_eq!(header.block_shift(), 11);
        assert_eq!(header.length, 1_048_577);
        assert_eq!(header.block_count(), 513);
        assert_eq!(
            header.hash_lengths,
            HashLengths {
                seq_matches: 2,
                weak_bytes: 2,
                strong_bytes: 5
            }
        );
        assert_eq!(header.url, "appimagetool-x86_64.AppImage");
        assert_eq!(
            header.sha1.to_hex(),
            "2FD4E1C67A2D28FCED849EE1BB76E7391B93EB12"
        );
        assert_eq!(header.mtime.to_rfc2822(), "Tue, 2 Jan 2024 10:00:00 +0000");
    }

    #[test]
    fn test_build_parse_round_trip() {
        let header = ControlFileHeader::parse(SAMPLE).expect("Operation should succeed");
        let built = header.build();
        let text = std::str::from_utf8(&built).expect("utf-8");
        assert!(text.ends_with("\n\n"));

        let reparsed =
            ControlFileHeader::parse(text.trim_end_matches('\n')).expect("Operation should succeed");
        assert_eq!(reparsed, header);
    }

    #[test]
    fn test_too_few_lines() {
        let truncated: Vec<&str> = SAMPLE.split('\n').take(7).collect();
        let err = ControlFileHeader::parse(&truncated.join("\n")).unwrap_err();
        assert!(matches!(
            err,
            ControlFileError::InvalidHeaderCount {
                expected: 8,
                found: 7
            }
        ));
    }

    #[test]
    fn test_each_field_has_its_own_error() {
        let cases: [(usize, &str, fn(&ControlFileError) -> bool); 8] = [
            (0, "zsync:", |e| matches!(e, ControlFileError::InvalidVersion(_))),
            (1, "Name: x", |e| matches!(e, ControlFileError::InvalidFilename(_))),
            (2, "MTime: yesterday", |e| matches!(e, ControlFileError::InvalidMtime(_))),
            (3, "Blocksize: 512", |e| matches!(e, ControlFileError::InvalidBlockSize(_))),
            (4, "Length: 0", |e| matches!(e, ControlFileError::InvalidLength(_))),
            (5, "Hash-Lengths: 2,4", |e| {
                matches!(e, ControlFileError::InvalidHashLengthLine(_))
            }),
            (6, "Target: x", |e| matches!(e, ControlFileError::InvalidUrl(_))),
            (7, "SHA-1: 1234", |e| matches!(e, ControlFileError::InvalidSha1(_))),
        ];

        for (line, replacement, check) in cases {
            let err = ControlFileHeader::parse(&sample_with(line, replacement)).unwrap_err();
            assert!(check(&err), "line {line}: unexpected error {err:?}");
        }
    }

    #[test]
    fn test_block_size_must_be_power_of_two() {
        let err = ControlFileHeader::parse(&sample_with(3, "Blocksize: 3000")).unwrap_err();
        assert!(matches!(err, ControlFileError::InvalidBlockSize(_)));
    }

    #[test]
    fn test_hash_length_ranges() {
        for bad in ["3,4,16", "0,4,16", "2,0,16", "2,5,16", "2,4,2", "2,4,17"] {
            let line = format!("Hash-Lengths: {bad}");
            let err = ControlFileHeader::parse(&sample_with(5, &line)).unwrap_err();
            assert!(
                matches!(err, ControlFileError::InvalidHashLengths { .. }),
                "{bad}: {err:?}"
            );
        }
    }

    #[test]
    fn test_missing_sha1_line_is_a_count_error() {
        let without_sha: Vec<&str> = SAMPLE.split('\n').filter(|l| !l.starts_with("SHA-1")).collect();
        let err = ControlFileHeader::parse(&without_sha.join("\n")).unwrap_err();
        assert!(matches!(err, ControlFileError::InvalidHeaderCount { .. }));
    }

    #[test]
    fn test_weak_mask_from_lengths() {
        let lengths = HashLengths::new(1, 3, 8).expect("valid");
        assert_eq!(lengths.weak_mask(), 0x00ff_ffff);
        assert_eq!(HashLengths::new(1, 1, 8).expect("valid").weak_mask(), 0xff);
        assert_eq!(lengths.record_size(), 11);
    }
}

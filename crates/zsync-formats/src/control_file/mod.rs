//! zsync control file (`.zsync`) format
//!
//! A control file is a text header, a blank line, then `block_count`
//! binary checksum records. See [`header`] for the header layout and
//! [`table`] for the record layout.

pub mod builder;
pub mod header;
pub mod scanner;
pub mod table;

pub use builder::ControlFileBuilder;
pub use header::{ControlFileHeader, HashLengths};
pub use scanner::MarkerScanner;
pub use table::{BlockChecksum, ChecksumTable};

use crate::error::{ControlFileError, Result};

/// Parsed control file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFile {
    /// Text header
    pub header: ControlFileHeader,
    /// Per-block checksums
    pub checksums: ChecksumTable,
    /// Offset of the checksum table within the original bytes
    pub table_offset: usize,
}

impl ControlFile {
    /// Parse a complete control file held in memory
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut scanner = MarkerScanner::new();
        scanner.feed(data);
        scanner.finish()
    }

    /// Parse with a known table offset (the byte after the `\n\n` marker)
    pub fn parse_at(data: &[u8], table_offset: usize) -> Result<Self> {
        if table_offset < 2 || table_offset > data.len() {
            return Err(ControlFileError::MarkerNotFound);
        }

        let text = std::str::from_utf8(&data[..table_offset - 2])
            .map_err(|_| ControlFileError::InvalidEncoding)?;
        let header = ControlFileHeader::parse(text)?;

        let block_count = usize::try_from(header.block_count()).map_err(|_| {
            ControlFileError::InvalidLength(format!("Length: {}", header.length))
        })?;
        let checksums = ChecksumTable::parse(&data[table_offset..], block_count, header.hash_lengths)?;

        Ok(Self {
            header,
            checksums,
            table_offset,
        })
    }

    /// Serialize header and table
    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header.build();
        out.extend_from_slice(&self.checksums.build(self.header.hash_lengths));
        out
    }
}

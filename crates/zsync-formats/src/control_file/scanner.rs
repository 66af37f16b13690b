//! Incremental search for the header/table boundary

use super::ControlFile;
use crate::error::{ControlFileError, Result};

/// Buffers a control file as it streams in and records where the blank
/// line separating header and checksum table ends.
///
/// Chunks may split the `\n\n` marker anywhere; the scanner keeps enough
/// state to notice a marker straddling two chunks.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    buffer: Vec<u8>,
    scanned: usize,
    table_offset: Option<usize>,
}

impl MarkerScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and continue scanning for the marker
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        if self.table_offset.is_some() {
            return;
        }

        // Resume one byte early so a marker split across chunks is found
        let start = self.scanned.saturating_sub(1);
        if let Some(pos) = self.buffer[start..]
            .windows(2)
            .position(|pair| pair == b"\n\n")
        {
            self.table_offset = Some(start + pos + 2);
        }
        self.scanned = self.buffer.len();
    }

    /// Offset of the first checksum table byte, once the marker was seen
    pub fn table_offset(&self) -> Option<usize> {
        self.table_offset
    }

    /// Bytes buffered so far
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Finish the stream and parse the buffered control file
    pub fn finish(self) -> Result<ControlFile> {
        let offset = self.table_offset.ok_or(ControlFileError::MarkerNotFound)?;
        ControlFile::parse_at(&self.buffer, offset)
    }
}

//! Block matcher
//!
//! [`ChecksumMatcher`] decides which target blocks a stream of bytes
//! contains and writes confirmed blocks into the [`TargetFile`].
//!
//! Seed data goes through the rolling scan ([`ChecksumMatcher::scan_source`]):
//! a window of one block (two when the control file demands consecutive
//! matches) slides over the data one byte at a time, its weak checksum
//! updated in O(1). A hash table hit is confirmed with the truncated MD4,
//! computed at most once per window position. Once a block is accepted the
//! window jumps a whole block ahead and the checksum is recomputed.
//!
//! Downloaded data is placed at a known offset, so
//! [`ChecksumMatcher::submit_range`] only has to verify each block against
//! its stored strong checksum.

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use zsync_checksums::{Rsum, Sha1Digest, StrongChecksum};
use zsync_formats::MatchConfig;

use crate::error::{MatchError, Result};
use crate::hash_table::BlockHashTable;
use crate::ranges::{ByteRange, KnownRanges};
use crate::seed::open_seed;
use crate::target::{Placement, TargetFile};

/// Blocks per scan buffer, not counting the carried-over context
const SCAN_BUFFER_BLOCKS: usize = 16;

/// Rolling scan state carried between buffers of one source stream
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanState {
    /// Weak checksum of the window `[x, x + bs)`
    first: Rsum,
    /// Weak checksum of `[x + bs, x + 2 bs)`, used only with two
    /// consecutive matches
    second: Rsum,
    /// Bytes to skip at the start of the next buffer after a block jump
    /// overran the current one
    skip: usize,
    /// Block expected to follow the last match
    next_match: Option<usize>,
    /// First already-known block after the current run of matches
    next_known: usize,
    /// Chain walker cursor
    rover: Option<usize>,
}

/// Result of [`ChecksumMatcher::submit_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Blocks verified and written
    pub blocks_written: usize,
    /// Unverified tail of the submitted range that must be fetched again
    pub remainder: Option<ByteRange>,
}

/// Block matching engine for one target
#[derive(Debug)]
pub struct ChecksumMatcher {
    config: Arc<MatchConfig>,
    table: BlockHashTable,
    known: KnownRanges,
    target: TargetFile,
    scan: ScanState,
    sequential_offset: u64,
    digest: Option<Sha1Digest>,
}

impl ChecksumMatcher {
    /// Create a matcher writing into `target` and build its hash table
    pub fn new(config: Arc<MatchConfig>, target: TargetFile) -> Result<Self> {
        let table = Self::build_hash(&config, &KnownRanges::new())?;
        Ok(Self {
            config,
            table,
            known: KnownRanges::new(),
            target,
            scan: ScanState::default(),
            sequential_offset: 0,
            digest: None,
        })
    }

    fn build_hash(config: &MatchConfig, known: &KnownRanges) -> Result<BlockHashTable> {
        BlockHashTable::build(
            &config.checksums,
            config.seq_matches(),
            config.weak_mask(),
            usize::from(config.hash_lengths.strong_bytes),
            |id| known.contains(id),
        )
    }

    /// Drop the hash table and index every still-unknown block again
    pub fn rebuild_hash(&mut self) -> Result<()> {
        self.table = Self::build_hash(&self.config, &self.known)?;
        self.scan = ScanState::default();
        Ok(())
    }

    /// Matching configuration
    pub fn config(&self) -> &Arc<MatchConfig> {
        &self.config
    }

    /// Blocks confirmed so far
    pub fn known(&self) -> &KnownRanges {
        &self.known
    }

    /// Path of the scratch file
    pub fn target_path(&self) -> &Path {
        self.target.path()
    }

    fn block_size(&self) -> usize {
        self.config.block_size as usize
    }

    fn context(&self) -> usize {
        self.block_size() * self.config.seq_matches()
    }

    /// Bytes of the target already present in the scratch file
    pub fn known_bytes(&self) -> u64 {
        let shift = self.config.block_shift();
        let length = self.config.target_length;
        self.known
            .spans()
            .iter()
            .map(|span| {
                let start = (span.first as u64) << shift;
                let end = (((span.last + 1) as u64) << shift).min(length);
                end.saturating_sub(start)
            })
            .sum()
    }

    /// True once every block is known
    pub fn is_complete(&self) -> bool {
        self.known.known_blocks() >= self.config.block_count
    }

    /// Scan a whole seed stream for reusable blocks.
    ///
    /// `is_canceled` is polled once per buffer. Returns the number of blocks
    /// newly confirmed; scanning the same seed again confirms nothing new.
    pub fn scan_source<R: Read>(
        &mut self,
        mut reader: R,
        is_canceled: impl Fn() -> bool,
    ) -> Result<usize> {
        let before = self.known.known_blocks();
        let context = self.context();
        let bufsize = self.block_size() * SCAN_BUFFER_BLOCKS;
        let mut buf = vec![0u8; bufsize + context];
        let mut stream_offset = 0u64;
        let mut first_pass = true;

        loop {
            let start = stream_offset;
            let (mut len, at_end) = if first_pass {
                let read = read_full(&mut reader, &mut buf[..bufsize])?;
                if read == 0 {
                    break;
                }
                first_pass = false;
                stream_offset += read as u64;
                (read, read < bufsize)
            } else {
                buf.copy_within(bufsize - context..bufsize, 0);
                stream_offset += (bufsize - context) as u64;
                let read = read_full(&mut reader, &mut buf[context..bufsize])?;
                (context + read, read < bufsize - context)
            };

            if at_end {
                // Zero pad so the final partial block fills a window
                buf[len..len + context].fill(0);
                len += context;
            }

            self.submit_source_data(&buf[..len], start)?;

            if is_canceled() {
                debug!(offset = stream_offset, "seed scan canceled");
                return Err(MatchError::Canceled);
            }
            if at_end {
                break;
            }
        }

        let confirmed = self.known.known_blocks() - before;
        info!(
            blocks = confirmed,
            known = self.known.known_blocks(),
            total = self.config.block_count,
            "seed scan finished"
        );
        Ok(confirmed)
    }

    /// Open and scan a seed file
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn scan_path(&mut self, path: &Path, is_canceled: impl Fn() -> bool) -> Result<usize> {
        let file = open_seed(path)?;
        self.scan_source(io::BufReader::new(file), is_canceled)
    }

    /// Run the rolling scan over one buffer.
    ///
    /// `data` ends with `context` bytes that belong to the next buffer (or
    /// zero padding at end of stream); windows starting there are left for
    /// the next call. `offset` is zero for the first buffer of a stream.
    fn submit_source_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let bs = self.block_size();
        let seq = self.config.seq_matches();
        let context = self.context();
        let shift = self.config.block_shift();
        let len = data.len();

        let mut x = if offset == 0 { 0 } else { self.scan.skip };
        if offset == 0 {
            self.scan.next_match = None;
        }
        if x + context > len {
            self.scan.skip = x + context - len;
            return Ok(());
        }
        if x != 0 || offset == 0 {
            self.scan.first = Rsum::of_block(&data[x..x + bs]);
            if seq > 1 {
                self.scan.second = Rsum::of_block(&data[x + bs..x + 2 * bs]);
            }
        }
        self.scan.skip = 0;

        loop {
            if x + context >= len {
                return Ok(());
            }

            let mut blocks_matched = 0;
            let mut this_match = 0;

            if seq > 1 {
                if let Some(next) = self.scan.next_match {
                    this_match = self.check_chain(next, &data[x..], true)?;
                    if this_match > 0 {
                        blocks_matched = 1;
                    }
                }
            }

            if this_match == 0 {
                if let Some(head) = self.table.lookup(self.scan.first, self.scan.second) {
                    this_match = self.check_chain(head, &data[x..], false)?;
                    if this_match > 0 {
                        blocks_matched = seq;
                    }
                }
            }

            if blocks_matched > 0 {
                x += bs * blocks_matched.min(2);

                if x + context > len {
                    // Next window lies past this buffer
                    self.scan.skip = x + context - len;
                    return Ok(());
                }

                if seq > 1 && blocks_matched == 1 {
                    self.scan.first = self.scan.second;
                } else {
                    self.scan.first = Rsum::of_block(&data[x..x + bs]);
                }
                if seq > 1 {
                    self.scan.second = Rsum::of_block(&data[x + bs..x + 2 * bs]);
                }
                continue;
            }

            let outgoing = data[x];
            let middle = data[x + bs];
            self.scan.first.roll(outgoing, middle, shift);
            if seq > 1 {
                self.scan.second.roll(middle, data[x + 2 * bs], shift);
            }
            x += 1;
        }
    }

    /// Walk a hash chain from `head`, checking every candidate against the
    /// window at the start of `window`.
    ///
    /// With `only_one` only `head` is tried and a single block suffices.
    /// Returns the number of blocks written.
    fn check_chain(&mut self, head: usize, window: &[u8], only_one: bool) -> Result<usize> {
        let bs = self.block_size();
        let seq = self.config.seq_matches();
        let mask = self.config.weak_mask();
        let block_count = self.config.block_count;
        let first = self.scan.first.masked(mask);
        let second = self.scan.second.masked(mask);

        let mut strong: [Option<StrongChecksum>; 2] = [None, None];
        let mut written = 0;

        self.scan.next_match = None;
        self.scan.rover = Some(head);

        while let Some(id) = self.scan.rover {
            self.scan.rover = if only_one { None } else { self.table.next(id) };

            if id >= block_count || self.table.weak(id) != first {
                continue;
            }
            if !only_one && seq > 1 && self.table.weak(id + 1) != second {
                continue;
            }

            let mut ok = true;
            let mut checked = 0;
            loop {
                let digest = *strong[checked].get_or_insert_with(|| {
                    StrongChecksum::compute(&window[checked * bs..(checked + 1) * bs])
                });
                if !digest.matches_prefix(self.table.strong(id + checked)) {
                    ok = false;
                }
                checked += 1;
                if !ok || only_one || checked >= seq {
                    break;
                }
            }
            if !ok {
                continue;
            }

            let next_known = if only_one {
                self.scan.next_known
            } else {
                self.known.next_known(id, block_count)
            };

            let count = if next_known > id + checked {
                self.scan.next_match = Some(id + checked);
                if !only_one {
                    self.scan.next_known = next_known;
                }
                checked
            } else {
                next_known.saturating_sub(id)
            };

            if count > 0 {
                self.write_blocks(&window[..count * bs], id, id + count)?;
                written += count;
            }
        }

        Ok(written)
    }

    /// Write `data` as blocks `[from, to)` and record them as known
    fn write_blocks(&mut self, data: &[u8], from: usize, to: usize) -> Result<()> {
        let offset = self.config.block_offset(from);
        self.target.write_at(offset, data)?;

        for id in from..to {
            self.table.remove(id, &mut self.scan.rover);
            self.known.add(id);
        }
        Ok(())
    }

    /// Byte ranges still needed within blocks `[from, to)`.
    ///
    /// Ranges are block aligned except a range reaching the last block,
    /// which ends at the exact target length.
    pub fn needed_ranges(&self, from: usize, to: usize) -> Vec<ByteRange> {
        let block_count = self.config.block_count;
        let to = to.min(block_count);
        self.known
            .missing(from, to)
            .into_iter()
            .map(|gap| {
                let start = self.config.block_offset(gap.start);
                let end = if gap.end >= block_count {
                    self.config.target_length
                } else {
                    self.config.block_offset(gap.end)
                };
                ByteRange::new(start, end)
            })
            .collect()
    }

    /// Every byte range still needed
    pub fn all_needed_ranges(&self) -> Vec<ByteRange> {
        self.needed_ranges(0, self.config.block_count)
    }

    /// Verify and place downloaded bytes for `range`.
    ///
    /// Blocks are checked in order against their stored strong checksum; the
    /// final short block is checked zero padded. If the first block fails
    /// nothing is written. If a later block fails, the verified prefix is
    /// written and the rest comes back as [`SubmitOutcome::remainder`].
    pub fn submit_range(&mut self, range: ByteRange, data: &[u8]) -> Result<SubmitOutcome> {
        let length = self.config.target_length;
        let bs = u64::from(self.config.block_size);
        if range.is_empty()
            || range.end > length
            || range.start % bs != 0
            || (range.end % bs != 0 && range.end != length)
        {
            return Err(MatchError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                length,
            });
        }

        let shift = self.config.block_shift();
        let from = (range.start >> shift) as usize;
        let to = if range.end == length {
            self.config.block_count
        } else {
            (range.end >> shift) as usize
        };

        let mut verified = 0;
        let mut offset = 0usize;
        for id in from..to {
            let block_len = self.config.block_len(id) as usize;
            let Some(chunk) = data.get(offset..offset + block_len) else {
                break;
            };
            let digest = if block_len < bs as usize {
                StrongChecksum::compute_padded(chunk, bs as usize)
            } else {
                StrongChecksum::compute(chunk)
            };
            if !digest.matches_prefix(&self.config.checksums[id].strong) {
                break;
            }
            verified += 1;
            offset += block_len;
        }

        if verified == 0 {
            warn!(block = from, range = %range, "downloaded block failed verification");
            return Err(MatchError::ChecksumMismatch { block: from });
        }

        self.write_blocks(&data[..offset], from, from + verified)?;
        self.digest = None;

        let remainder = (from + verified < to).then(|| {
            let start = self.config.block_offset(from + verified);
            warn!(block = from + verified, range = %range, "range only partly verified");
            ByteRange::new(start, range.end)
        });

        debug!(range = %range, blocks = verified, "range placed");
        Ok(SubmitOutcome {
            blocks_written: verified,
            remainder,
        })
    }

    /// Append bytes of a whole-file download.
    ///
    /// Bytes are trusted in order and clamped to the target length. With
    /// `is_last` every block is marked known and the file is hashed; the
    /// digest is returned.
    pub fn submit_sequential(&mut self, data: &[u8], is_last: bool) -> Result<Option<Sha1Digest>> {
        let written = self.target.write_at(self.sequential_offset, data)?;
        self.sequential_offset += written as u64;
        self.digest = None;

        if !is_last {
            return Ok(None);
        }

        self.known.add_range(0..self.config.block_count);
        self.verify().map(Some)
    }

    /// Bytes received through [`submit_sequential`](Self::submit_sequential)
    pub fn sequential_bytes(&self) -> u64 {
        self.sequential_offset
    }

    /// Size the scratch file to the target length and hash it.
    ///
    /// The digest is cached until more data is written.
    pub fn verify(&mut self) -> Result<Sha1Digest> {
        if let Some(digest) = self.digest {
            return Ok(digest);
        }
        let digest = self.target.sha1()?;
        self.digest = Some(digest);
        debug!(
            actual = %digest,
            expected = %self.config.target_sha1,
            "target hashed"
        );
        Ok(digest)
    }

    /// True when the scratch file hashes to the expected SHA-1
    pub fn is_verified(&mut self) -> Result<bool> {
        Ok(self.verify()? == self.config.target_sha1)
    }

    /// Verify and move the target into place.
    ///
    /// On a SHA-1 mismatch the scratch file is kept and its path is part of
    /// the error.
    pub fn finalize(mut self, placement: &Placement) -> Result<std::path::PathBuf> {
        let actual = self.verify()?;
        let expected = self.config.target_sha1;

        if actual != expected {
            let retained = self.target.retain()?;
            return Err(MatchError::Sha1Mismatch {
                expected,
                actual,
                retained,
            });
        }

        self.target.persist(placement)
    }

    /// Stop without finalizing and keep the scratch file as a leftover
    /// `.part` for a later run to scan
    pub fn keep_partial(self) -> Result<std::path::PathBuf> {
        self.target.retain()
    }
}

/// Read until `buf` is full or the stream ends
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

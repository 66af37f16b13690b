//! Weak-checksum hash table over target blocks
//!
//! Blocks live in an arena indexed by block id. Each hash bucket holds the
//! id of the first block in its chain and every block stores the id of the
//! next one, so chains are walked without pointers. A bit table in front of
//! the buckets rejects most misses with a single byte load.
//!
//! The arena carries `seq_matches` padding entries past the last block so
//! that a lookup of `id + 1` never goes out of bounds.

use zsync_checksums::{Rsum, StrongChecksum};
use zsync_formats::BlockChecksum;

use crate::error::{MatchError, Result};

/// Extra hash bits used to index the bit table
const BIT_HASH_BITS: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct Entry {
    weak: Rsum,
    strong: StrongChecksum,
    next: Option<usize>,
}

/// Hash index from weak checksums to candidate block ids
#[derive(Debug, Clone)]
pub struct BlockHashTable {
    entries: Vec<Entry>,
    buckets: Vec<Option<usize>>,
    bits: Vec<u8>,
    hash_mask: u32,
    bit_mask: u32,
    seq_matches: usize,
    weak_mask: u32,
    block_count: usize,
}

impl BlockHashTable {
    /// Build the table for `checksums`, skipping blocks for which `skip`
    /// returns true (blocks already known).
    ///
    /// Bucket count is the smallest power of two (between 2^5 and 2^17)
    /// that keeps the load factor below one.
    pub fn build(
        checksums: &[BlockChecksum],
        seq_matches: usize,
        weak_mask: u32,
        strong_len: usize,
        skip: impl Fn(usize) -> bool,
    ) -> Result<Self> {
        let block_count = checksums.len();
        let alloc_error = || MatchError::HashTableAllocation {
            blocks: block_count,
        };

        let mut bits_log = 16u32;
        while (2usize << (bits_log - 1)) > block_count && bits_log > 4 {
            bits_log -= 1;
        }
        let hash_mask = (2u32 << bits_log) - 1;
        let bit_mask = (2u32 << (bits_log + BIT_HASH_BITS)) - 1;

        let padding = StrongChecksum::from_slice(&vec![0u8; strong_len.max(1)])
            .map_err(|_| alloc_error())?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(block_count + seq_matches)
            .map_err(|_| alloc_error())?;
        entries.extend(checksums.iter().map(|c| Entry {
            weak: c.weak,
            strong: c.strong,
            next: None,
        }));
        entries.extend((0..seq_matches).map(|_| Entry {
            weak: Rsum::default(),
            strong: padding,
            next: None,
        }));

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(hash_mask as usize + 1)
            .map_err(|_| alloc_error())?;
        buckets.resize(hash_mask as usize + 1, None);

        let mut bits = Vec::new();
        let bit_bytes = (bit_mask as usize >> 3) + 1;
        bits.try_reserve_exact(bit_bytes)
            .map_err(|_| alloc_error())?;
        bits.resize(bit_bytes, 0u8);

        let mut table = Self {
            entries,
            buckets,
            bits,
            hash_mask,
            bit_mask,
            seq_matches,
            weak_mask,
            block_count,
        };

        // Prepend in reverse so every chain ends up in ascending block order
        for id in (0..block_count).rev() {
            if skip(id) {
                continue;
            }
            let hash = table.entry_hash(id);
            let bucket = (hash & table.hash_mask) as usize;
            table.entries[id].next = table.buckets[bucket];
            table.buckets[bucket] = Some(id);
            let bit = hash & table.bit_mask;
            table.bits[(bit >> 3) as usize] |= 1 << (bit & 7);
        }

        tracing::debug!(
            blocks = block_count,
            buckets = table.buckets.len(),
            "built block hash table"
        );

        Ok(table)
    }

    fn entry_hash(&self, id: usize) -> u32 {
        let first = self.entries[id].weak;
        let second = self.entries[id + 1].weak;
        self.hash_of(first, second)
    }

    fn hash_of(&self, first: Rsum, second: Rsum) -> u32 {
        let first = first.masked(self.weak_mask);
        let high = if self.seq_matches > 1 {
            second.masked(self.weak_mask).b
        } else {
            first.a
        };
        u32::from(first.b) ^ (u32::from(high) << BIT_HASH_BITS)
    }

    /// Head of the chain for the current window checksums, if the bit table
    /// and bucket both report a hit.
    ///
    /// `second` is only consulted when two consecutive matches are required.
    pub fn lookup(&self, first: Rsum, second: Rsum) -> Option<usize> {
        let hash = self.hash_of(first, second);
        let bit = hash & self.bit_mask;
        if self.bits[(bit >> 3) as usize] & (1 << (bit & 7)) == 0 {
            return None;
        }
        self.buckets[(hash & self.hash_mask) as usize]
    }

    /// Next block in the same chain
    pub fn next(&self, id: usize) -> Option<usize> {
        self.entries[id].next
    }

    /// Stored (masked) weak checksum; padding entries read as zero
    pub fn weak(&self, id: usize) -> Rsum {
        self.entries[id].weak
    }

    /// Stored strong checksum prefix
    pub fn strong(&self, id: usize) -> &StrongChecksum {
        &self.entries[id].strong
    }

    /// Unlink block `id` from its chain.
    ///
    /// `rover` is the chain walker's cursor; if it points at the removed
    /// block it is moved on to the successor.
    pub fn remove(&mut self, id: usize, rover: &mut Option<usize>) {
        if id >= self.block_count {
            return;
        }

        let bucket = (self.entry_hash(id) & self.hash_mask) as usize;
        let successor = self.entries[id].next;

        if self.buckets[bucket] == Some(id) {
            self.buckets[bucket] = successor;
        } else {
            let mut cursor = self.buckets[bucket];
            while let Some(current) = cursor {
                if self.entries[current].next == Some(id) {
                    self.entries[current].next = successor;
                    break;
                }
                cursor = self.entries[current].next;
            }
        }

        if *rover == Some(id) {
            *rover = successor;
        }
    }

    /// Number of target blocks indexed
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Collect the ids in a chain starting at `head`
    #[cfg(test)]
    fn chain(&self, head: usize) -> Vec<usize> {
        let mut ids = vec![head];
        let mut cursor = self.entries[head].next;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.entries[id].next;
        }
        ids
    }
}

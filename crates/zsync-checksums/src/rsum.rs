//! Weak rolling checksum
//!
//! The weak checksum is the rsync-style pair `(a, b)`, both kept modulo 2^16:
//!
//! - `a` is the plain sum of the bytes in the window
//! - `b` weights each byte by its distance from the end of the window
//!
//! Sliding the window by one byte is O(1), which is what makes scanning a
//! seed file at every byte offset affordable.

/// Weak checksum of one block-sized window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rsum {
    /// Sum of the bytes in the window
    pub a: u16,
    /// Position-weighted sum of the bytes in the window
    pub b: u16,
}

impl Rsum {
    /// Size in bytes of the serialized checksum
    pub const SIZE: usize = 4;

    /// Create a checksum from its two halves
    pub const fn new(a: u16, b: u16) -> Self {
        Self { a, b }
    }

    /// Compute the checksum of a whole window from scratch.
    pub fn of_block(data: &[u8]) -> Self {
        let mut a: u16 = 0;
        let mut b: u16 = 0;
        let mut weight = data.len();

        for &byte in data {
            let c = u16::from(byte);
            a = a.wrapping_add(c);
            // Only the low 16 bits of the weight survive the multiplication
            b = b.wrapping_add((weight as u16).wrapping_mul(c));
            weight -= 1;
        }

        Self { a, b }
    }

    /// Slide the window forward by one byte.
    ///
    /// The window length must be `1 << block_shift`.
    #[inline]
    pub fn roll(&mut self, outgoing: u8, incoming: u8, block_shift: u32) {
        self.a = self
            .a
            .wrapping_add(u16::from(incoming))
            .wrapping_sub(u16::from(outgoing));
        let shifted = (u32::from(outgoing) << block_shift) as u16;
        self.b = self.b.wrapping_add(self.a).wrapping_sub(shifted);
    }

    /// Keep only the bits covered by `mask`, a mask over the 4-byte wire
    /// form (`a` in the high half, `b` in the low half).
    #[must_use]
    #[inline]
    pub const fn masked(self, mask: u32) -> Self {
        Self {
            a: self.a & (mask >> 16) as u16,
            b: self.b & mask as u16,
        }
    }

    /// Wire-form mask for a given number of stored weak checksum bytes.
    ///
    /// Control files keep the trailing `weak_bytes` of `a ++ b`, so one byte
    /// keeps the low byte of `b`, two keep `b`, three add the low byte of
    /// `a` and four keep everything.
    pub const fn weak_mask(weak_bytes: usize) -> u32 {
        match weak_bytes {
            0 => 0,
            1 => 0x0000_00ff,
            2 => 0x0000_ffff,
            3 => 0x00ff_ffff,
            _ => 0xffff_ffff,
        }
    }

    /// Big-endian wire form: `a` then `b`.
    pub fn to_be_bytes(self) -> [u8; 4] {
        let a = self.a.to_be_bytes();
        let b = self.b.to_be_bytes();
        [a[0], a[1], b[0], b[1]]
    }

    /// Parse a truncated big-endian weak checksum.
    ///
    /// Control files store only the last `weak_bytes` bytes of the 4-byte
    /// wire form; the missing leading bytes read as zero. At most four bytes
    /// are consumed, right-aligned.
    pub fn from_be_tail(bytes: &[u8]) -> Self {
        let take = bytes.len().min(Self::SIZE);
        let mut raw = [0u8; Self::SIZE];
        raw[Self::SIZE - take..].copy_from_slice(&bytes[bytes.len() - take..]);

        Self {
            a: u16::from_be_bytes([raw[0], raw[1]]),
            b: u16::from_be_bytes([raw[2], raw[3]]),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        // a = 1+2+3+4, b = 4*1 + 3*2 + 2*3 + 1*4
        let sum = Rsum::of_block(&[1, 2, 3, 4]);
        assert_eq!(sum.a, 10);
        assert_eq!(sum.b, 20);
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(Rsum::of_block(&[]), Rsum::default());
    }

    #[test]
    fn test_weighted_sum_wraps() {
        let data = vec![0xffu8; 4096];
        let sum = Rsum::of_block(&data);
        let expected_a = (4096u32 * 255) as u16;
        let expected_b = (0..4096u32).map(|w| (w + 1) * 255).sum::<u32>() as u16;
        assert_eq!(sum.a, expected_a);
        assert_eq!(sum.b, expected_b);
    }

    #[test]
    fn test_weak_mask() {
        assert_eq!(Rsum::weak_mask(1), 0xff);
        assert_eq!(Rsum::weak_mask(2), 0xffff);
        assert_eq!(Rsum::weak_mask(3), 0x00ff_ffff);
        assert_eq!(Rsum::weak_mask(4), 0xffff_ffff);
    }

    #[test]
    fn test_from_be_tail() {
        let sum = Rsum::new(0x1234, 0xabcd);
        let wire = sum.to_be_bytes();
        assert_eq!(wire, [0x12, 0x34, 0xab, 0xcd]);

        assert_eq!(Rsum::from_be_tail(&wire), sum);
        assert_eq!(Rsum::from_be_tail(&wire[1..]), Rsum::new(0x0034, 0xabcd));
        assert_eq!(Rsum::from_be_tail(&wire[2..]), Rsum::new(0, 0xabcd));
        assert_eq!(Rsum::from_be_tail(&wire[3..]), Rsum::new(0, 0x00cd));
    }

    #[test]
    fn test_masked_matches_wire_tail() {
        let sum = Rsum::new(0x1234, 0xabcd);
        let wire = sum.to_be_bytes();
        for weak_bytes in 1..=4 {
            let masked = sum.masked(Rsum::weak_mask(weak_bytes));
            assert_eq!(masked, Rsum::from_be_tail(&wire[4 - weak_bytes..]));
        }
        assert_eq!(sum.masked(0xff), Rsum::new(0, 0x00cd));
    }

    #[test]
    fn test_rolled_one_byte_weak_matches_stored() {
        let data: Vec<u8> = (0..2048u32).map(|i| (i * 31 % 251) as u8).collect();
        let mask = Rsum::weak_mask(1);
        let stored = Rsum::from_be_tail(&Rsum::of_block(&data[1024..]).to_be_bytes()[3..]);

        let mut rolling = Rsum::of_block(&data[..1024]);
        for i in 0..1024 {
            rolling.roll(data[i], data[i + 1024], 10);
        }
        assert_ne!(rolling, stored);
        assert_eq!(rolling.masked(mask), stored);
    }

    proptest! {
        #[test]
        fn rolling_matches_recompute(
            data in proptest::collection::vec(any::<u8>(), 1024 + 64),
            shift in 0usize..64,
        ) {
            let block = 1024usize;
            let mut rolling = Rsum::of_block(&data[..block]);
            for i in 0..shift {
                rolling.roll(data[i], data[i + block], 10);
            }
            prop_assert_eq!(rolling, Rsum::of_block(&data[shift..shift + block]));
        }
    }
}

//! Checksum primitives for zsync block matching
//!
//! A zsync control file describes the target as fixed-size blocks, each with
//! two checksums:
//!
//! - **Weak**: a two-part 16-bit rolling checksum ([`Rsum`]) that can slide
//!   over a byte stream in O(1) per byte. Used to find candidate blocks.
//! - **Strong**: a truncated MD4 digest ([`StrongChecksum`]) used to confirm
//!   a weak candidate.
//!
//! The finished file is checked against a whole-file SHA-1 ([`Sha1Digest`]).
//!
//! # Examples
//!
//! ```
//! use zsync_checksums::Rsum;
//!
//! let data = b"abcdefgh";
//! let mut sum = Rsum::of_block(&data[0..4]);
//! sum.roll(data[0], data[4], 2);
//! assert_eq!(sum, Rsum::of_block(&data[1..5]));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod file_digest;
pub mod rsum;
pub mod strong;

pub use error::{ChecksumError, Result};
pub use file_digest::{Sha1Digest, Sha1Hasher};
pub use rsum::Rsum;
pub use strong::{MAX_STRONG_LEN, StrongChecksum};

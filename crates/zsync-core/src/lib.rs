//! Block matching engine for zsync delta transfers
//!
//! This crate decides which blocks of a target file are already available
//! locally and assembles the target from seed data and downloaded ranges.
//!
//! # Components
//!
//! - **Matcher**: [`ChecksumMatcher`] runs the rolling-checksum scan over
//!   seed files, verifies downloaded ranges and finalizes the target
//! - **Hash table**: [`BlockHashTable`] indexes target blocks by weak checksum
//! - **Ranges**: [`KnownRanges`] tracks confirmed blocks; [`ByteRange`] is
//!   the byte form handed to the transport
//! - **Target**: [`TargetFile`] is the scratch file, [`Placement`] decides
//!   the final name
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zsync_core::{ChecksumMatcher, TargetFile};
//! use zsync_formats::{ControlFile, MatchConfig};
//!
//! # fn run(bytes: &[u8], seed: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
//! let control = ControlFile::parse(bytes)?;
//! let (config, target) = MatchConfig::from_control_file(control, None)?;
//! let file = TargetFile::create(std::path::Path::new("."), &target.filename, config.target_length)?;
//! let mut matcher = ChecksumMatcher::new(Arc::new(config), file)?;
//!
//! matcher.scan_path(seed, || false)?;
//! for range in matcher.all_needed_ranges() {
//!     println!("still need {range}");
//! }
//! # Ok(())
//! # }
//! ```

#![allow(clippy::cast_possible_truncation)] // Block ids and offsets fit usize on supported targets

pub mod error;
pub mod hash_table;
pub mod matcher;
pub mod ranges;
pub mod seed;
pub mod target;

pub use error::{MatchError, Result};
pub use hash_table::BlockHashTable;
pub use matcher::{ChecksumMatcher, ScanState, SubmitOutcome};
pub use ranges::{BlockSpan, ByteRange, KnownRanges, RangePosition};
pub use seed::{open_seed, partial_files};
pub use target::{ExistingFilePolicy, Placement, TargetFile, revised_name};

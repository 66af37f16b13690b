//! File formats for the zsync delta-transfer protocol
//!
#![allow(clippy::cast_possible_truncation)] // Header fields are range checked before narrowing
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::return_self_not_must_use)] // Builder patterns
//! This crate provides symmetric (parser and builder) implementations for the
//! files a zsync client consumes.
//!
//! # Supported Formats
//!
//! - **Control file**: the `.zsync` metafile, a text header followed by a
//!   binary table of per-block weak and strong checksums
//! - **Update information**: the pipe-delimited transport descriptor
//!   (`zsync|<url>`, `gh-releases-zsync|...`, `bintray-zsync|...`) that tells
//!   a client where to find the control file
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: control files can be parsed and built
//! - **Streaming Friendly**: [`MarkerScanner`] locates the header/table
//!   boundary incrementally, so non-seekable transports can be consumed as
//!   they arrive
//! - **Validated Configuration**: [`MatchConfig`] can only be built from a
//!   header whose hash lengths, block size and length passed validation
//!
//! # Example
//!
//! ```
//! use zsync_formats::{ControlFile, ControlFileBuilder};
//!
//! let target = vec![7u8; 5000];
//! let bytes = ControlFileBuilder::new("app.AppImage", "app.AppImage")
//!     .block_size(1024)
//!     .build(&target)
//!     .expect("valid parameters");
//!
//! let control = ControlFile::parse(&bytes).expect("round trip");
//! assert_eq!(control.header.length, 5000);
//! assert_eq!(control.header.block_count(), 5);
//! ```

#![warn(missing_docs)]

pub mod control_file;
pub mod error;
pub mod match_config;
pub mod update_info;
pub mod wildcard;

pub use control_file::{
    BlockChecksum, ChecksumTable, ControlFile, ControlFileBuilder, ControlFileHeader,
    HashLengths, MarkerScanner,
};
pub use error::{ControlFileError, Result, UpdateInfoError};
pub use match_config::{MatchConfig, TargetDescriptor};
pub use update_info::UpdateInfo;

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the two checksum families used by the delta-transfer
//! engine:
//!
//! - [`RollingChecksum`], the weak 32-bit Adler-style sum (`checksum1`) that
//!   can slide one byte at a time across a file.
//! - [`MdFour`], an MD4-family compression function with the two historical
//!   padding variants ([`Md4Padding`]), plus the seeded helpers built on it:
//!   [`SeededSum`] for streaming whole-file digests and
//!   [`DigestConfig::block_digest`] for per-block strong sums.
//!
//! [`file_checksum`] digests a whole file through a
//! [`fast_io::MapWindow`] and reports I/O failure as `None`.
//!
//! # Examples
//!
//! ```
//! use checksums::{DigestConfig, RollingChecksum};
//!
//! let block = b"delta transfer block";
//! let weak = RollingChecksum::from_block(block).value();
//! assert_eq!(weak, checksums::checksum1(block));
//!
//! let config = DigestConfig::new(0, 28);
//! let strong = config.block_digest(block);
//! assert_eq!(strong.len(), checksums::SUM_LENGTH);
//! ```

mod file;
mod rolling;
pub mod strong;

pub use file::{file_checksum, source_checksum};
pub use rolling::{CHAR_OFFSET, RollingChecksum, RollingError, checksum1, weak_tag};
pub use strong::{DigestConfig, Md4Padding, MdFour, SeededSum};

/// Length in bytes of a full strong digest.
pub const SUM_LENGTH: usize = 16;

/// Chunk size fed to the strong digest in one step.
pub const CSUM_CHUNK: usize = 64;

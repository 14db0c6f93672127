#![deny(unsafe_code)]

//! Block matching and delta generation.
//!
//! This crate provides the sending half of the delta algorithm:
//! - [`HashIndex`] groups signature blocks by the 16-bit tag of their weak sum
//! - [`Matcher`] scans a new file with a rolling checksum and reports literal
//!   runs and reused blocks to a [`TokenSink`]
//! - [`DeltaScript`] records that output in memory and replays it against a
//!   basis file
//!
//! # Design
//!
//! The matcher reuses [`checksums::RollingChecksum`] for the scan and
//! [`checksums::DigestConfig`] for candidate verification. Bytes come from a
//! [`fast_io::MapWindow`], so only a bounded window of the file is resident.
//! Tokens are emitted as they are found; a
//! [`protocol::StreamChannel`] is itself a sink and receives them in wire
//! format.
//!
//! # See also
//!
//! - [`signature`] crate for signature generation

mod error;
mod index;
mod matcher;
mod script;
mod sink;
mod stats;

pub use error::MatchError;
pub use index::{Candidates, HashIndex, TABLE_SIZE};
pub use matcher::{MatchOptions, Matcher, SUMFLG_SAME_OFFSET};
pub use script::{DeltaScript, DeltaToken};
pub use sink::TokenSink;
pub use stats::MatchStats;

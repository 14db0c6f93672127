#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `signature` describes a basis file as a list of per-block checksums so the
//! sending side can find reusable ranges without seeing the file itself.
//!
//! - [`sum_sizes_sqroot`] picks the block length and strong-sum truncation
//!   for a file length.
//! - [`generate_signature`] walks a seekable source through a
//!   [`fast_io::MapWindow`] and produces a [`SignatureSet`].
//! - [`write_signature`] / [`read_signature`] move a set across a
//!   [`protocol::StreamChannel`]; the sum head alone is handled by
//!   [`write_sum_head`] / [`read_sum_head`].
//!
//! # Examples
//!
//! ```
//! use checksums::DigestConfig;
//! use protocol::ProtocolVersion;
//! use signature::{LayoutParams, generate_signature, sum_sizes_sqroot};
//! use std::io::Cursor;
//!
//! let data = vec![7u8; 2_000];
//! let params = LayoutParams::new(ProtocolVersion::DEFAULT, 2);
//! let layout = sum_sizes_sqroot(data.len() as u64, params).unwrap();
//! assert_eq!((layout.block_length(), layout.block_count()), (700, 3));
//!
//! let set = generate_signature(Cursor::new(data), layout, &DigestConfig::new(0, 28)).unwrap();
//! assert_eq!(set.blocks()[2].length(), 600);
//! ```

mod block;
mod error;
mod generation;
mod layout;
mod set;
mod wire;

pub use block::BlockSignature;
pub use error::SignatureError;
pub use generation::generate_signature;
pub use layout::{
    BLOCK_LENGTH_CAP, BLOCKSUM_BIAS, LayoutParams, MAX_BLOCK_SIZE, SHORT_SUM_LENGTH,
    SignatureLayout, sum_sizes_sqroot,
};
pub use set::SignatureSet;
pub use wire::{read_signature, read_sum_head, write_signature, write_sum_head};

//! MD4-family strong digests.
//!
//! [`MdFour`] is the raw compression engine. [`SeededSum`] streams a whole
//! file behind a 4-byte seed prefix, and [`DigestConfig`] bundles the seed
//! with the protocol's padding mode for per-block sums.

mod mdfour;
mod seeded;

pub use mdfour::{Md4Padding, MdFour};
pub use seeded::SeededSum;

use crate::{CSUM_CHUNK, SUM_LENGTH};

/// Session-wide parameters shared by every strong digest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DigestConfig {
    seed: i32,
    padding: Md4Padding,
}

impl DigestConfig {
    /// Builds a configuration for `seed` under protocol `protocol`.
    #[must_use]
    pub const fn new(seed: i32, protocol: u8) -> Self {
        Self {
            seed,
            padding: Md4Padding::for_protocol(protocol),
        }
    }

    /// Builds a configuration with an explicit padding mode.
    #[must_use]
    pub const fn with_padding(seed: i32, padding: Md4Padding) -> Self {
        Self { seed, padding }
    }

    /// Checksum seed mixed into every digest.
    #[must_use]
    pub const fn seed(&self) -> i32 {
        self.seed
    }

    /// Padding mode of the negotiated protocol.
    #[must_use]
    pub const fn padding(&self) -> Md4Padding {
        self.padding
    }

    /// Strong sum of one block, with the seed appended after the data when
    /// it is non-zero.
    #[doc(alias = "get_checksum2")]
    #[must_use]
    pub fn block_digest(&self, block: &[u8]) -> [u8; SUM_LENGTH] {
        if self.seed == 0 {
            return MdFour::digest(block, self.padding);
        }
        let mut seeded = Vec::with_capacity(block.len() + 4);
        seeded.extend_from_slice(block);
        seeded.extend_from_slice(&self.seed.to_le_bytes());
        MdFour::digest(&seeded, self.padding)
    }

    /// Starts a streaming whole-file sum.
    #[must_use]
    pub fn file_sum(&self) -> SeededSum {
        SeededSum::new(self.seed, self.padding)
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self::with_padding(0, Md4Padding::Standard)
    }
}

pub(crate) fn feed_chunked(md: &mut MdFour, data: &[u8]) {
    let mut chunks = data.chunks_exact(CSUM_CHUNK);
    for chunk in &mut chunks {
        md.update(chunk);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() || md.padding().pads_aligned_input() {
        md.update(rest);
    }
}

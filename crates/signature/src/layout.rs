//! crates/signature/src/layout.rs
//!
//! Block sizing heuristic (`sum_sizes_sqroot`): block length grows with the
//! square root of the file length and the strong sum is truncated according
//! to the number of blocks it has to tell apart.

use core::num::NonZeroU32;

use checksums::SUM_LENGTH;
use logging::trace_delta;
use protocol::ProtocolVersion;

use crate::SignatureError;

/// Block length for files up to `MAX_BLOCK_SIZE²` bytes, and the floor for
/// larger ones.
pub const MAX_BLOCK_SIZE: u32 = 700;
/// Upper bound on a derived block length.
pub const BLOCK_LENGTH_CAP: u32 = 1 << 29;
/// Starting bias of the strong-length formula.
pub const BLOCKSUM_BIAS: i32 = 10;
/// Strong-sum length used during the first pass.
pub const SHORT_SUM_LENGTH: u8 = 2;

const FULL_SUM: u8 = SUM_LENGTH as u8;

/// Tunables consulted by [`sum_sizes_sqroot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LayoutParams {
    protocol: ProtocolVersion,
    checksum_length: u8,
    fixed_block_size: Option<NonZeroU32>,
}

impl LayoutParams {
    /// Parameters for `protocol` with the configured minimum strong length.
    ///
    /// Lengths above the full digest are capped to it.
    #[must_use]
    pub const fn new(protocol: ProtocolVersion, checksum_length: u8) -> Self {
        let checksum_length = if checksum_length > FULL_SUM {
            FULL_SUM
        } else {
            checksum_length
        };
        Self {
            protocol,
            checksum_length,
            fixed_block_size: None,
        }
    }

    /// Forces every file onto `block_size` when set.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: Option<NonZeroU32>) -> Self {
        self.fixed_block_size = block_size;
        self
    }

    /// Negotiated protocol version.
    #[must_use]
    pub const fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Minimum strong-sum length.
    #[must_use]
    pub const fn checksum_length(&self) -> u8 {
        self.checksum_length
    }

    /// Configured block size, if any.
    #[must_use]
    pub const fn fixed_block_size(&self) -> Option<NonZeroU32> {
        self.fixed_block_size
    }
}

/// Shape of a signature: how a file of `file_length` bytes splits into
/// blocks and how many strong-sum bytes each block carries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SignatureLayout {
    block_length: u32,
    strong_length: u8,
    block_count: u32,
    file_length: u64,
    remainder: u32,
}

impl SignatureLayout {
    /// Layout with no blocks, sent for missing or skipped basis files.
    pub const EMPTY: Self = Self {
        block_length: 0,
        strong_length: 0,
        block_count: 0,
        file_length: 0,
        remainder: 0,
    };

    /// Rebuilds a layout from sum-head fields, deriving the file length.
    pub(crate) fn from_head(
        block_count: u32,
        block_length: u32,
        strong_length: u8,
        remainder: u32,
    ) -> Self {
        let file_length = match block_count {
            0 => 0,
            n => {
                let last = if remainder == 0 { block_length } else { remainder };
                u64::from(n - 1) * u64::from(block_length) + u64::from(last)
            }
        };
        Self {
            block_length,
            strong_length,
            block_count,
            file_length,
            remainder,
        }
    }

    /// Nominal block length in bytes.
    #[must_use]
    pub const fn block_length(&self) -> u32 {
        self.block_length
    }

    /// Strong-sum bytes kept per block.
    #[must_use]
    pub const fn strong_length(&self) -> u8 {
        self.strong_length
    }

    /// Number of blocks, the last of which may be short.
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Length of the described file.
    #[must_use]
    pub const fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Length of a short final block, or 0 when every block is full.
    #[must_use]
    pub const fn remainder(&self) -> u32 {
        self.remainder
    }

    /// Whether the layout has no blocks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    /// Length of block `index`.
    #[must_use]
    pub const fn block_len_at(&self, index: u32) -> u32 {
        if index + 1 == self.block_count && self.remainder != 0 {
            self.remainder
        } else {
            self.block_length
        }
    }

    /// Offset of block `index` within the file.
    #[must_use]
    pub const fn block_offset(&self, index: u32) -> u64 {
        index as u64 * self.block_length as u64
    }
}

/// Computes the signature layout for a file of `file_length` bytes.
///
/// An empty file yields [`SignatureLayout::EMPTY`].
#[doc(alias = "--block-size")]
pub fn sum_sizes_sqroot(
    file_length: u64,
    params: LayoutParams,
) -> Result<SignatureLayout, SignatureError> {
    if file_length == 0 {
        return Ok(SignatureLayout::EMPTY);
    }

    let block_length = params
        .fixed_block_size()
        .map_or_else(|| derive_block_length(file_length), NonZeroU32::get);
    let strong_length = derive_strong_length(file_length, block_length, &params);

    let blocks = file_length.div_ceil(u64::from(block_length));
    let block_count = u32::try_from(blocks)
        .ok()
        .filter(|&count| i32::try_from(count).is_ok())
        .ok_or(SignatureError::BlockCountOverflow {
            block_length,
            blocks,
        })?;
    #[allow(clippy::cast_possible_truncation)]
    let remainder = (file_length % u64::from(block_length)) as u32;

    trace_delta!(
        "count={block_count} rem={remainder} blength={block_length} s2length={strong_length} flength={file_length}"
    );

    Ok(SignatureLayout {
        block_length,
        strong_length,
        block_count,
        file_length,
        remainder,
    })
}

/// Largest multiple of 8 whose square does not exceed `file_length`, built
/// greedily from the top bit down, floored at [`MAX_BLOCK_SIZE`].
#[allow(clippy::cast_possible_truncation)]
fn derive_block_length(file_length: u64) -> u32 {
    let threshold = u64::from(MAX_BLOCK_SIZE) * u64::from(MAX_BLOCK_SIZE);
    if file_length <= threshold {
        return MAX_BLOCK_SIZE;
    }

    // sqrt(u64::MAX) < 2^32, so no useful bit lies above 2^31.
    let top = 1u64 << (63 - file_length.leading_zeros());
    let mut c = top.min(1 << 31);
    let mut block_length = 0u64;
    while c >= 8 {
        block_length |= c;
        if u128::from(file_length) < u128::from(block_length) * u128::from(block_length) {
            block_length &= !c;
        }
        c >>= 1;
    }

    block_length
        .max(u64::from(MAX_BLOCK_SIZE))
        .min(u64::from(BLOCK_LENGTH_CAP)) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn derive_strong_length(file_length: u64, block_length: u32, params: &LayoutParams) -> u8 {
    let configured = params.checksum_length();
    if !params.protocol().sends_sum_length() || configured == FULL_SUM {
        return configured;
    }

    let mut bias = BLOCKSUM_BIAS;
    let mut l = file_length >> 1;
    while l != 0 {
        bias += 2;
        l >>= 1;
    }
    let mut c = block_length >> 1;
    while c != 0 && bias != 0 {
        bias -= 1;
        c >>= 1;
    }

    ((bias + 1 - 32 + 7) / 8)
        .max(i32::from(configured))
        .min(i32::from(FULL_SUM)) as u8
}

//! crates/signature/src/block.rs
//!
//! Checksums describing one block of the basis file.

/// Weak and truncated strong sum of one basis block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockSignature {
    weak: u32,
    strong: Vec<u8>,
    length: u32,
    offset: u64,
    flags: u8,
}

impl BlockSignature {
    /// Creates a block descriptor. `strong` is already truncated to the
    /// layout's strong length.
    #[must_use]
    pub const fn new(weak: u32, strong: Vec<u8>, length: u32, offset: u64) -> Self {
        Self {
            weak,
            strong,
            length,
            offset,
            flags: 0,
        }
    }

    /// Rolling checksum of the block.
    #[inline]
    #[must_use]
    pub const fn weak(&self) -> u32 {
        self.weak
    }

    /// Truncated strong sum.
    #[inline]
    #[must_use]
    pub fn strong(&self) -> &[u8] {
        &self.strong
    }

    /// Number of bytes covered.
    #[inline]
    #[must_use]
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Offset of the block within the basis file.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Per-block flag bits; always zero on freshly built or received blocks.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Whether `strong` is a prefix-equal match for this block's strong sum.
    #[must_use]
    pub fn strong_matches(&self, strong: &[u8]) -> bool {
        strong.get(..self.strong.len()) == Some(self.strong.as_slice())
    }
}

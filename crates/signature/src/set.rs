//! crates/signature/src/set.rs
//!
//! A complete signature: layout plus one [`BlockSignature`] per block.

use crate::block::BlockSignature;
use crate::layout::SignatureLayout;

/// Signature of one basis file, consumed once by the matcher.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignatureSet {
    layout: SignatureLayout,
    blocks: Vec<BlockSignature>,
}

impl SignatureSet {
    pub(crate) const fn new(layout: SignatureLayout, blocks: Vec<BlockSignature>) -> Self {
        Self { layout, blocks }
    }

    /// Signature with no blocks; every byte will be sent literally.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(SignatureLayout::EMPTY, Vec::new())
    }

    /// Block layout.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &SignatureLayout {
        &self.layout
    }

    /// Blocks in file order.
    #[inline]
    #[must_use]
    pub fn blocks(&self) -> &[BlockSignature] {
        &self.blocks
    }

    /// Block at `index`.
    #[must_use]
    pub fn block(&self, index: usize) -> Option<&BlockSignature> {
        self.blocks.get(index)
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether there are no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

use fast_io::MapError;
use protocol::ProtocolError;
use thiserror::Error;

/// Failures raised while sizing, generating or transporting a signature.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// Channel failure, including an out-of-range strong length.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The basis file could not be mapped.
    #[error("failed to map basis file: {0}")]
    Map(#[from] MapError),
    /// A received sum head is internally inconsistent.
    #[error("invalid sum head: count={count} blength={block_length} remainder={remainder}")]
    InvalidHeader {
        /// Advertised block count.
        count: i32,
        /// Advertised block length.
        block_length: i32,
        /// Advertised length of the final block.
        remainder: i32,
    },
    /// The block count does not fit the 32-bit wire field.
    #[error("block count {blocks} for block length {block_length} exceeds i32::MAX")]
    BlockCountOverflow {
        /// Block length in use.
        block_length: u32,
        /// Number of blocks the file would need.
        blocks: u64,
    },
}

impl SignatureError {
    /// Whether the peer stream can no longer be trusted.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::InvalidHeader { .. })
    }
}

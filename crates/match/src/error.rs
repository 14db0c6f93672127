use checksums::RollingError;
use fast_io::MapError;
use protocol::ProtocolError;
use thiserror::Error;

/// Failures raised while matching or replaying a delta.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The new file could not be mapped.
    #[error("failed to map source file: {0}")]
    Map(#[from] MapError),
    /// The token sink rejected a token.
    #[error(transparent)]
    Sink(#[from] ProtocolError),
    /// The rolling window fell out of step with the scan.
    #[error(transparent)]
    Rolling(#[from] RollingError),
    /// A block reference points outside the signature.
    #[error("block index {index} out of range for {count} blocks")]
    InvalidBlock {
        /// Referenced block.
        index: u32,
        /// Blocks in the signature.
        count: u32,
    },
}
